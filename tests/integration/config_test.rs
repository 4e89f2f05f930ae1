//! Configuration resolution integration tests.
//!
//! Tests secrets-file loading and source precedence without touching the
//! process environment.

use std::io::Write;
use std::time::Duration;

use pretty_assertions::assert_eq;
use snowlink::config::{ConfigLayer, ConfigLoader, Credential, PrivateKey, SecretsFile};
use snowlink::error::Error;
use snowlink::query::AdmissionMode;
use tempfile::TempDir;

fn write_secrets(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("secrets.toml");
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn test_secrets_file_full_round() {
    let dir = TempDir::new().unwrap();
    let path = write_secrets(
        &dir,
        r#"
[snowflake]
ACCOUNT = "xy12345.eu-west-1"
user = "etl"
private_key_file = "/keys/etl.p8"
warehouse = "LOAD_WH"
network_timeout = 30
client_session_keepalive = false
query_tag = "nightly"

[snowlink]
max_attempts = 5
base_delay_ms = 250
admission = "fail_fast"
"#,
    );

    let secrets = SecretsFile::load_from_file(&path).unwrap();
    assert_eq!(secrets.snowlink.max_attempts, Some(5));
    assert_eq!(secrets.snowlink.max_delay_ms, 8_000);
    assert_eq!(secrets.snowlink.admission, AdmissionMode::FailFast);
    assert_eq!(
        secrets.snowlink.retry_policy().base_delay,
        Duration::from_millis(250)
    );

    let config = ConfigLoader::new()
        .with_secrets(&secrets)
        .unwrap()
        .resolve()
        .unwrap();
    assert_eq!(config.account, "xy12345.eu-west-1");
    assert_eq!(
        config.credential,
        Credential::KeyPair {
            private_key: PrivateKey::File("/keys/etl.p8".into()),
            passphrase: None,
        }
    );
    assert_eq!(config.network_timeout, Some(Duration::from_secs(30)));
    assert!(!config.client_session_keepalive);
    assert_eq!(config.extra.get("query_tag").map(String::as_str), Some("nightly"));
    assert_eq!(
        config.display_string(),
        "etl@xy12345.eu-west-1 warehouse=LOAD_WH"
    );
}

#[test]
fn test_missing_file_is_empty() {
    let dir = TempDir::new().unwrap();
    let secrets = SecretsFile::load_from_file(&dir.path().join("absent.toml")).unwrap();
    assert!(secrets.snowflake.is_none());
    assert_eq!(secrets.snowlink.retry_policy().max_attempts, 3);
}

#[test]
fn test_malformed_file_names_the_path() {
    let dir = TempDir::new().unwrap();
    let path = write_secrets(&dir, "[snowflake\naccount = ");

    let err = SecretsFile::load_from_file(&path).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.to_string().contains("secrets.toml"));
}

#[test]
fn test_precedence_explicit_then_secrets_then_env() {
    let dir = TempDir::new().unwrap();
    let path = write_secrets(
        &dir,
        "[snowflake]\naccount = \"from_file\"\nuser = \"file_user\"\nrole = \"FILE_ROLE\"\n",
    );
    let secrets = SecretsFile::load_from_file(&path).unwrap();

    let explicit = ConfigLayer {
        role: Some("EXPLICIT_ROLE".to_string()),
        ..ConfigLayer::default()
    };

    let config = ConfigLoader::new()
        .with_explicit(explicit)
        .with_secrets(&secrets)
        .unwrap()
        .with_env_vars(env(&[
            ("SNOWFLAKE_ACCOUNT", "from_env"),
            ("SNOWFLAKE_PASSWORD", "env-secret"),
            ("SNOWFLAKE_WAREHOUSE", "ENV_WH"),
            ("UNRELATED", "ignored"),
        ]))
        .unwrap()
        .resolve()
        .unwrap();

    assert_eq!(config.account, "from_file");
    assert_eq!(config.user, "file_user");
    assert_eq!(config.role.as_deref(), Some("EXPLICIT_ROLE"));
    assert_eq!(config.warehouse.as_deref(), Some("ENV_WH"));
    assert_eq!(
        config.credential,
        Credential::Password {
            password: "env-secret".to_string()
        }
    );
}

#[test]
fn test_missing_credential_lists_everything_missing() {
    let err = ConfigLoader::new()
        .with_env_vars(env(&[("SNOWFLAKE_WAREHOUSE", "WH")]))
        .unwrap()
        .resolve()
        .unwrap_err();

    let text = err.to_string();
    assert!(text.contains("account"));
    assert!(text.contains("user"));
    assert!(text.contains("password|private_key|private_key_file|token"));
}

#[test]
fn test_keepalive_defaults_on_and_can_be_disabled() {
    let base = [
        ("SNOWFLAKE_ACCOUNT", "a"),
        ("SNOWFLAKE_USER", "u"),
        ("SNOWFLAKE_TOKEN", "t"),
    ];
    let config = ConfigLoader::new()
        .with_env_vars(env(&base))
        .unwrap()
        .resolve()
        .unwrap();
    assert!(config.client_session_keepalive);

    let mut off = base.to_vec();
    off.push(("SNOWFLAKE_CLIENT_SESSION_KEEPALIVE", "false"));
    let config = ConfigLoader::new()
        .with_env_vars(env(&off))
        .unwrap()
        .resolve()
        .unwrap();
    assert!(!config.client_session_keepalive);
}

#[test]
fn test_connection_retries_seed_executor_policy() {
    let dir = TempDir::new().unwrap();
    let path = write_secrets(
        &dir,
        "[snowflake]\naccount = \"a\"\nuser = \"u\"\ntoken = \"t\"\nretries = 4\nretry_delay = 1.5\n",
    );
    let secrets = SecretsFile::load_from_file(&path).unwrap();
    let config = ConfigLoader::new()
        .with_secrets(&secrets)
        .unwrap()
        .resolve()
        .unwrap();

    let policy = secrets.snowlink.retry_policy_for(&config);
    assert_eq!(policy.max_attempts, 5);
    assert_eq!(policy.base_delay, Duration::from_millis(1500));
}
