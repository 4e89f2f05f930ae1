//! SQL API driver integration tests.
//!
//! These talk to a real account. They skip unless `SNOWFLAKE_ACCOUNT`,
//! `SNOWFLAKE_USER` and a key-pair or OAuth credential are set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use snowlink::client::Client;
use snowlink::config::{ConfigLoader, ConnectionConfig, Credential, ExecutorSettings};
use snowlink::db::{Params, SessionOptions, SqlApiDriver, Value, WarehouseDriver};
use snowlink::error::{DriverErrorKind, Error};

/// Helper to resolve a live config from the environment.
fn live_config() -> Option<ConnectionConfig> {
    std::env::var("SNOWFLAKE_ACCOUNT").ok()?;
    let config = ConfigLoader::new().with_env().ok()?.resolve().ok()?;
    match config.credential {
        Credential::Password { .. } => None,
        _ => Some(config),
    }
}

fn live_client() -> Option<Client> {
    let config = live_config()?;
    let driver = SqlApiDriver::new().ok()?;
    Some(Client::new(
        config,
        Arc::new(driver),
        &ExecutorSettings::default(),
    ))
}

#[tokio::test]
async fn test_select_with_binds() {
    let Some(client) = live_client() else {
        eprintln!("Skipping test: SNOWFLAKE_ACCOUNT with key-pair or OAuth credentials not set");
        return;
    };

    let result = client
        .execute(
            "SELECT ? AS n, ? AS s",
            &Params::positional([Value::Int(41), Value::from("it's")]),
        )
        .await
        .unwrap();

    assert_eq!(result.row_count, 1);
    assert_eq!(result.rows[0][0], Value::Int(41));
    assert_eq!(result.rows[0][1], Value::from("it's"));
    client.close().await.unwrap();
}

#[tokio::test]
async fn test_syntax_error_is_fatal() {
    let Some(client) = live_client() else {
        eprintln!("Skipping test: SNOWFLAKE_ACCOUNT with key-pair or OAuth credentials not set");
        return;
    };

    let err = client
        .execute("SELECT * FORM nowhere", &Params::None)
        .await
        .unwrap_err();

    match err {
        Error::Query {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 1);
            assert_eq!(source.kind, DriverErrorKind::Syntax);
        }
        other => panic!("expected query error, got {other:?}"),
    }
}

#[tokio::test(flavor = "current_thread")]
async fn test_unreachable_host_is_connection_error() {
    let mut config = ConnectionConfig::new(
        "acct",
        "user",
        Credential::OAuth {
            token: "not-a-real-token".to_string(),
        },
    );
    config
        .extra
        .insert("url".to_string(), "http://127.0.0.1:9".to_string());

    let driver = SqlApiDriver::new().unwrap();
    let client = Client::new(
        config,
        Arc::new(driver),
        &ExecutorSettings {
            max_attempts: Some(1),
            ..ExecutorSettings::default()
        },
    );

    let err = client
        .connect(&Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
}

#[tokio::test(flavor = "current_thread")]
async fn test_password_auth_is_config_error() {
    let driver = SqlApiDriver::new().unwrap();
    let client = Client::new(
        ConnectionConfig::with_password("acct", "user", "pw"),
        Arc::new(driver),
        &ExecutorSettings::default(),
    );

    let err = client.connect(&Default::default()).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)), "got {err:?}");
}

#[tokio::test]
async fn test_login_timeout_bounds_session_validation() {
    // Accepts connections but never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut config = ConnectionConfig::new(
        "acct",
        "user",
        Credential::OAuth {
            token: "tok".to_string(),
        },
    );
    config.extra.insert("url".to_string(), format!("http://{addr}"));
    config.login_timeout = Some(Duration::from_millis(200));

    let driver = SqlApiDriver::new().unwrap();
    let start = Instant::now();
    let err = driver
        .open_session(&config, &SessionOptions::default())
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind, DriverErrorKind::Timeout);
    assert!(start.elapsed() < Duration::from_secs(10));
}
