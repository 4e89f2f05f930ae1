//! Configuration management for snowlink.
//!
//! Connection settings are gathered from several layers (an explicit layer
//! supplied by the caller, a secrets TOML file with a `[snowflake]` section,
//! `SNOWFLAKE_*` environment variables and the OS keyring) and resolved into
//! an immutable [`ConnectionConfig`]. For every field the first layer that
//! sets it wins.
//!
//! ```toml
//! [snowflake]
//! account   = "orgname-account"
//! user      = "APP_USER"
//! password  = "*****"
//! warehouse = "WH_DEV"
//! role      = "ROLE_READONLY"
//!
//! [snowlink]
//! max_attempts = 3
//! max_concurrency = 1
//! ```

use crate::error::{Error, Result};
use crate::query::admission::AdmissionMode;
use crate::query::retry::RetryPolicy;
use crate::secrets::SecretStorage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Prefix for environment variables read by [`load_from_env`].
pub const ENV_PREFIX: &str = "SNOWFLAKE_";

/// One partially filled layer of connection settings.
///
/// Every field is optional; layers are merged field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigLayer {
    pub account: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub private_key_file: Option<String>,
    pub private_key_passphrase: Option<String>,
    pub auth_type: Option<String>,
    pub token: Option<String>,
    pub authenticator: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub client_session_keepalive: Option<bool>,
    /// Seconds.
    pub login_timeout: Option<u64>,
    /// Seconds.
    pub network_timeout: Option<u64>,
    pub retries: Option<u32>,
    /// Seconds, fractional allowed.
    pub retry_delay: Option<f64>,
    /// Unrecognised keys, passed through to the driver.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ConfigLayer {
    /// Sets a field by its (case-insensitive) key name. Unknown keys land in
    /// `extra`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        let key = key.to_ascii_lowercase();
        let value = value.into();
        match key.as_str() {
            "account" => self.account = Some(value),
            "user" => self.user = Some(value),
            "password" => self.password = Some(value),
            "private_key" => self.private_key = Some(value),
            "private_key_file" => self.private_key_file = Some(value),
            "private_key_passphrase" => self.private_key_passphrase = Some(value),
            "auth_type" => self.auth_type = Some(value),
            "token" => self.token = Some(value),
            "authenticator" => self.authenticator = Some(value),
            "warehouse" => self.warehouse = Some(value),
            "role" => self.role = Some(value),
            "database" => self.database = Some(value),
            "schema" => self.schema = Some(value),
            "client_session_keepalive" => {
                self.client_session_keepalive = Some(parse_bool(&key, &value)?)
            }
            "login_timeout" => self.login_timeout = Some(parse_number(&key, &value)?),
            "network_timeout" => self.network_timeout = Some(parse_number(&key, &value)?),
            "retries" => self.retries = Some(parse_number(&key, &value)?),
            "retry_delay" => self.retry_delay = Some(parse_number(&key, &value)?),
            _ => {
                self.extra.insert(key, value);
            }
        }
        Ok(())
    }

    /// Fills every unset field from `other`. Fields already set are kept.
    pub fn fill_from(&mut self, other: &ConfigLayer) {
        fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(other);
            }
        }

        fill(&mut self.account, &other.account);
        fill(&mut self.user, &other.user);
        fill(&mut self.password, &other.password);
        fill(&mut self.private_key, &other.private_key);
        fill(&mut self.private_key_file, &other.private_key_file);
        fill(&mut self.private_key_passphrase, &other.private_key_passphrase);
        fill(&mut self.auth_type, &other.auth_type);
        fill(&mut self.token, &other.token);
        fill(&mut self.authenticator, &other.authenticator);
        fill(&mut self.warehouse, &other.warehouse);
        fill(&mut self.role, &other.role);
        fill(&mut self.database, &other.database);
        fill(&mut self.schema, &other.schema);
        fill(&mut self.client_session_keepalive, &other.client_session_keepalive);
        fill(&mut self.login_timeout, &other.login_timeout);
        fill(&mut self.network_timeout, &other.network_timeout);
        fill(&mut self.retries, &other.retries);
        fill(&mut self.retry_delay, &other.retry_delay);
        for (key, value) in &other.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }

    /// Returns true if the layer carries any credential material.
    fn has_credential(&self) -> bool {
        self.password.is_some()
            || self.token.is_some()
            || self.private_key.is_some()
            || self.private_key_file.is_some()
    }

    /// Builds the credential, honouring an explicit `auth_type`.
    fn credential(&self) -> Result<Credential> {
        let auth_type = self
            .auth_type
            .as_deref()
            .map(|s| s.trim().to_ascii_lowercase());

        match auth_type.as_deref() {
            Some("password") | Some("snowflake") => self.password_credential(),
            Some("keypair") | Some("key_pair") | Some("snowflake_jwt") => {
                self.key_pair_credential()
            }
            Some("oauth") => self.oauth_credential(),
            Some(other) => Err(Error::config(format!(
                "Unknown auth_type '{other}'. Expected password, keypair or oauth"
            ))),
            None => {
                if self.token.is_some() {
                    self.oauth_credential()
                } else if self.private_key.is_some() || self.private_key_file.is_some() {
                    self.key_pair_credential()
                } else {
                    self.password_credential()
                }
            }
        }
    }

    fn password_credential(&self) -> Result<Credential> {
        self.password
            .clone()
            .filter(|p| !p.is_empty())
            .map(|password| Credential::Password { password })
            .ok_or_else(|| Error::config("password authentication requires 'password'"))
    }

    fn key_pair_credential(&self) -> Result<Credential> {
        let private_key = match (&self.private_key, &self.private_key_file) {
            (Some(pem), _) => PrivateKey::Pem(pem.clone()),
            (None, Some(path)) => PrivateKey::File(PathBuf::from(path)),
            (None, None) => {
                return Err(Error::config(
                    "keypair authentication requires 'private_key' or 'private_key_file'",
                ))
            }
        };
        Ok(Credential::KeyPair {
            private_key,
            passphrase: self.private_key_passphrase.clone(),
        })
    }

    fn oauth_credential(&self) -> Result<Credential> {
        self.token
            .clone()
            .filter(|t| !t.is_empty())
            .map(|token| Credential::OAuth { token })
            .ok_or_else(|| Error::config("oauth authentication requires 'token'"))
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "Invalid boolean '{value}' for '{key}'"
        ))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("Invalid number '{value}' for '{key}'")))
}

/// Where the private key for key-pair authentication lives.
#[derive(Clone, PartialEq, Eq)]
pub enum PrivateKey {
    /// PEM text supplied inline.
    Pem(String),
    /// Path to a PEM file.
    File(PathBuf),
}

impl PrivateKey {
    /// Returns the PEM text, reading the file if necessary.
    pub fn load_pem(&self) -> Result<String> {
        match self {
            PrivateKey::Pem(pem) => Ok(pem.clone()),
            PrivateKey::File(path) => std::fs::read_to_string(path).map_err(|e| {
                Error::config(format!(
                    "Failed to read private key file {}: {e}",
                    path.display()
                ))
            }),
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKey::Pem(_) => f.write_str("Pem(<redacted>)"),
            PrivateKey::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Credential material for authenticating a session.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password {
        password: String,
    },
    KeyPair {
        private_key: PrivateKey,
        passphrase: Option<String>,
    },
    OAuth {
        token: String,
    },
}

impl Credential {
    /// The auth type name as accepted in configuration.
    pub fn auth_type(&self) -> &'static str {
        match self {
            Credential::Password { .. } => "password",
            Credential::KeyPair { .. } => "keypair",
            Credential::OAuth { .. } => "oauth",
        }
    }
}

// Secrets never reach logs through Debug.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<redacted>")
                .finish(),
            Credential::KeyPair {
                private_key,
                passphrase,
            } => f
                .debug_struct("KeyPair")
                .field("private_key", private_key)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credential::OAuth { .. } => f
                .debug_struct("OAuth")
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

/// Fully resolved, immutable connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub account: String,
    pub user: String,
    pub credential: Credential,
    pub authenticator: Option<String>,
    pub role: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub client_session_keepalive: bool,
    pub login_timeout: Option<Duration>,
    pub network_timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub extra: BTreeMap<String, String>,
}

impl ConnectionConfig {
    /// Creates a password-authenticated config with no defaults set.
    pub fn with_password(
        account: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::new(
            account,
            user,
            Credential::Password {
                password: password.into(),
            },
        )
    }

    /// Creates a config with the given credential and no defaults set.
    pub fn new(account: impl Into<String>, user: impl Into<String>, credential: Credential) -> Self {
        Self {
            account: account.into(),
            user: user.into(),
            credential,
            authenticator: None,
            role: None,
            warehouse: None,
            database: None,
            schema: None,
            client_session_keepalive: true,
            login_timeout: None,
            network_timeout: None,
            retries: None,
            retry_delay: None,
            extra: BTreeMap::new(),
        }
    }

    /// Validates and converts a merged layer.
    pub fn from_layer(layer: &ConfigLayer) -> Result<Self> {
        let mut missing = Vec::new();
        if layer.account.as_deref().map_or(true, str::is_empty) {
            missing.push("account");
        }
        if layer.user.as_deref().map_or(true, str::is_empty) {
            missing.push("user");
        }
        if layer.auth_type.is_none() && !layer.has_credential() {
            missing.push("password|private_key|private_key_file|token");
        }
        if !missing.is_empty() {
            return Err(Error::config(format!(
                "Missing required connection settings: {}",
                missing.join(", ")
            )));
        }

        let credential = layer.credential()?;

        let retry_delay = layer
            .retry_delay
            .map(|secs| {
                Duration::try_from_secs_f64(secs)
                    .map_err(|e| Error::config(format!("Invalid retry_delay '{secs}': {e}")))
            })
            .transpose()?;

        Ok(Self {
            account: layer.account.clone().unwrap_or_default(),
            user: layer.user.clone().unwrap_or_default(),
            credential,
            authenticator: layer.authenticator.clone(),
            role: layer.role.clone(),
            warehouse: layer.warehouse.clone(),
            database: layer.database.clone(),
            schema: layer.schema.clone(),
            client_session_keepalive: layer.client_session_keepalive.unwrap_or(true),
            login_timeout: layer.login_timeout.map(Duration::from_secs),
            network_timeout: layer.network_timeout.map(Duration::from_secs),
            retries: layer.retries,
            retry_delay,
            extra: layer.extra.clone(),
        })
    }

    /// Returns a display-safe string (no secrets) for logs and the CLI.
    pub fn display_string(&self) -> String {
        let mut out = format!("{}@{}", self.user, self.account);
        if let Some(role) = &self.role {
            out.push_str(&format!(" role={role}"));
        }
        if let Some(warehouse) = &self.warehouse {
            out.push_str(&format!(" warehouse={warehouse}"));
        }
        out
    }
}

/// Executor tuning read from the `[snowlink]` section of the secrets file.
///
/// Unset retry fields fall back to the connection's `retries` and
/// `retry_delay`, then to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutorSettings {
    /// Total attempts per call, the first one included.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub admission: AdmissionMode,
}

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

fn default_max_delay_ms() -> u64 {
    8_000
}

fn default_max_concurrency() -> usize {
    1
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_attempts: None,
            base_delay_ms: None,
            max_delay_ms: default_max_delay_ms(),
            max_concurrency: default_max_concurrency(),
            admission: AdmissionMode::default(),
        }
    }
}

impl ExecutorSettings {
    /// Builds the retry policy from these settings and the built-in defaults.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.policy_with(None, None)
    }

    /// Builds the retry policy, taking unset fields from `config`.
    ///
    /// `retries` counts retries, so it maps to `retries + 1` attempts.
    pub fn retry_policy_for(&self, config: &ConnectionConfig) -> RetryPolicy {
        self.policy_with(
            config.retries.map(|r| r.saturating_add(1)),
            config.retry_delay,
        )
    }

    fn policy_with(&self, attempts: Option<u32>, delay: Option<Duration>) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts.or(attempts).unwrap_or(DEFAULT_MAX_ATTEMPTS),
            self.base_delay_ms
                .map(Duration::from_millis)
                .or(delay)
                .unwrap_or(DEFAULT_BASE_DELAY),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// On-disk secrets file layout.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsFile {
    /// Raw `[snowflake]` section; keys are matched case-insensitively.
    #[serde(default)]
    pub snowflake: Option<toml::Table>,

    /// Executor tuning.
    #[serde(default)]
    pub snowlink: ExecutorSettings,
}

impl SecretsFile {
    /// Returns the secrets path to use when none is given.
    ///
    /// Prefers `./.snowlink/secrets.toml` when it exists, otherwise the
    /// platform config directory.
    pub fn default_path() -> PathBuf {
        let local = PathBuf::from(".snowlink").join("secrets.toml");
        if local.exists() {
            return local;
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snowlink")
            .join("secrets.toml")
    }

    /// Loads the secrets file. A missing file yields an empty one.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No secrets file at {}", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read secrets file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses a secrets file from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            Error::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Converts the `[snowflake]` section into a config layer.
    pub fn connection_layer(&self) -> Result<Option<ConfigLayer>> {
        let Some(section) = &self.snowflake else {
            return Ok(None);
        };
        let mut layer = ConfigLayer::default();
        for (key, value) in section {
            layer.set(key, toml_scalar(key, value)?)?;
        }
        Ok(Some(layer))
    }
}

fn toml_scalar(key: &str, value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        other => Err(Error::config(format!(
            "Unsupported value for '{key}': expected a scalar, got {}",
            other.type_str()
        ))),
    }
}

/// Builds a layer from `(name, value)` pairs, keeping those with `prefix`.
pub fn load_from_env_vars<I>(prefix: &str, vars: I) -> Result<ConfigLayer>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut layer = ConfigLayer::default();
    for (name, value) in vars {
        let Some(key) = name.strip_prefix(prefix) else {
            continue;
        };
        if key.is_empty() {
            continue;
        }
        layer.set(key, value)?;
    }
    Ok(layer)
}

/// Builds a layer from the process environment (`SNOWFLAKE_*`).
pub fn load_from_env() -> Result<ConfigLayer> {
    load_from_env_vars(ENV_PREFIX, std::env::vars())
}

/// Where [`ConfigLoader::resolve`] looks for a keyring password.
#[derive(Debug, Default)]
enum KeyringSource {
    #[default]
    Disabled,
    Storage(SecretStorage),
    /// The OS keyring, opened only when a password is actually needed.
    System,
}

/// Resolves a [`ConnectionConfig`] from ordered layers.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    layers: Vec<(&'static str, ConfigLayer)>,
    keyring: KeyringSource,
}

impl ConfigLoader {
    /// Creates an empty loader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer. Earlier layers take precedence.
    pub fn with_layer(mut self, source: &'static str, layer: ConfigLayer) -> Self {
        self.layers.push((source, layer));
        self
    }

    /// Appends the caller's explicit settings.
    pub fn with_explicit(self, layer: ConfigLayer) -> Self {
        self.with_layer("explicit", layer)
    }

    /// Appends the `[snowflake]` section of a loaded secrets file, if any.
    pub fn with_secrets(self, secrets: &SecretsFile) -> Result<Self> {
        Ok(match secrets.connection_layer()? {
            Some(layer) => self.with_layer("secrets", layer),
            None => self,
        })
    }

    /// Appends the given environment variables.
    pub fn with_env_vars<I>(self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(self.with_layer("env", load_from_env_vars(ENV_PREFIX, vars)?))
    }

    /// Appends the process environment.
    pub fn with_env(self) -> Result<Self> {
        Ok(self.with_layer("env", load_from_env()?))
    }

    /// Consults the OS keyring for a password when no layer supplies a
    /// credential.
    pub fn with_keyring(mut self, storage: SecretStorage) -> Self {
        self.keyring = KeyringSource::Storage(storage);
        self
    }

    /// Like [`with_keyring`](Self::with_keyring), but the OS keyring is only
    /// opened when no layer supplies a credential.
    pub fn with_system_keyring(mut self) -> Self {
        self.keyring = KeyringSource::System;
        self
    }

    /// Merges all layers, first match wins per field.
    pub fn merged(&self) -> ConfigLayer {
        let mut merged = ConfigLayer::default();
        for (source, layer) in &self.layers {
            debug!("Merging connection settings from {source}");
            merged.fill_from(layer);
        }
        merged
    }

    /// Merges, consults the keyring if needed, validates.
    pub fn resolve(&self) -> Result<ConnectionConfig> {
        let mut merged = self.merged();

        if let Some(key) = keyring_password_key(&merged) {
            let password = match &self.keyring {
                KeyringSource::Disabled => None,
                KeyringSource::Storage(storage) => storage.retrieve(&key)?,
                KeyringSource::System => SecretStorage::new().retrieve(&key)?,
            };
            if let Some(password) = password {
                debug!("Using keyring password for {key}");
                merged.password = Some(password);
            }
        }

        ConnectionConfig::from_layer(&merged)
    }
}

/// Keyring key to look up, or `None` when the merged layer already carries
/// a credential or asks for a non-password auth type.
fn keyring_password_key(merged: &ConfigLayer) -> Option<String> {
    let wants_password = merged
        .auth_type
        .as_deref()
        .map_or(true, |t| t.eq_ignore_ascii_case("password"));
    if merged.has_credential() || !wants_password {
        return None;
    }
    match (&merged.account, &merged.user) {
        (Some(account), Some(user)) => Some(SecretStorage::connection_password_key(account, user)),
        _ => None,
    }
}
