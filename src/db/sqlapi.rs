//! Snowflake SQL REST API driver.
//!
//! Statements are submitted to `/api/v2/statements` with bearer auth (an
//! OAuth token or a key-pair JWT). Long-running statements are polled by
//! handle and extra result partitions are fetched concurrently, then appended in order.

use super::{
    ColumnInfo, DriverResult, Params, QueryResult, Row, Session, SessionOptions, Value,
    WarehouseDriver,
};
use crate::config::{ConnectionConfig, Credential};
use crate::error::{DriverError, DriverErrorKind, Error, Result};
use crate::query::placeholders::{self, PlaceholderKind};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::future::try_join_all;
use jwt_simple::prelude as jwt;
use jwt_simple::prelude::RSAKeyPairLike;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Timeout for the HTTP client when the config sets none.
const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 60;

/// Upper bound on polling a running statement when the config sets none.
const DEFAULT_STATEMENT_TIMEOUT_SECS: u64 = 300;

/// Lifetime of a key-pair JWT. Snowflake rejects anything over an hour.
const JWT_LIFETIME_MINS: u64 = 59;

/// A session whose token expires within this window is reported as dead.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const POLL_INITIAL_DELAY: Duration = Duration::from_millis(250);
const POLL_MAX_DELAY: Duration = Duration::from_secs(5);

const STATEMENTS_PATH: &str = "/api/v2/statements";

/// Driver for Snowflake's SQL REST API.
#[derive(Debug, Clone)]
pub struct SqlApiDriver {
    client: Client,
    base_url: Option<String>,
}

impl SqlApiDriver {
    /// Creates a driver with a shared HTTP client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS))
            .user_agent(concat!("snowlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: None,
        })
    }

    /// Sends every request to `base_url` instead of the account host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    fn base_url_for(&self, config: &ConnectionConfig) -> String {
        if let Some(url) = &self.base_url {
            return url.trim_end_matches('/').to_string();
        }
        base_url(config)
    }
}

#[async_trait]
impl WarehouseDriver for SqlApiDriver {
    async fn open_session(
        &self,
        config: &ConnectionConfig,
        options: &SessionOptions,
    ) -> DriverResult<Box<dyn Session>> {
        let token = AuthToken::for_config(config)?;
        let token_type = token.token_type;
        let refresh = if config.client_session_keepalive {
            JwtSource::for_config(config)?
        } else {
            None
        };
        let base_url = self.base_url_for(config);
        url::Url::parse(&base_url).map_err(|e| {
            DriverError::new(
                DriverErrorKind::Config,
                format!("Invalid SQL API url '{base_url}': {e}"),
            )
        })?;

        let session = SqlApiSession {
            client: self.client.clone(),
            base_url,
            token: Mutex::new(token),
            refresh,
            database: config.database.clone(),
            schema: config.schema.clone(),
            options: options.clone(),
            network_timeout: config
                .network_timeout
                .unwrap_or(Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS)),
            statement_timeout: Duration::from_secs(DEFAULT_STATEMENT_TIMEOUT_SECS),
            expired: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        };

        // Surfaces bad credentials and unknown roles/warehouses at connect time.
        let validation = session.execute("SELECT 1", &Params::None);
        let validated = match config.login_timeout {
            Some(limit) => tokio::time::timeout(limit, validation).await.map_err(|_| {
                DriverError::timeout(format!("Login did not complete within {limit:?}"))
            })?,
            None => validation.await,
        };
        validated.map_err(|e| match e.kind {
                DriverErrorKind::SessionExpired => DriverError {
                    kind: DriverErrorKind::Auth,
                    ..e
                },
                _ => e,
            })?;

        debug!(
            "SQL API session ready for {} ({})",
            config.display_string(),
            token_type
        );
        Ok(Box::new(session))
    }

    fn name(&self) -> &'static str {
        "sqlapi"
    }
}

/// Bearer token plus the header value naming its type.
#[derive(Clone)]
struct AuthToken {
    token: String,
    token_type: &'static str,
    expires_at: Option<SystemTime>,
}

impl AuthToken {
    fn for_config(config: &ConnectionConfig) -> DriverResult<Self> {
        let token_type = token_type(config)?;
        if let Some(source) = JwtSource::for_config(config)? {
            return source.mint();
        }
        match &config.credential {
            Credential::OAuth { token } => Ok(Self {
                token: token.clone(),
                token_type,
                expires_at: None,
            }),
            _ => Err(password_rejected()),
        }
    }

    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(at) => SystemTime::now() + TOKEN_EXPIRY_MARGIN < at,
            None => true,
        }
    }
}

/// Key material for minting key-pair JWTs.
struct JwtSource {
    account: String,
    user: String,
    pem: String,
}

impl JwtSource {
    /// Loads the private key when the config uses key-pair auth.
    fn for_config(config: &ConnectionConfig) -> DriverResult<Option<Self>> {
        let Credential::KeyPair {
            private_key,
            passphrase,
        } = &config.credential
        else {
            return Ok(None);
        };
        if passphrase.is_some() {
            return Err(DriverError::new(
                DriverErrorKind::Config,
                "Encrypted private keys are not supported; supply an unencrypted PKCS#8 key",
            ));
        }
        let pem = private_key
            .load_pem()
            .map_err(|e| DriverError::new(DriverErrorKind::Config, e.to_string()))?;
        Ok(Some(Self {
            account: config.account.clone(),
            user: config.user.clone(),
            pem,
        }))
    }

    fn mint(&self) -> DriverResult<AuthToken> {
        Ok(AuthToken {
            token: key_pair_jwt(&self.account, &self.user, &self.pem)?,
            token_type: "KEYPAIR_JWT",
            expires_at: Some(SystemTime::now() + Duration::from_secs(JWT_LIFETIME_MINS * 60)),
        })
    }
}

fn password_rejected() -> DriverError {
    DriverError::new(
        DriverErrorKind::Config,
        "The SQL API driver needs key-pair or OAuth credentials; password login is not available over the SQL API",
    )
}

/// Value of the token type header for the configured credential and
/// `authenticator`.
fn token_type(config: &ConnectionConfig) -> DriverResult<&'static str> {
    let authenticator = config
        .authenticator
        .as_deref()
        .map(|a| a.trim().to_ascii_lowercase());
    match (&config.credential, authenticator.as_deref()) {
        (Credential::Password { .. }, _) => Err(password_rejected()),
        (Credential::OAuth { .. }, None | Some("oauth")) => Ok("OAUTH"),
        (Credential::OAuth { .. }, Some("programmatic_access_token")) => {
            Ok("PROGRAMMATIC_ACCESS_TOKEN")
        }
        (Credential::KeyPair { .. }, None | Some("snowflake_jwt")) => Ok("KEYPAIR_JWT"),
        (credential, Some(other)) => Err(DriverError::new(
            DriverErrorKind::Config,
            format!(
                "Authenticator '{other}' is not supported by the SQL API driver with {} credentials",
                credential.auth_type()
            ),
        )),
    }
}

/// Account identifier as used in JWT claims: uppercased, region suffix dropped.
fn jwt_account(account: &str) -> String {
    account
        .split('.')
        .next()
        .unwrap_or(account)
        .to_ascii_uppercase()
}

/// Builds a key-pair JWT for `account` and `user` signed with `pem`.
fn key_pair_jwt(account: &str, user: &str, pem: &str) -> DriverResult<String> {
    let key_pair = jwt::RS256KeyPair::from_pem(pem).map_err(|e| {
        DriverError::new(DriverErrorKind::Config, format!("Invalid private key: {e}"))
    })?;
    let public_der = key_pair.public_key().to_der().map_err(|e| {
        DriverError::new(
            DriverErrorKind::Config,
            format!("Failed to encode public key: {e}"),
        )
    })?;
    let fingerprint = STANDARD.encode(Sha256::digest(&public_der));

    let qualified_user = format!("{}.{}", jwt_account(account), user.to_ascii_uppercase());
    let claims = jwt::Claims::create(jwt::Duration::from_mins(JWT_LIFETIME_MINS))
        .with_issuer(format!("{qualified_user}.SHA256:{fingerprint}"))
        .with_subject(qualified_user);

    key_pair
        .sign(claims)
        .map_err(|e| DriverError::new(DriverErrorKind::Auth, format!("Failed to sign JWT: {e}")))
}

/// Account endpoint, overridable with the `url` or `host` extra settings.
fn base_url(config: &ConnectionConfig) -> String {
    if let Some(url) = config.extra.get("url") {
        return url.trim_end_matches('/').to_string();
    }
    if let Some(host) = config.extra.get("host") {
        return format!("https://{}", host.trim_end_matches('/'));
    }
    format!(
        "https://{}.snowflakecomputing.com",
        config.account.to_ascii_lowercase()
    )
}

struct SqlApiSession {
    client: Client,
    base_url: String,
    token: Mutex<AuthToken>,
    /// Set when keepalive is on and the token is a re-mintable JWT.
    refresh: Option<JwtSource>,
    database: Option<String>,
    schema: Option<String>,
    options: SessionOptions,
    network_timeout: Duration,
    statement_timeout: Duration,
    expired: AtomicBool,
    closed: AtomicBool,
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    bindings: BTreeMap<String, Binding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Binding {
    #[serde(rename = "type")]
    kind: &'static str,
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    code: Option<String>,
    sql_state: Option<String>,
    message: Option<String>,
    statement_handle: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    scale: Option<i64>,
}

impl SqlApiSession {
    fn statements_url(&self) -> String {
        format!("{}{}", self.base_url, STATEMENTS_PATH)
    }

    /// Returns the bearer token, re-minting an expiring JWT when keepalive
    /// is on.
    async fn current_token(&self) -> DriverResult<AuthToken> {
        let mut token = self.token.lock().await;
        if !token.is_fresh() {
            if let Some(source) = &self.refresh {
                debug!("Refreshing key-pair JWT");
                *token = source.mint()?;
            }
        }
        Ok(token.clone())
    }

    fn request(&self, builder: reqwest::RequestBuilder, token: &AuthToken) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&token.token)
            .header("X-Snowflake-Authorization-Token-Type", token.token_type)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(self.network_timeout)
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> DriverResult<(StatusCode, String)> {
        let token = self.current_token().await?;
        let response = self
            .request(builder, &token)
            .send()
            .await
            .map_err(map_transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        Ok((status, body))
    }

    async fn submit(&self, sql: &str, bindings: BTreeMap<String, Binding>) -> DriverResult<StatementResponse> {
        let body = StatementRequest {
            statement: sql,
            timeout: self.statement_timeout.as_secs(),
            database: self.database.as_deref(),
            schema: self.schema.as_deref(),
            warehouse: self.options.warehouse.as_deref(),
            role: self.options.role.as_deref(),
            bindings,
        };

        let request_id = uuid::Uuid::new_v4().to_string();
        let builder = self
            .client
            .post(self.statements_url())
            .query(&[("requestId", request_id.as_str())])
            .json(&body);

        let (status, text) = self.send(builder).await?;
        let mut response = self.handle_response(status, &text)?;

        // 202: still running; poll the handle.
        let deadline = Instant::now() + self.statement_timeout;
        let mut delay = POLL_INITIAL_DELAY;
        let mut pending = status == StatusCode::ACCEPTED;
        while pending {
            if Instant::now() >= deadline {
                return Err(DriverError::timeout(format!(
                    "Statement still running after {:?}",
                    self.statement_timeout
                )));
            }
            let handle = response.statement_handle.clone().ok_or_else(|| {
                DriverError::new(DriverErrorKind::Other, "Running statement has no handle")
            })?;
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(POLL_MAX_DELAY);

            let url = format!("{}/{}", self.statements_url(), handle);
            let (status, text) = self.send(self.client.get(url)).await?;
            response = self.handle_response(status, &text)?;
            pending = status == StatusCode::ACCEPTED;
        }

        Ok(response)
    }

    async fn fetch_partition(&self, handle: &str, partition: usize) -> DriverResult<Vec<Vec<Option<String>>>> {
        let url = format!("{}/{}", self.statements_url(), handle);
        let builder = self
            .client
            .get(url)
            .query(&[("partition", partition.to_string())]);
        let (status, text) = self.send(builder).await?;
        Ok(self.handle_response(status, &text)?.data)
    }

    fn handle_response(&self, status: StatusCode, body: &str) -> DriverResult<StatementResponse> {
        if status.is_success() {
            return serde_json::from_str(body).map_err(|e| {
                DriverError::new(
                    DriverErrorKind::Other,
                    format!("Failed to parse SQL API response: {e}"),
                )
            });
        }

        let error = parse_error(status, body);
        if error.kind == DriverErrorKind::SessionExpired {
            self.expired.store(true, Ordering::SeqCst);
        }
        Err(error)
    }
}

#[async_trait]
impl Session for SqlApiSession {
    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && !self.expired.load(Ordering::SeqCst)
            && (self.refresh.is_some() || self.token.lock().await.is_fresh())
    }

    async fn execute(&self, sql: &str, params: &Params) -> DriverResult<QueryResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::new(
                DriverErrorKind::SessionExpired,
                "Session is closed",
            ));
        }

        let start = Instant::now();
        let (statement, bindings) = bind(sql, params)?;
        let response = self.submit(&statement, bindings).await?;

        let meta = response.result_set_meta_data.unwrap_or_default();
        let mut raw_rows = response.data;
        if meta.partition_info.len() > 1 {
            let handle = response.statement_handle.as_deref().ok_or_else(|| {
                DriverError::new(DriverErrorKind::Other, "Partitioned result has no handle")
            })?;
            let partitions = try_join_all(
                (1..meta.partition_info.len()).map(|p| self.fetch_partition(handle, p)),
            )
            .await?;
            raw_rows.extend(partitions.into_iter().flatten());
        }

        let columns = meta
            .row_type
            .iter()
            .map(|c| ColumnInfo::new(c.name.clone(), c.kind.clone()))
            .collect();
        let rows: Vec<Row> = raw_rows
            .into_iter()
            .map(|raw| {
                raw.into_iter()
                    .enumerate()
                    .map(|(i, cell)| convert_cell(meta.row_type.get(i), cell))
                    .collect()
            })
            .collect();

        Ok(QueryResult::with_data(columns, rows).with_execution_time(start.elapsed()))
    }

    async fn close(&self) -> DriverResult<()> {
        // Bearer sessions hold no server-side state to release.
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Rewrites named placeholders to `?` and builds the positional binding map.
fn bind(sql: &str, params: &Params) -> DriverResult<(String, BTreeMap<String, Binding>)> {
    let found = placeholders::scan(sql);
    let mut bindings = BTreeMap::new();

    match params {
        Params::None => Ok((sql.to_string(), bindings)),
        Params::Positional(values) => {
            for (i, value) in values.iter().enumerate() {
                bindings.insert((i + 1).to_string(), binding_for(value));
            }
            Ok((sql.to_string(), bindings))
        }
        Params::Named(values) => {
            let mut rewritten = String::with_capacity(sql.len());
            let mut cursor = 0;
            for (i, placeholder) in found.iter().enumerate() {
                let PlaceholderKind::Named(name) = &placeholder.kind else {
                    return Err(DriverError::invalid_request(
                        "Cannot mix positional and named placeholders",
                    ));
                };
                let value = values.get(name).ok_or_else(|| {
                    DriverError::invalid_request(format!("No value bound for ':{name}'"))
                })?;
                rewritten.push_str(&sql[cursor..placeholder.span.start]);
                rewritten.push('?');
                cursor = placeholder.span.end;
                bindings.insert((i + 1).to_string(), binding_for(value));
            }
            rewritten.push_str(&sql[cursor..]);
            Ok((rewritten, bindings))
        }
    }
}

fn binding_for(value: &Value) -> Binding {
    let (kind, value) = match value {
        Value::Null => ("TEXT", None),
        Value::Bool(b) => ("BOOLEAN", Some(b.to_string())),
        Value::Int(i) => ("FIXED", Some(i.to_string())),
        Value::Float(f) => ("REAL", Some(f.to_string())),
        Value::String(s) => ("TEXT", Some(s.clone())),
        Value::Bytes(b) => ("BINARY", Some(hex_encode(b))),
    };
    Binding { kind, value }
}

/// Converts one cell using its column's declared type.
fn convert_cell(column: Option<&RowType>, cell: Option<String>) -> Value {
    let Some(text) = cell else {
        return Value::Null;
    };
    let Some(column) = column else {
        return Value::String(text);
    };

    match column.kind.to_ascii_lowercase().as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => text
            .parse::<i64>()
            .map(Value::Int)
            .unwrap_or(Value::String(text)),
        "fixed" | "real" => text
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::String(text)),
        "boolean" => match text.as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" => Value::Bool(false),
            _ => Value::String(text),
        },
        "binary" => hex_decode(&text)
            .map(Value::Bytes)
            .unwrap_or(Value::String(text)),
        _ => Value::String(text),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

fn map_transport_error(error: reqwest::Error) -> DriverError {
    if error.is_timeout() {
        DriverError::timeout(format!("Request timed out: {error}"))
    } else if error.is_connect() || error.is_request() || error.is_body() {
        DriverError::network(format!("Request failed: {error}"))
    } else {
        DriverError::new(DriverErrorKind::Other, format!("Request failed: {error}"))
    }
}

/// Maps a failed HTTP response to a driver error.
fn parse_error(status: StatusCode, body: &str) -> DriverError {
    let parsed: StatementResponse = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("SQL API returned {status}"));

    let kind = classify_response(status, parsed.code.as_deref(), parsed.sql_state.as_deref(), &message);
    if kind == DriverErrorKind::Other {
        warn!(%status, "Unrecognised SQL API failure: {message}");
    }

    let mut error = DriverError::new(kind, message);
    if let Some(code) = parsed.code {
        error = error.with_code(code);
    }
    if let Some(sql_state) = parsed.sql_state {
        error = error.with_sql_state(sql_state);
    }
    error
}

fn classify_response(
    status: StatusCode,
    code: Option<&str>,
    sql_state: Option<&str>,
    message: &str,
) -> DriverErrorKind {
    match code {
        Some("390111" | "390112" | "390114") => return DriverErrorKind::SessionExpired,
        Some("390100" | "390144" | "394304") => return DriverErrorKind::Auth,
        Some("000630") => return DriverErrorKind::Timeout,
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED => return DriverErrorKind::SessionExpired,
        StatusCode::FORBIDDEN => return DriverErrorKind::PermissionDenied,
        StatusCode::TOO_MANY_REQUESTS => return DriverErrorKind::Throttled,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            return DriverErrorKind::Timeout
        }
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            return DriverErrorKind::Network
        }
        _ => {}
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("warehouse") && lower.contains("suspended") {
        return DriverErrorKind::WarehouseSuspended;
    }

    match sql_state {
        Some("42000" | "42601") => DriverErrorKind::Syntax,
        Some("42501") => DriverErrorKind::PermissionDenied,
        Some("02000" | "42S02") => DriverErrorKind::ObjectNotFound,
        Some("57014") => DriverErrorKind::Timeout,
        Some(state) if state.starts_with("08") => DriverErrorKind::Network,
        _ if lower.contains("does not exist") => DriverErrorKind::ObjectNotFound,
        _ if status == StatusCode::BAD_REQUEST => DriverErrorKind::InvalidRequest,
        _ if status.is_server_error() => DriverErrorKind::Network,
        _ => DriverErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivateKey;

    fn row_type(kind: &str, scale: Option<i64>) -> RowType {
        RowType {
            name: "c".to_string(),
            kind: kind.to_string(),
            scale,
        }
    }

    #[test]
    fn test_jwt_account_strips_region() {
        assert_eq!(jwt_account("xy12345.us-east-1"), "XY12345");
        assert_eq!(jwt_account("myorg-acct"), "MYORG-ACCT");
    }

    #[test]
    fn test_base_url_default_and_overrides() {
        let mut config = ConnectionConfig::with_password("MyOrg-Acct", "user", "pw");
        assert_eq!(base_url(&config), "https://myorg-acct.snowflakecomputing.com");

        config
            .extra
            .insert("host".to_string(), "proxy.internal:8443".to_string());
        assert_eq!(base_url(&config), "https://proxy.internal:8443");

        config
            .extra
            .insert("url".to_string(), "http://localhost:9000/".to_string());
        assert_eq!(base_url(&config), "http://localhost:9000");
    }

    #[test]
    fn test_positional_bindings() {
        let (sql, bindings) = bind(
            "SELECT * FROM t WHERE a = ? AND b = ?",
            &Params::positional([Value::Int(7), Value::from("x")]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = ? AND b = ?");
        assert_eq!(
            bindings.get("1"),
            Some(&Binding {
                kind: "FIXED",
                value: Some("7".to_string())
            })
        );
        assert_eq!(bindings.get("2").map(|b| b.kind), Some("TEXT"));
    }

    #[test]
    fn test_named_bindings_are_rewritten_in_order() {
        let (sql, bindings) = bind(
            "SELECT :b, :a, :b, payload:field FROM t WHERE x = ':a'",
            &Params::named([("a", Value::Int(1)), ("b", Value::Bool(true))]),
        )
        .unwrap();
        assert_eq!(sql, "SELECT ?, ?, ?, payload:field FROM t WHERE x = ':a'");
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings["1"].kind, "BOOLEAN");
        assert_eq!(bindings["2"].value.as_deref(), Some("1"));
        assert_eq!(bindings["3"].value.as_deref(), Some("true"));
    }

    #[test]
    fn test_named_binding_missing_value() {
        let err = bind("SELECT :missing", &Params::named([("other", 1)])).unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::InvalidRequest);
    }

    #[test]
    fn test_null_and_bytes_bindings() {
        assert_eq!(binding_for(&Value::Null).value, None);
        assert_eq!(
            binding_for(&Value::Bytes(vec![0xde, 0xad])).value.as_deref(),
            Some("dead")
        );
    }

    #[test]
    fn test_convert_cells_by_row_type() {
        assert_eq!(
            convert_cell(Some(&row_type("fixed", Some(0))), Some("42".into())),
            Value::Int(42)
        );
        assert_eq!(
            convert_cell(Some(&row_type("fixed", Some(2))), Some("1.50".into())),
            Value::Float(1.5)
        );
        assert_eq!(
            convert_cell(Some(&row_type("boolean", None)), Some("true".into())),
            Value::Bool(true)
        );
        assert_eq!(
            convert_cell(Some(&row_type("binary", None)), Some("00ff".into())),
            Value::Bytes(vec![0x00, 0xff])
        );
        assert_eq!(
            convert_cell(Some(&row_type("text", None)), Some("hi".into())),
            Value::from("hi")
        );
        assert_eq!(convert_cell(Some(&row_type("text", None)), None), Value::Null);
    }

    #[test]
    fn test_classify_http_statuses() {
        let cases = [
            (StatusCode::TOO_MANY_REQUESTS, DriverErrorKind::Throttled),
            (StatusCode::SERVICE_UNAVAILABLE, DriverErrorKind::Network),
            (StatusCode::GATEWAY_TIMEOUT, DriverErrorKind::Timeout),
            (StatusCode::REQUEST_TIMEOUT, DriverErrorKind::Timeout),
            (StatusCode::UNAUTHORIZED, DriverErrorKind::SessionExpired),
        ];
        for (status, expected) in cases {
            assert_eq!(parse_error(status, "").kind, expected, "{status}");
        }
    }

    #[test]
    fn test_classify_statement_failures() {
        let body = r#"{"code":"001003","sqlState":"42000","message":"SQL compilation error: syntax error line 1 at position 9 unexpected 'FORM'."}"#;
        let err = parse_error(StatusCode::UNPROCESSABLE_ENTITY, body);
        assert_eq!(err.kind, DriverErrorKind::Syntax);
        assert_eq!(err.code.as_deref(), Some("001003"));
        assert_eq!(err.sql_state.as_deref(), Some("42000"));

        let body = r#"{"code":"002003","sqlState":"02000","message":"Object 'T' does not exist or not authorized."}"#;
        assert_eq!(
            parse_error(StatusCode::UNPROCESSABLE_ENTITY, body).kind,
            DriverErrorKind::ObjectNotFound
        );

        let body = r#"{"code":"390114","message":"Authentication token has expired."}"#;
        assert_eq!(
            parse_error(StatusCode::UNAUTHORIZED, body).kind,
            DriverErrorKind::SessionExpired
        );

        let body = r#"{"code":"000606","message":"Warehouse 'WH' is suspended."}"#;
        assert_eq!(
            parse_error(StatusCode::UNPROCESSABLE_ENTITY, body).kind,
            DriverErrorKind::WarehouseSuspended
        );
    }

    #[test]
    fn test_password_credentials_rejected() {
        let config = ConnectionConfig::with_password("acct", "user", "pw");
        let err = AuthToken::for_config(&config).err().unwrap();
        assert_eq!(err.kind, DriverErrorKind::Config);
    }

    #[test]
    fn test_oauth_token_never_expires_locally() {
        let config = ConnectionConfig::new(
            "acct",
            "user",
            Credential::OAuth {
                token: "tok".to_string(),
            },
        );
        let token = AuthToken::for_config(&config).unwrap();
        assert_eq!(token.token_type, "OAUTH");
        assert!(token.is_fresh());
    }

    #[test]
    fn test_key_pair_jwt_claims() {
        use jwt_simple::prelude::RSAPublicKeyLike;

        let key_pair = jwt::RS256KeyPair::generate(2048).unwrap();
        let pem = key_pair.to_pem().unwrap();
        let config = ConnectionConfig::new(
            "xy12345.eu-west-1",
            "etl_user",
            Credential::KeyPair {
                private_key: PrivateKey::Pem(pem),
                passphrase: None,
            },
        );

        let token = AuthToken::for_config(&config).unwrap();
        assert_eq!(token.token_type, "KEYPAIR_JWT");
        assert!(token.is_fresh());

        let claims = key_pair
            .public_key()
            .verify_token::<jwt::NoCustomClaims>(&token.token, None)
            .unwrap();
        assert_eq!(claims.subject.as_deref(), Some("XY12345.ETL_USER"));
        let issuer = claims.issuer.unwrap();
        assert!(issuer.starts_with("XY12345.ETL_USER.SHA256:"));
    }

    #[test]
    fn test_encrypted_key_rejected() {
        let config = ConnectionConfig::new(
            "acct",
            "user",
            Credential::KeyPair {
                private_key: PrivateKey::Pem("irrelevant".to_string()),
                passphrase: Some("secret".to_string()),
            },
        );
        let err = AuthToken::for_config(&config).err().unwrap();
        assert_eq!(err.kind, DriverErrorKind::Config);
    }

    fn oauth_config(authenticator: Option<&str>) -> ConnectionConfig {
        let mut config = ConnectionConfig::new(
            "acct",
            "user",
            Credential::OAuth {
                token: "tok".to_string(),
            },
        );
        config.authenticator = authenticator.map(str::to_string);
        config
    }

    #[test]
    fn test_authenticator_selects_token_type() {
        let token = AuthToken::for_config(&oauth_config(Some("OAUTH"))).unwrap();
        assert_eq!(token.token_type, "OAUTH");

        let token =
            AuthToken::for_config(&oauth_config(Some("programmatic_access_token"))).unwrap();
        assert_eq!(token.token_type, "PROGRAMMATIC_ACCESS_TOKEN");

        let err = AuthToken::for_config(&oauth_config(Some("externalbrowser")))
            .err()
            .unwrap();
        assert_eq!(err.kind, DriverErrorKind::Config);
        assert!(err.message.contains("externalbrowser"));
    }

    fn session(expires_at: SystemTime, refresh: Option<JwtSource>) -> SqlApiSession {
        SqlApiSession {
            client: Client::new(),
            base_url: "http://127.0.0.1:9".to_string(),
            token: Mutex::new(AuthToken {
                token: "stale".to_string(),
                token_type: "KEYPAIR_JWT",
                expires_at: Some(expires_at),
            }),
            refresh,
            database: None,
            schema: None,
            options: SessionOptions::default(),
            network_timeout: Duration::from_secs(1),
            statement_timeout: Duration::from_secs(1),
            expired: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    #[tokio::test]
    async fn test_keepalive_remints_expiring_jwt() {
        let pem = jwt::RS256KeyPair::generate(2048).unwrap().to_pem().unwrap();
        let source = JwtSource {
            account: "acct".to_string(),
            user: "user".to_string(),
            pem,
        };
        let session = session(SystemTime::now(), Some(source));

        assert!(session.is_alive().await);
        let token = session.current_token().await.unwrap();
        assert_ne!(token.token, "stale");
        assert!(token.is_fresh());
    }

    #[tokio::test]
    async fn test_expiring_jwt_without_keepalive_is_dead() {
        let fresh = session(SystemTime::now() + Duration::from_secs(3600), None);
        assert!(fresh.is_alive().await);

        let stale = session(SystemTime::now(), None);
        assert!(!stale.is_alive().await);
        assert_eq!(stale.current_token().await.unwrap().token, "stale");
    }

    #[test]
    fn test_statement_response_parses_partitions() {
        let body = r#"{
            "statementHandle": "01b2-abc",
            "resultSetMetaData": {
                "numRows": 3,
                "rowType": [{"name": "ID", "type": "fixed", "scale": 0}],
                "partitionInfo": [{"rowCount": 2}, {"rowCount": 1}]
            },
            "data": [["1"], ["2"]]
        }"#;
        let parsed: StatementResponse = serde_json::from_str(body).unwrap();
        let meta = parsed.result_set_meta_data.unwrap();
        assert_eq!(meta.partition_info.len(), 2);
        assert_eq!(meta.row_type[0].name, "ID");
        assert_eq!(parsed.data.len(), 2);
    }
}
