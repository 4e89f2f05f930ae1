//! Connection manager: one cached, self-healing warehouse session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{ConnectionConfig, Credential, PrivateKey};
use crate::db::{DriverResult, Params, QueryResult, Session, SessionOptions, WarehouseDriver};
use crate::error::{DriverError, DriverErrorKind, Error, Result};

/// Per-call role/warehouse overrides. Unset fields fall back to the config.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub role: Option<String>,
    pub warehouse: Option<String>,
}

impl Overrides {
    /// Overrides only the role.
    pub fn role(role: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            warehouse: None,
        }
    }

    /// Overrides only the warehouse.
    pub fn warehouse(warehouse: impl Into<String>) -> Self {
        Self {
            role: None,
            warehouse: Some(warehouse.into()),
        }
    }

    /// Returns true when nothing is overridden.
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.warehouse.is_none()
    }
}

/// A live driver session plus its metadata.
pub struct ManagedConnection {
    id: u64,
    session: Box<dyn Session>,
    created_at: Instant,
    options: SessionOptions,
    config: Arc<ConnectionConfig>,
}

impl std::fmt::Debug for ManagedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ManagedConnection {
    /// Handle identity, unique within one manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the session was opened.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Time since the session was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Effective role of the session.
    pub fn role(&self) -> Option<&str> {
        self.options.role.as_deref()
    }

    /// Effective warehouse of the session.
    pub fn warehouse(&self) -> Option<&str> {
        self.options.warehouse.as_deref()
    }

    /// The config the session was opened with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Probes the session. Never cached.
    pub async fn is_alive(&self) -> bool {
        self.session.is_alive().await
    }

    /// Executes a statement on this session.
    pub async fn execute(&self, sql: &str, params: &Params) -> DriverResult<QueryResult> {
        let start = Instant::now();
        let result = self.session.execute(sql, params).await;
        debug!(
            connection = self.id,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Driver call finished"
        );
        result
    }

    /// Closes the underlying session.
    pub async fn close(&self) -> DriverResult<()> {
        self.session.close().await
    }

    fn serves(&self, options: &SessionOptions) -> bool {
        &self.options == options
    }
}

/// Holds at most one authoritative connection and replaces it on staleness.
///
/// The check-then-replace sequence runs under one async mutex, so concurrent
/// callers never receive two different "current" handles.
pub struct ConnectionManager {
    driver: Arc<dyn WarehouseDriver>,
    config: Arc<ConnectionConfig>,
    active: Mutex<Option<Arc<ManagedConnection>>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    /// Creates a manager. No session is opened until the first `connect`.
    pub fn new(config: ConnectionConfig, driver: Arc<dyn WarehouseDriver>) -> Self {
        Self {
            driver,
            config: Arc::new(config),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// The resolved configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Name of the underlying driver.
    pub fn driver_name(&self) -> &'static str {
        self.driver.name()
    }

    /// Returns a live connection, reusing the cached one when it passes its
    /// liveness probe and serves the requested role/warehouse.
    pub async fn connect(&self, overrides: &Overrides) -> Result<Arc<ManagedConnection>> {
        validate(&self.config)?;
        let options = self.session_options(overrides);

        let mut active = self.active.lock().await;

        if let Some(conn) = active.as_ref() {
            if !conn.serves(&options) {
                info!(
                    connection = conn.id,
                    "Role/warehouse changed; replacing cached connection"
                );
            } else if conn.is_alive().await {
                debug!(connection = conn.id, "Reusing cached connection");
                return Ok(conn.clone());
            } else {
                info!(
                    connection = conn.id,
                    "Cached connection failed liveness probe; reconnecting"
                );
            }
        }

        let fresh = Arc::new(self.open(options).await?);

        if let Some(old) = active.replace(fresh.clone()) {
            if let Err(e) = old.close().await {
                warn!(connection = old.id, "Failed to close superseded connection: {e}");
            }
        }

        Ok(fresh)
    }

    /// Returns the cached connection without probing it.
    pub async fn current(&self) -> Option<Arc<ManagedConnection>> {
        self.active.lock().await.clone()
    }

    /// Drops the cached connection so the next `connect` opens a new one.
    pub async fn invalidate(&self) {
        if let Some(old) = self.active.lock().await.take() {
            debug!(connection = old.id, "Invalidated cached connection");
            let _ = old.close().await;
        }
    }

    /// Drops the cached connection only if it is still `conn`.
    ///
    /// Used after a session-expired failure so a handle another caller has
    /// already replaced is left alone.
    pub async fn invalidate_handle(&self, conn: &ManagedConnection) {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|c| c.id == conn.id) {
            if let Some(old) = active.take() {
                debug!(connection = old.id, "Invalidated expired connection");
                let _ = old.close().await;
            }
        }
    }

    /// Closes the cached connection, if any.
    pub async fn close(&self) -> Result<()> {
        if let Some(conn) = self.active.lock().await.take() {
            conn.close().await.map_err(map_open_error)?;
        }
        Ok(())
    }

    fn session_options(&self, overrides: &Overrides) -> SessionOptions {
        SessionOptions {
            role: overrides.role.clone().or_else(|| self.config.role.clone()),
            warehouse: overrides
                .warehouse
                .clone()
                .or_else(|| self.config.warehouse.clone()),
        }
    }

    async fn open(&self, options: SessionOptions) -> Result<ManagedConnection> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(
            connection = id,
            driver = self.driver.name(),
            "Opening session for {}",
            self.config.display_string()
        );

        let session = self
            .driver
            .open_session(&self.config, &options)
            .await
            .map_err(map_open_error)?;

        info!(
            connection = id,
            role = options.role.as_deref().unwrap_or("-"),
            warehouse = options.warehouse.as_deref().unwrap_or("-"),
            "Opened new warehouse session"
        );

        Ok(ManagedConnection {
            id,
            session,
            created_at: Instant::now(),
            options,
            config: self.config.clone(),
        })
    }
}

fn validate(config: &ConnectionConfig) -> Result<()> {
    if config.account.trim().is_empty() {
        return Err(Error::config("account is required"));
    }
    if config.user.trim().is_empty() {
        return Err(Error::config("user is required"));
    }
    let complete = match &config.credential {
        Credential::Password { password } => !password.is_empty(),
        Credential::OAuth { token } => !token.trim().is_empty(),
        Credential::KeyPair { private_key, .. } => match private_key {
            PrivateKey::Pem(pem) => !pem.trim().is_empty(),
            PrivateKey::File(path) => !path.as_os_str().is_empty(),
        },
    };
    if !complete {
        return Err(Error::config(format!(
            "{} authentication requires a non-empty credential",
            config.credential.auth_type()
        )));
    }
    Ok(())
}

fn map_open_error(error: DriverError) -> Error {
    match error.kind {
        DriverErrorKind::Auth => Error::auth(error.message),
        DriverErrorKind::Config => Error::config(error.message),
        _ => Error::Connection(error),
    }
}
