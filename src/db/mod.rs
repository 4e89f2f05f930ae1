//! Warehouse driver abstraction for snowlink.
//!
//! The connection manager and query executor are written entirely against
//! these traits. [`SqlApiDriver`] talks to Snowflake's SQL REST API;
//! [`MockDriver`] is a scripted, instrumented stand-in for tests and dry runs.

mod mock;
mod sqlapi;
mod types;

pub use mock::{MockDriver, RecordedCall};
pub use sqlapi::SqlApiDriver;
pub use types::{ColumnInfo, Params, QueryResult, Row, Value};

use crate::config::ConnectionConfig;
use crate::error::DriverError;
use async_trait::async_trait;

/// Result type for driver operations.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Per-session settings that may differ from the config defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Effective role for the session.
    pub role: Option<String>,
    /// Effective warehouse for the session.
    pub warehouse: Option<String>,
}

/// Opens authenticated sessions against a warehouse.
#[async_trait]
pub trait WarehouseDriver: Send + Sync {
    /// Authenticates and opens a new session.
    async fn open_session(
        &self,
        config: &ConnectionConfig,
        options: &SessionOptions,
    ) -> DriverResult<Box<dyn Session>>;

    /// Short driver name for logs.
    fn name(&self) -> &'static str;
}

/// One authenticated session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Liveness probe. Must be cheap; called before every reuse.
    async fn is_alive(&self) -> bool;

    /// Executes a statement with bound parameters.
    ///
    /// `params` are always passed to the warehouse as binds, never spliced
    /// into `sql`.
    async fn execute(&self, sql: &str, params: &Params) -> DriverResult<QueryResult>;

    /// Closes the session.
    async fn close(&self) -> DriverResult<()>;
}
