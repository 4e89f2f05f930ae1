//! Error types for snowlink.
//!
//! Defines the main error enum used throughout the library, plus the
//! driver-level error that carries the warehouse's own failure details.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main error type for snowlink operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration (no account, no credential, bad file, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The warehouse rejected the supplied credentials.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// A session could not be opened for reasons other than bad credentials.
    #[error("Connection error: {0}")]
    Connection(#[source] DriverError),

    /// Query execution failed, either immediately or after exhausting retries.
    #[error("Query error after {attempts} attempt(s) in {elapsed:?} [query {query_hash:.12}]: {source}")]
    Query {
        /// Hex digest of the SQL text and params.
        query_hash: String,
        /// Number of driver attempts made.
        attempts: u32,
        /// Wall time spent in the call, back-off included.
        elapsed: Duration,
        /// The last underlying failure.
        #[source]
        source: DriverError,
    },

    /// The admission limiter had no free permit and fail-fast was requested.
    #[error("Query admission refused: all {permits} permit(s) in use")]
    Busy {
        /// Configured permit count.
        permits: usize,
    },

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an authentication error with the given message.
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Creates a connection error from a network-level message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(DriverError::network(msg))
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "Configuration Error",
            Self::Auth(_) => "Authentication Error",
            Self::Connection(_) => "Connection Error",
            Self::Query { .. } => "Query Error",
            Self::Busy { .. } => "Busy",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns the number of driver attempts for query errors.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::Query { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Returns the underlying driver failure, if any.
    pub fn driver_error(&self) -> Option<&DriverError> {
        match self {
            Self::Query { source, .. } => Some(source),
            Self::Connection(source) => Some(source),
            _ => None,
        }
    }
}

/// Result type alias using snowlink's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong inside the driver, as far as retry decisions care.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Connection refused, reset, DNS failure, 5xx gateway errors.
    Network,
    /// Client or server side timeout.
    Timeout,
    /// Rate limited (HTTP 429 and friends).
    Throttled,
    /// The warehouse is suspended or resuming.
    WarehouseSuspended,
    /// Session or token expired; a fresh session is needed.
    SessionExpired,
    /// SQL compilation error.
    Syntax,
    /// Insufficient privileges.
    PermissionDenied,
    /// Referenced database object does not exist.
    ObjectNotFound,
    /// Credentials rejected.
    Auth,
    /// The driver cannot work with the supplied configuration.
    Config,
    /// Rejected before reaching the warehouse (empty SQL, parameter mismatch).
    InvalidRequest,
    /// Anything not recognised.
    Other,
}

impl DriverErrorKind {
    /// Short label used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Throttled => "throttled",
            Self::WarehouseSuspended => "warehouse suspended",
            Self::SessionExpired => "session expired",
            Self::Syntax => "syntax",
            Self::PermissionDenied => "permission denied",
            Self::ObjectNotFound => "object not found",
            Self::Auth => "authentication",
            Self::Config => "configuration",
            Self::InvalidRequest => "invalid request",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by a warehouse driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}{}", .code.as_deref().map(|c| format!(" (code {c})")).unwrap_or_default())]
pub struct DriverError {
    /// Classification hint supplied by the driver.
    pub kind: DriverErrorKind,
    /// Vendor error code, if the warehouse returned one.
    pub code: Option<String>,
    /// SQLSTATE, if the warehouse returned one.
    pub sql_state: Option<String>,
    /// Human readable message.
    pub message: String,
}

impl DriverError {
    /// Creates a driver error of the given kind.
    pub fn new(kind: DriverErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            sql_state: None,
            message: message.into(),
        }
    }

    /// Attaches a vendor error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attaches a SQLSTATE.
    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    /// Convenience constructor for network failures.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Network, message)
    }

    /// Convenience constructor for timeouts.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Timeout, message)
    }

    /// Convenience constructor for syntax errors.
    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Syntax, message)
    }

    /// Convenience constructor for rejected credentials.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::Auth, message)
    }

    /// Convenience constructor for requests rejected before execution.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(DriverErrorKind::InvalidRequest, message)
    }
}
