//! Transient vs fatal classification of driver failures.

use crate::error::{DriverError, DriverErrorKind};

/// How the executor should treat a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Likely to succeed on retry with the same session.
    Transient,
    /// Likely to succeed on retry once the cached session is replaced.
    Reconnect,
    /// Retrying will not change the outcome.
    Fatal,
}

impl ErrorClass {
    /// Returns true for classes eligible for another attempt.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Fatal)
    }
}

/// Classifies a driver failure.
///
/// Network trouble, timeouts, throttling and suspended warehouses are
/// transient. An expired session is transient but needs a fresh session.
/// Everything else, including unrecognised failures, is fatal.
pub fn classify(error: &DriverError) -> ErrorClass {
    match error.kind {
        DriverErrorKind::Network
        | DriverErrorKind::Timeout
        | DriverErrorKind::Throttled
        | DriverErrorKind::WarehouseSuspended => ErrorClass::Transient,
        DriverErrorKind::SessionExpired => ErrorClass::Reconnect,
        DriverErrorKind::Syntax
        | DriverErrorKind::PermissionDenied
        | DriverErrorKind::ObjectNotFound
        | DriverErrorKind::Auth
        | DriverErrorKind::Config
        | DriverErrorKind::InvalidRequest
        | DriverErrorKind::Other => ErrorClass::Fatal,
    }
}
