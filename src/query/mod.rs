//! Query execution for snowlink.
//!
//! Placeholder validation, failure classification, retry policy and
//! admission limiting, tied together by [`QueryExecutor`].

pub mod admission;
pub mod classify;
pub mod executor;
pub mod placeholders;
pub mod retry;

pub use admission::{AdmissionLimiter, AdmissionMode, AdmissionPermit};
pub use classify::{classify, ErrorClass};
pub use executor::{ExecuteOptions, QueryExecutor};
pub use retry::{RetryDecision, RetryPolicy};
