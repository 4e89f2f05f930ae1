//! snowlink - cached, self-healing Snowflake connections.
//!
//! One process-scoped [`ConnectionManager`](connection::ConnectionManager)
//! keeps a live session, a [`QueryExecutor`](query::QueryExecutor) runs
//! statements through it with admission limiting and bounded retry, and a
//! [`CachedReader`](cache::CachedReader) memoizes read results. The
//! [`Client`](client::Client) facade ties them together.

pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod helpers;
pub mod logging;
pub mod query;
pub mod secrets;
