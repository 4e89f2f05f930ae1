//! Integration tests for snowlink.

pub mod config_test;
pub mod connection_test;
pub mod executor_test;
pub mod sqlapi_test;
