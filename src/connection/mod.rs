//! Connection management for snowlink.
//!
//! Centralizes the session lifecycle: lazy open, liveness probing and
//! replacement on staleness.

pub mod manager;

pub use manager::{ConnectionManager, ManagedConnection, Overrides};
