//! Connection manager integration tests.
//!
//! Tests handle reuse, reconnection after staleness and concurrent access.

use std::sync::Arc;

use snowlink::config::ConnectionConfig;
use snowlink::connection::{ConnectionManager, Overrides};
use snowlink::db::MockDriver;
use snowlink::error::{DriverError, Error};

fn manager(driver: &MockDriver) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        ConnectionConfig::with_password("acct", "user", "pw"),
        Arc::new(driver.clone()),
    ))
}

#[tokio::test]
async fn test_repeated_connect_returns_same_handle() {
    let driver = MockDriver::new();
    let manager = manager(&driver);

    let first = manager.connect(&Overrides::default()).await.unwrap();
    for _ in 0..5 {
        let again = manager.connect(&Overrides::default()).await.unwrap();
        assert_eq!(again.id(), first.id());
    }
    assert_eq!(driver.open_count(), 1);
}

#[tokio::test]
async fn test_failed_probe_opens_exactly_one_new_session() {
    let driver = MockDriver::new();
    let manager = manager(&driver);

    let first = manager.connect(&Overrides::default()).await.unwrap();
    driver.kill_sessions();

    let second = manager.connect(&Overrides::default()).await.unwrap();
    assert_ne!(second.id(), first.id());
    assert_eq!(driver.open_count(), 2);

    let third = manager.connect(&Overrides::default()).await.unwrap();
    assert_eq!(third.id(), second.id());
    assert_eq!(driver.open_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_connects_share_one_session() {
    let driver = MockDriver::new();
    let manager = manager(&driver);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect(&Overrides::default()).await.unwrap().id() })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(driver.open_count(), 1);
}

#[tokio::test]
async fn test_auth_rejection_surfaces_without_caching() {
    let driver = MockDriver::new();
    driver.push_open_error(DriverError::auth("JWT token is invalid"));
    let manager = manager(&driver);

    let err = manager.connect(&Overrides::default()).await.unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");
    assert!(manager.current().await.is_none());

    // The next attempt is a fresh open, not a cached failure.
    manager.connect(&Overrides::default()).await.unwrap();
    assert_eq!(driver.open_count(), 2);
}

#[tokio::test]
async fn test_invalidate_forces_reopen() {
    let driver = MockDriver::new();
    let manager = manager(&driver);

    let first = manager.connect(&Overrides::default()).await.unwrap();
    manager.invalidate().await;
    let second = manager.connect(&Overrides::default()).await.unwrap();

    assert_ne!(first.id(), second.id());
    assert!(!first.is_alive().await);
}
