//! Query executor integration tests.
//!
//! Covers parameter passing, retry timing, fatal failures and admission
//! serialization against the mock driver.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use snowlink::cache::{CachedReader, InMemoryMemo, ReadOptions};
use snowlink::config::ConnectionConfig;
use snowlink::connection::ConnectionManager;
use snowlink::db::{MockDriver, Params, Value};
use snowlink::error::{DriverError, DriverErrorKind, Error};
use snowlink::query::{QueryExecutor, RetryPolicy};
use tokio::time::Instant;

const BASE: Duration = Duration::from_millis(100);

fn executor(driver: &MockDriver) -> QueryExecutor {
    let manager = Arc::new(ConnectionManager::new(
        ConnectionConfig::with_password("acct", "user", "pw"),
        Arc::new(driver.clone()),
    ));
    QueryExecutor::new(manager).with_retry_policy(RetryPolicy::new(
        3,
        BASE,
        Duration::from_secs(10),
    ))
}

#[tokio::test]
async fn test_params_reach_driver_unmodified() {
    let driver = MockDriver::new();
    let sql = "SELECT * FROM users WHERE name = ? AND note = ? -- don't touch";
    let params = Params::positional([
        Value::from("O'Brien'; DROP TABLE users; --"),
        Value::from("a \"quoted\" SELECT value"),
    ]);

    executor(&driver).execute(sql, &params).await.unwrap();

    let calls = driver.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].sql, sql);
    assert_eq!(calls[0].params, params);
}

#[tokio::test]
async fn test_named_params_reach_driver_unmodified() {
    let driver = MockDriver::new();
    let sql = "SELECT * FROM events WHERE id = :id AND payload:kind::string = :kind";
    let params = Params::named([("id", Value::Int(7)), ("kind", Value::from("click"))]);

    executor(&driver).execute(sql, &params).await.unwrap();

    assert_eq!(driver.calls()[0].sql, sql);
    assert_eq!(driver.calls()[0].params, params);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_back_off_then_succeed() {
    let driver = MockDriver::new();
    driver.push_error(DriverError::network("connection reset by peer"));
    driver.push_error(DriverError::new(DriverErrorKind::Throttled, "too many requests"));

    let start = Instant::now();
    let result = executor(&driver).execute("SELECT 1", &Params::None).await;

    assert!(result.is_ok());
    assert!(start.elapsed() >= BASE + BASE * 2, "elapsed {:?}", start.elapsed());
    assert_eq!(driver.calls().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failure_is_not_retried() {
    let driver = MockDriver::new();
    driver.push_error(
        DriverError::syntax("SQL compilation error: unexpected 'FORM'")
            .with_code("001003")
            .with_sql_state("42000"),
    );

    let start = Instant::now();
    let err = executor(&driver)
        .execute("SELECT * FORM t", &Params::None)
        .await
        .unwrap_err();

    match &err {
        Error::Query {
            attempts, source, ..
        } => {
            assert_eq!(*attempts, 1);
            assert_eq!(source.kind, DriverErrorKind::Syntax);
            assert_eq!(source.code.as_deref(), Some("001003"));
        }
        other => panic!("expected query error, got {other:?}"),
    }
    assert!(start.elapsed() < BASE);
    assert_eq!(driver.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_permit_serializes_driver_calls() {
    let driver = MockDriver::new();
    driver.set_execute_delay(Duration::from_millis(50));
    let executor = executor(&driver);

    let a = executor.clone();
    let b = executor.clone();
    let (ra, rb) = tokio::join!(
        async move { a.execute("SELECT 'a'", &Params::None).await },
        async move { b.execute("SELECT 'b'", &Params::None).await },
    );
    assert!(ra.is_ok() && rb.is_ok());

    let mut calls = driver.calls();
    calls.sort_by_key(|c| c.started);
    assert_eq!(calls.len(), 2);
    assert!(calls[0].finished <= calls[1].started);
    assert_eq!(driver.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_more_permits_allow_overlap() {
    let driver = MockDriver::new();
    driver.set_execute_delay(Duration::from_millis(50));
    let executor = executor(&driver).with_max_concurrency(2);

    let a = executor.clone();
    let b = executor.clone();
    let (ra, rb) = tokio::join!(
        async move { a.execute("SELECT 'a'", &Params::None).await },
        async move { b.execute("SELECT 'b'", &Params::None).await },
    );
    assert!(ra.is_ok() && rb.is_ok());
    assert_eq!(driver.max_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_permit_held_across_retries() {
    let driver = MockDriver::new();
    driver.push_error(DriverError::timeout("statement timed out"));
    let executor = executor(&driver);

    let a = executor.clone();
    let b = executor.clone();
    let (ra, rb) = tokio::join!(
        async move { a.execute("SELECT 'first'", &Params::None).await },
        async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            b.execute("SELECT 'second'", &Params::None).await
        },
    );
    assert!(ra.is_ok() && rb.is_ok());

    let sql: Vec<String> = driver.calls().into_iter().map(|c| c.sql).collect();
    assert_eq!(sql, vec!["SELECT 'first'", "SELECT 'first'", "SELECT 'second'"]);
}

#[tokio::test]
async fn test_reader_memoizes_per_params() {
    let driver = MockDriver::new();
    let reader = CachedReader::new(executor(&driver), Arc::new(InMemoryMemo::new()));
    let options = ReadOptions::with_ttl(Duration::from_secs(60));

    for id in [1, 2, 1, 2] {
        reader
            .read("SELECT * FROM t WHERE id = ?", &Params::positional([id]), &options)
            .await
            .unwrap();
    }
    assert_eq!(driver.calls().len(), 2);
}
