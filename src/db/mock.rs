//! Mock warehouse driver for testing.
//!
//! Sessions are in-memory. Responses can be scripted per call, sessions can
//! be killed to fail their liveness probe, and every driver call is recorded
//! with its start and end time so tests can check parameter passing and
//! concurrency.

use super::{
    ColumnInfo, DriverResult, Params, QueryResult, Session, SessionOptions, Value,
    WarehouseDriver,
};
use crate::config::ConnectionConfig;
use crate::error::DriverError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// One call that reached the mock driver.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Session the call ran on.
    pub session_id: u64,
    /// SQL text exactly as received.
    pub sql: String,
    /// Params exactly as received.
    pub params: Params,
    /// Session role.
    pub role: Option<String>,
    /// Session warehouse.
    pub warehouse: Option<String>,
    /// When the call entered the driver.
    pub started: Instant,
    /// When the call left the driver.
    pub finished: Instant,
}

#[derive(Debug, Default)]
struct MockState {
    opens: AtomicUsize,
    closes: AtomicUsize,
    next_session_id: AtomicU64,
    sessions: Mutex<Vec<Arc<AtomicBool>>>,
    open_errors: Mutex<VecDeque<DriverError>>,
    responses: Mutex<VecDeque<DriverResult<QueryResult>>>,
    default_result: Mutex<Option<QueryResult>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A scripted in-memory driver. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<MockState>,
}

impl MockDriver {
    /// Creates a mock driver with no scripted behaviour.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `open_session` call fail with `error`.
    pub fn push_open_error(&self, error: DriverError) {
        lock(&self.state.open_errors).push_back(error);
    }

    /// Queues a response for the next `execute` call.
    pub fn push_response(&self, response: DriverResult<QueryResult>) {
        lock(&self.state.responses).push_back(response);
    }

    /// Queues a failure for the next `execute` call.
    pub fn push_error(&self, error: DriverError) {
        self.push_response(Err(error));
    }

    /// Result returned when nothing is queued.
    pub fn set_default_result(&self, result: QueryResult) {
        *lock(&self.state.default_result) = Some(result);
    }

    /// Simulated time spent inside each `execute` call.
    pub fn set_execute_delay(&self, delay: Duration) {
        *lock(&self.state.delay) = delay;
    }

    /// Makes every session opened so far fail its liveness probe.
    pub fn kill_sessions(&self) {
        for alive in lock(&self.state.sessions).iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    /// Number of `open_session` calls, failed ones included.
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Number of sessions closed.
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Every `execute` call seen so far.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.state.calls).clone()
    }

    /// Highest number of simultaneous `execute` calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WarehouseDriver for MockDriver {
    async fn open_session(
        &self,
        _config: &ConnectionConfig,
        options: &SessionOptions,
    ) -> DriverResult<Box<dyn Session>> {
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.state.open_errors).pop_front() {
            return Err(error);
        }

        let id = self.state.next_session_id.fetch_add(1, Ordering::SeqCst) + 1;
        let alive = Arc::new(AtomicBool::new(true));
        lock(&self.state.sessions).push(alive.clone());

        Ok(Box::new(MockSession {
            id,
            alive,
            options: options.clone(),
            state: self.state.clone(),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockSession {
    id: u64,
    alive: Arc<AtomicBool>,
    options: SessionOptions,
    state: Arc<MockState>,
}

impl MockSession {
    fn next_response(&self, sql: &str) -> DriverResult<QueryResult> {
        if let Some(response) = lock(&self.state.responses).pop_front() {
            return response;
        }
        if let Some(result) = lock(&self.state.default_result).clone() {
            return Ok(result);
        }
        Ok(canned_result(sql))
    }
}

#[async_trait]
impl Session for MockSession {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn execute(&self, sql: &str, params: &Params) -> DriverResult<QueryResult> {
        let started = Instant::now();
        let now_in_flight = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state
            .max_in_flight
            .fetch_max(now_in_flight, Ordering::SeqCst);

        let delay = *lock(&self.state.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let response = if self.alive.load(Ordering::SeqCst) {
            self.next_response(sql)
        } else {
            Err(DriverError::new(
                crate::error::DriverErrorKind::SessionExpired,
                "Session no longer exists",
            )
            .with_code("390111"))
        };

        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        lock(&self.state.calls).push(RecordedCall {
            session_id: self.id,
            sql: sql.to_string(),
            params: params.clone(),
            role: self.options.role.clone(),
            warehouse: self.options.warehouse.clone(),
            started,
            finished: Instant::now(),
        });

        response
    }

    async fn close(&self) -> DriverResult<()> {
        self.alive.store(false, Ordering::SeqCst);
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Plausible results for unscripted statements.
fn canned_result(sql: &str) -> QueryResult {
    let upper = sql.trim_start().to_uppercase();

    if upper.starts_with("SHOW") {
        QueryResult::with_data(
            vec![
                ColumnInfo::new("created_on", "TIMESTAMP_LTZ"),
                ColumnInfo::new("name", "TEXT"),
            ],
            vec![vec![Value::Null, Value::from("MOCK")]],
        )
    } else if upper.starts_with("DESC") {
        QueryResult::with_data(
            vec![
                ColumnInfo::new("name", "TEXT"),
                ColumnInfo::new("type", "TEXT"),
                ColumnInfo::new("null?", "TEXT"),
            ],
            vec![
                vec![Value::from("ID"), Value::from("NUMBER(38,0)"), Value::from("N")],
                vec![Value::from("NAME"), Value::from("VARCHAR(16777216)"), Value::from("Y")],
            ],
        )
    } else if upper.starts_with("SELECT") || upper.starts_with("WITH") {
        QueryResult::with_data(
            vec![ColumnInfo::new("result", "TEXT")],
            vec![vec![Value::String(format!("Mock result for: {}", sql))]],
        )
    } else {
        QueryResult::new()
    }
}
