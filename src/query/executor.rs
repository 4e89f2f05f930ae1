//! Query execution with admission control and retry.
//!
//! Every call validates its parameters against the SQL placeholders, takes
//! an admission permit, then runs the attempt loop: connect, execute,
//! classify any failure and either back off and retry or give up.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::QueryKey;
use crate::config::ExecutorSettings;
use crate::connection::{ConnectionManager, Overrides};
use crate::db::{Params, QueryResult};
use crate::error::{DriverError, DriverErrorKind, Error, Result};
use crate::query::admission::{AdmissionLimiter, AdmissionMode};
use crate::query::classify::{classify, ErrorClass};
use crate::query::placeholders;
use crate::query::retry::{RetryDecision, RetryPolicy};

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Role/warehouse overrides for this call.
    pub overrides: Overrides,
    /// Admission behaviour; `None` uses the executor default.
    pub admission: Option<AdmissionMode>,
}

impl ExecuteOptions {
    /// Options with the given overrides.
    pub fn with_overrides(overrides: Overrides) -> Self {
        Self {
            overrides,
            admission: None,
        }
    }

    /// Fail with [`Error::Busy`] instead of waiting for a permit.
    pub fn fail_fast(mut self) -> Self {
        self.admission = Some(AdmissionMode::FailFast);
        self
    }
}

/// Runs statements against the managed connection.
#[derive(Clone)]
pub struct QueryExecutor {
    manager: Arc<ConnectionManager>,
    policy: RetryPolicy,
    limiter: AdmissionLimiter,
    default_admission: AdmissionMode,
}

impl QueryExecutor {
    /// Creates an executor with default retry and admission settings.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            policy: RetryPolicy::default(),
            limiter: AdmissionLimiter::default(),
            default_admission: AdmissionMode::default(),
        }
    }

    /// Creates an executor from `[snowlink]` settings, seeding unset retry
    /// fields from the connection config.
    pub fn from_settings(manager: Arc<ConnectionManager>, settings: &ExecutorSettings) -> Self {
        let policy = settings.retry_policy_for(manager.config());
        Self::new(manager)
            .with_retry_policy(policy)
            .with_max_concurrency(settings.max_concurrency)
            .with_admission_mode(settings.admission)
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_concurrency(mut self, permits: usize) -> Self {
        self.limiter = AdmissionLimiter::new(permits);
        self
    }

    pub fn with_admission_mode(mut self, mode: AdmissionMode) -> Self {
        self.default_admission = mode;
        self
    }

    /// The shared connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// The retry policy in effect.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// The admission limiter in effect.
    pub fn limiter(&self) -> &AdmissionLimiter {
        &self.limiter
    }

    /// Executes `sql` with `params` using the default options.
    pub async fn execute(&self, sql: &str, params: &Params) -> Result<QueryResult> {
        self.execute_with(sql, params, &ExecuteOptions::default())
            .await
    }

    /// Executes `sql` with `params`.
    ///
    /// The admission permit is held across every attempt of this call.
    pub async fn execute_with(
        &self,
        sql: &str,
        params: &Params,
        options: &ExecuteOptions,
    ) -> Result<QueryResult> {
        let start = Instant::now();
        let key = QueryKey::new(sql, params);

        if let Err(source) = validate_request(sql, params) {
            return Err(query_error(&key, 0, start, source));
        }

        let mode = options.admission.unwrap_or(self.default_admission);
        let _permit = self.limiter.acquire(mode).await?;

        let mut attempt: u32 = 0;
        loop {
            debug!(query = key.short(), attempt = attempt + 1, "Executing query");

            let (conn, failure) = match self.manager.connect(&options.overrides).await {
                Ok(conn) => match conn.execute(sql, params).await {
                    Ok(result) => {
                        info!(
                            query = key.short(),
                            attempts = attempt + 1,
                            rows = result.row_count,
                            elapsed_ms = start.elapsed().as_millis() as u64,
                            "Query succeeded"
                        );
                        return Ok(result);
                    }
                    Err(e) => (Some(conn), e),
                },
                Err(Error::Connection(e)) => (None, e),
                Err(other) => return Err(other),
            };

            if failure.kind == DriverErrorKind::Auth {
                return Err(Error::auth(failure.message));
            }

            let class = classify(&failure);
            if class == ErrorClass::Reconnect {
                if let Some(conn) = &conn {
                    self.manager.invalidate_handle(conn).await;
                }
            }

            match self.policy.decide(attempt, class) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        query = key.short(),
                        attempt = attempt + 1,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient failure, retrying: {failure}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp => {
                    return Err(query_error(&key, attempt + 1, start, failure));
                }
            }
        }
    }
}

fn query_error(key: &QueryKey, attempts: u32, start: Instant, source: DriverError) -> Error {
    Error::Query {
        query_hash: key.as_str().to_string(),
        attempts,
        elapsed: start.elapsed(),
        source,
    }
}

/// Checks the SQL is non-empty and `params` agree with its placeholders.
fn validate_request(sql: &str, params: &Params) -> std::result::Result<(), DriverError> {
    if sql.trim().is_empty() {
        return Err(DriverError::invalid_request("SQL text is empty"));
    }

    let found = placeholders::scan(sql);
    let positional = placeholders::positional_count(&found);
    let named = placeholders::named(&found);

    if positional > 0 && !named.is_empty() {
        return Err(DriverError::invalid_request(
            "SQL mixes positional (?) and named (:name) placeholders",
        ));
    }

    match params {
        Params::None if found.is_empty() => Ok(()),
        Params::None => Err(DriverError::invalid_request(format!(
            "SQL has {} placeholder(s) but no parameters were given",
            found.len()
        ))),
        Params::Positional(_) if !named.is_empty() => Err(DriverError::invalid_request(
            "SQL uses named placeholders but positional parameters were given",
        )),
        Params::Positional(values) if values.len() != positional => {
            Err(DriverError::invalid_request(format!(
                "SQL has {} positional placeholder(s) but {} parameter(s) were given",
                positional,
                values.len()
            )))
        }
        Params::Positional(_) => Ok(()),
        Params::Named(_) if positional > 0 => Err(DriverError::invalid_request(
            "SQL uses positional placeholders but named parameters were given",
        )),
        Params::Named(values) => {
            if let Some(missing) = named.iter().find(|name| !values.contains_key(**name)) {
                return Err(DriverError::invalid_request(format!(
                    "No value given for placeholder ':{missing}'"
                )));
            }
            if let Some(unused) = values.keys().find(|key| !named.contains(&key.as_str())) {
                return Err(DriverError::invalid_request(format!(
                    "Parameter '{unused}' does not match any placeholder"
                )));
            }
            Ok(())
        }
    }
}
