//! Query admission limiting.
//!
//! A counting permit bounds how many queries are inside the driver at once.
//! Waiters are served in FIFO order.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::debug;

/// Default number of concurrent in-flight queries.
pub const DEFAULT_PERMITS: usize = 1;

/// What a caller does when no permit is free.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Wait for a permit.
    #[default]
    Block,
    /// Fail immediately with [`Error::Busy`].
    FailFast,
}

/// Counting admission limiter.
#[derive(Debug, Clone)]
pub struct AdmissionLimiter {
    semaphore: Arc<Semaphore>,
    permits: usize,
}

/// Held while a query is admitted; dropping it frees the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}

impl Default for AdmissionLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_PERMITS)
    }
}

impl AdmissionLimiter {
    /// Creates a limiter with `permits` slots (at least 1).
    pub fn new(permits: usize) -> Self {
        let permits = permits.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            permits,
        }
    }

    /// Configured number of slots.
    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Currently free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquires a slot according to `mode`.
    pub async fn acquire(&self, mode: AdmissionMode) -> Result<AdmissionPermit> {
        let permit = match mode {
            AdmissionMode::Block => {
                if self.semaphore.available_permits() == 0 {
                    debug!("Waiting for query admission permit");
                }
                self.semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::internal("admission limiter closed"))?
            }
            AdmissionMode::FailFast => match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(TryAcquireError::NoPermits) => {
                    return Err(Error::Busy {
                        permits: self.permits,
                    })
                }
                Err(TryAcquireError::Closed) => {
                    return Err(Error::internal("admission limiter closed"))
                }
            },
        };
        Ok(AdmissionPermit { _permit: permit })
    }
}
