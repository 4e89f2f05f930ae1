//! Retry policy with exponential back-off.
//!
//! The policy is a pure function from (failed attempt, classification) to a
//! decision, so it can be exercised without a driver or a clock.

use super::classify::ErrorClass;
use std::time::Duration;

/// Default number of attempts, the first one included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default cap on a single back-off delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

/// Bounded exponential back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts allowed, at least 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then try again.
    Retry { delay: Duration },
    /// Surface the failure.
    GiveUp,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl RetryPolicy {
    /// Creates a policy. `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after the failed attempt with zero-based index `attempt`:
    /// `min(base * 2^attempt, max_delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_delay)
    }

    /// Decides whether the failed attempt `attempt` (zero-based) is retried.
    pub fn decide(&self, attempt: u32, class: ErrorClass) -> RetryDecision {
        if !class.is_retryable() || attempt.saturating_add(1) >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::Retry {
            delay: self.backoff(attempt),
        }
    }
}
