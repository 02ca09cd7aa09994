//! Retry policy for transient send failures.
//!
//! A single unit gets a fixed small number of attempts with a short fixed
//! backoff; exhausting them converts the transient error into a permanent
//! unit failure that is recorded and skipped past, never fatal to the worker.

use std::time::Duration;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Stop retrying; the unit is a permanent failure.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Fixed-bound, fixed-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts per unit (including the first).
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Decide what to do after a failed attempt. `attempt` is 1-based
    /// (1 = the first attempt just failed).
    pub fn decide(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::NoRetry
        } else {
            RetryDecision::RetryAfter(self.backoff)
        }
    }
}
