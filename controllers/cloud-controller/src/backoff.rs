//! # Backoff
//!
//! Two backoff mechanisms are used by the controller:
//!
//! - [`FibonacciBackoff`] paces requeues of a Service or Node whose
//!   reconciliation keeps failing. It grows more slowly than exponential
//!   backoff so a misconfigured Service does not disappear for long.
//! - [`RetryPolicy`] bounds in-place retries of a single cloud API call
//!   (throttling, conflicts, 5xx) with exponential backoff.

use osc_client::OscError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Fibonacci backoff calculator for requeues
///
/// Sequence with `new(5, 300)`: 5s, 5s, 10s, 15s, 25s, 40s, 65s, 105s, 170s,
/// 275s, 300s (max).
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff bounded by `min_seconds` and `max_seconds`
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }
}

/// Bounded exponential retry for a single cloud API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first call
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5)
    }
}

impl RetryPolicy {
    /// 500ms, 1s, 2s, ... capped at 10s
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }

    /// Policy without sleeps, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based: the delay after the first failure is `delay_for_attempt(1)`)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Last error of a call that could not be completed
#[derive(Debug)]
pub struct RetryFailure {
    pub error: OscError,
    pub attempts: u32,
}

/// Run `call` until it succeeds, fails with a non-transient error, or the
/// policy runs out of attempts.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, OscError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation, attempt, policy.max_attempts, error, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => {
                return Err(RetryFailure {
                    error,
                    attempts: attempt,
                });
            }
        }
    }
}
