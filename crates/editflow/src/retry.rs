//! Retry policies shared by pipeline stages and infrastructure calls.

use std::time::Duration;

/// How often to re-invoke a failed operation and how long to wait between
/// attempts.
///
/// `max_retries` counts re-invocations after the first attempt, so a policy
/// with `max_retries = 2` runs the operation at most three times. The wait
/// before retry `n` (1-based) is `min(delay * backoff^(n-1), max_delay)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub backoff: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Run once, never retry.
    pub const NONE: RetryPolicy = RetryPolicy {
        max_retries: 0,
        delay: Duration::ZERO,
        backoff: 1.0,
        max_delay: Duration::ZERO,
    };

    /// Fixed delay between attempts.
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff: 1.0,
            max_delay: delay,
        }
    }

    pub fn with_backoff(mut self, backoff: f64, max_delay: Duration) -> Self {
        self.backoff = backoff;
        self.max_delay = max_delay;
        self
    }

    /// Total number of attempts, first one included.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before the given retry (1 for the first retry).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.delay.as_nanos() as f64 * self.backoff.powi(exponent);
        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.max(0.0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::fixed(3, Duration::from_millis(100))
            .with_backoff(2.0, Duration::from_secs(2))
    }
}
