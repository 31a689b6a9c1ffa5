//! Retry policy for failed job attempts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff policy.
///
/// Pure decision logic with no state beyond its configuration. The
/// delay for attempt `n` is `base_delay * multiplier^(n-1)`, capped at
/// `max_delay`. No jitter is applied; under many simultaneously failing
/// jobs the retries land together (accepted limitation, the surrounding
/// application adds jitter if it needs it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Initial delay in milliseconds.
    pub base_delay_ms: u64,

    /// Backoff multiplier.
    pub multiplier: f64,

    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,

    /// Default retry ceiling for jobs submitted without one.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 3_600_000,
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default 1s/2x/1h shape and the given
    /// retry ceiling.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Sets the initial delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Returns true if another attempt is allowed after `attempt_count`
    /// executions against the given ceiling.
    pub fn should_retry(&self, attempt_count: u32, max_retries: u32) -> bool {
        attempt_count <= max_retries
    }

    /// Backoff before the attempt following attempt `attempt_count`.
    pub fn next_delay(&self, attempt_count: u32) -> Duration {
        if attempt_count == 0 {
            return Duration::ZERO;
        }

        let exp = (attempt_count - 1).min(63);
        let delay = self.base_delay_ms as f64 * self.multiplier.powi(exp as i32);
        let capped = if delay.is_finite() {
            (delay as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };

        Duration::from_millis(capped)
    }
}
