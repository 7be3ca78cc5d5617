//! Retry policy: attempt budget plus capped exponential backoff.

use std::time::Duration;

/// Backoff configuration for the resilient wrapper. Retryability itself is
/// a property of the error (`Error::is_retryable`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt. Attempt 0 is the first try and
    /// carries no delay; later attempts grow geometrically up to the cap,
    /// floored to whole milliseconds.
    pub fn calculate_backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.powi(attempt as i32 - 1);
        let ms = (self.initial_backoff_ms as f64 * factor) as u64;
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}
