//! Deadline budgets for connect, read, write and whole-operation phases.

use std::time::Duration;

/// Per-phase timeout budgets. An unset budget disables the corresponding
/// deadline check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutConfig {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub write: Option<Duration>,
    pub operation: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: Some(Duration::from_millis(5_000)),
            read: Some(Duration::from_millis(30_000)),
            write: Some(Duration::from_millis(10_000)),
            operation: Some(Duration::from_millis(60_000)),
        }
    }
}

impl TimeoutConfig {
    /// Tight budgets for latency-sensitive callers.
    pub fn fast() -> Self {
        Self {
            connect: Some(Duration::from_millis(1_000)),
            read: Some(Duration::from_millis(5_000)),
            write: Some(Duration::from_millis(2_000)),
            operation: Some(Duration::from_millis(10_000)),
        }
    }

    /// Disable every deadline check.
    pub fn no_timeout() -> Self {
        Self {
            connect: None,
            read: None,
            write: None,
            operation: None,
        }
    }
}
