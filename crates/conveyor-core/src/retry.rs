//! Retry policy with capped exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-task retry behaviour, templated at the workflow level.
///
/// The delay before the n-th retry is
/// `min(max_delay, initial_delay * backoff_factor^n)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Multiplier applied per retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `n` (zero-based).
    ///
    /// `delay_for(0)` is exactly `initial_delay`; the result never exceeds
    /// `max_delay`.
    pub fn delay_for(&self, n: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let secs = self.initial_delay.as_secs_f64() * factor.powi(n.min(63) as i32);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}
