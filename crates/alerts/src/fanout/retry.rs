//! Exponential backoff for delivery attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry schedule for one delivery intent.
///
/// After failed attempt `k` (1-based) the next attempt waits
/// `base_delay_ms * factor^(k-1)`. With the defaults that is 1s, 2s, 4s, 8s,
/// and the fifth failure exhausts the intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub base_delay_ms: u64,
    pub factor: u32,
    /// Total attempts, including the first
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            factor: 2,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failed attempt `attempt`.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = u64::from(self.factor).saturating_pow(exponent);
        Duration::from_millis(self.base_delay_ms.saturating_mul(multiplier))
    }

    /// Whether another attempt is allowed after `attempt` failures.
    #[must_use]
    pub const fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
