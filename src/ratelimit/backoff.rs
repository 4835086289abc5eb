//! Exponential backoff policy
//!
//! One policy object drives both the local rate limiter's retry loop and
//! the orchestrator's handling of remote HTTP 429 responses.

use crate::config::{RateLimitConfig, RetryConfig};
use std::time::Duration;

/// Ceiling applied to 429 backoff delays
const MAX_429_DELAY: Duration = Duration::from_secs(300);

/// Attempt delays that grow geometrically from a base value
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Number of retries allowed before giving up
    pub max_attempts: u32,

    /// Delay before the first retry
    pub base_delay: Duration,

    /// Growth factor between consecutive delays (2.0 doubles)
    pub multiplier: f64,

    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// Policy for the local call window; delays never exceed one window
    pub fn for_rate_limit(config: &RateLimitConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
            Duration::from_secs(config.period_secs),
        )
    }

    /// Policy for retrying requests the remote rejected with 429
    pub fn for_retry_429(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.multiplier,
            MAX_429_DELAY,
        )
    }

    /// Delay to wait before retry number `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Sum of every delay the policy can produce
    pub fn total_budget(&self) -> Duration {
        (0..self.max_attempts).map(|a| self.delay_for(a)).sum()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::for_rate_limit(&RateLimitConfig::default())
    }
}
