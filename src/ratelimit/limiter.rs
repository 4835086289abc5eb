//! Sliding-window call limiter
//!
//! Admits at most `calls` calls within any window of length `period`.
//! Refused callers sleep and retry under a [`BackoffPolicy`]; once the
//! policy's attempts are spent the caller gets [`RateLimitExhausted`].

use crate::config::RateLimitConfig;
use crate::ratelimit::backoff::BackoffPolicy;
use crate::ratelimit::clock::{Clock, SystemClock};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// The limiter refused a call on every attempt its policy allowed
#[derive(Debug, Clone, Error)]
#[error("rate limit still exceeded after {attempts} attempts (next slot in {retry_after:?})")]
pub struct RateLimitExhausted {
    pub attempts: u32,
    pub retry_after: Duration,
}

/// Shared call-window limiter
///
/// The window of admitted call instants is the only mutable state; it sits
/// behind an async mutex so one limiter can be shared by `Arc` across
/// workers, which serializes admission decisions.
pub struct RateLimiter<C: Clock = SystemClock> {
    calls: usize,
    period: Duration,
    policy: BackoffPolicy,
    clock: C,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter<SystemClock> {
    /// Creates a limiter backed by the system clock
    pub fn new(calls: u32, period: Duration, policy: BackoffPolicy) -> Self {
        Self::with_clock(calls, period, policy, SystemClock)
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            config.calls,
            Duration::from_secs(config.period_secs),
            BackoffPolicy::for_rate_limit(config),
        )
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Creates a limiter reading time from `clock`
    pub fn with_clock(calls: u32, period: Duration, policy: BackoffPolicy, clock: C) -> Self {
        let calls = calls.max(1) as usize;
        Self {
            calls,
            period,
            policy,
            clock,
            window: Mutex::new(VecDeque::with_capacity(calls)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Makes one admission decision at the clock's current instant
    ///
    /// Records the call and returns `Ok(())` when admitted, otherwise
    /// returns how long until the oldest call leaves the window.
    pub async fn check(&self) -> Result<(), Duration> {
        let now = self.clock.now();
        let mut window = self.window.lock().await;
        admit(&mut window, self.calls, self.period, now)
    }

    /// Waits until a call is admitted
    ///
    /// Each refusal sleeps for the longer of the window's required wait and
    /// the policy's backoff delay for that attempt.
    pub async fn acquire(&self) -> Result<(), RateLimitExhausted> {
        for attempt in 0..self.policy.max_attempts {
            let wait = match self.check().await {
                Ok(()) => return Ok(()),
                Err(wait) => wait,
            };

            let delay = wait.max(self.policy.delay_for(attempt));
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Call window full, waiting"
            );
            tokio::time::sleep(delay).await;
        }

        self.check().await.map_err(|retry_after| {
            tracing::warn!(
                attempts = self.policy.max_attempts,
                "Rate limiter exhausted its retry budget"
            );
            RateLimitExhausted {
                attempts: self.policy.max_attempts,
                retry_after,
            }
        })
    }

    /// Number of calls currently counted in the window
    pub async fn in_window(&self) -> usize {
        let now = self.clock.now();
        let mut window = self.window.lock().await;
        evict_expired(&mut window, self.period, now);
        window.len()
    }
}

fn evict_expired(window: &mut VecDeque<Instant>, period: Duration, now: Instant) {
    while let Some(&oldest) = window.front() {
        if now.saturating_duration_since(oldest) >= period {
            window.pop_front();
        } else {
            break;
        }
    }
}

/// Sliding-window admission at instant `now`
fn admit(
    window: &mut VecDeque<Instant>,
    calls: usize,
    period: Duration,
    now: Instant,
) -> Result<(), Duration> {
    evict_expired(window, period, now);

    if window.len() < calls {
        window.push_back(now);
        return Ok(());
    }

    // Window is full, so it has a front element
    let oldest = window.front().copied().unwrap_or(now);
    Err(period.saturating_sub(now.saturating_duration_since(oldest)))
}
