//! Rate limiting for calls to the remote API
//!
//! - `BackoffPolicy`: exponential retry delays with an attempt ceiling
//! - `RateLimiter`: sliding call window shared by every request path
//! - `Clock`: injected time source for the window

mod backoff;
mod clock;
mod limiter;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{RateLimitExhausted, RateLimiter};
