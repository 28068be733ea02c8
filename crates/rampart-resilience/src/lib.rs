//! Shared-state resilience primitives for the Rampart edge pipeline.
//!
//! - [`RateLimiter`]: keyed token buckets with an idle sweeper
//! - [`CircuitBreaker`] / [`CircuitBreakerRegistry`]: per-route and
//!   per-dependency three-state breakers
//!
//! Both registries are sharded maps; per-entry state sits behind its own
//! short-lived lock and no lock is held across an `.await`.
//!
//! # Example
//!
//! ```
//! use rampart_resilience::{RateLimiter, RateLimitSettings};
//!
//! let limiter = RateLimiter::new(RateLimitSettings::default().with_capacity(2));
//! assert!(limiter.check("10.0.0.1").is_admitted());
//! assert!(limiter.check("10.0.0.1").is_admitted());
//! ```

#![warn(missing_docs)]

pub mod breaker;
pub mod rate_limit;

pub use breaker::{
    BreakerEvent, BreakerOpen, BreakerSettings, BreakerSnapshot, BreakerState, CircuitBreaker,
    CircuitBreakerRegistry, Outcome, Permit, TransitionListener,
};
pub use rate_limit::{Decision, RateLimitSettings, RateLimiter, TokenBucket, MAX_RETRY_AFTER};
