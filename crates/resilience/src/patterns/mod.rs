//! Resilience patterns
//!
//! - [`backoff`]: delay schedules between retry attempts
//! - [`retry`]: retry policy
//! - [`circuit_breaker`]: per-resource circuit breaker
//! - [`rate_limiter`]: per-client token buckets

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod retry;

pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerStats, Permit, Rejection, State};
pub use rate_limiter::{QuotaOverride, RateLimiter, RateLimiterStats, TokenBucket};
pub use retry::{NoObserver, OnRetry, RetryObserver, RetryPolicy};
