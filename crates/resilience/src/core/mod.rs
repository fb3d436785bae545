//! Core types shared by every pattern
//!
//! Error types, failure classification, configuration and the clock
//! abstraction live here.

pub mod classify;
pub mod clock;
pub mod config;
pub mod error;

pub use classify::{Classify, ExpectedFailures, FailureKind};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BackoffConfig, BackoffKind, CallerConfig, CircuitBreakerConfig, RateLimiterConfig,
    ResilienceConfig, ResilienceSettings, RetryConfig,
};
pub use error::{ConfigError, ConfigResult, RateLimitExceeded, ResilienceError, ResilienceResult};

/// Core constants
pub mod constants {
    use std::time::Duration;

    /// Default breaker failure threshold
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

    /// Default breaker recovery timeout
    pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default retry attempts
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
}
