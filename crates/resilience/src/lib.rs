//! # Switchyard Resilience
//!
//! Fault-isolation primitives for the Switchyard backend: every outbound
//! call to a database, LLM provider, MCP peer or third-party API goes
//! through them.
//!
//! ## Features
//!
//! - **Circuit Breaker**: per-resource `Closed`/`Open`/`HalfOpen` state machine
//!   with a single half-open probe
//! - **Retry**: bounded attempts with fixed, linear or exponential backoff and
//!   optional full jitter
//! - **Rate Limiting**: per-client token buckets with quota overrides and an
//!   exemption list
//! - **Resilient Caller**: breaker around retry around one unit of work, with
//!   per-attempt timeouts, fallbacks and cancellation
//! - **Observability**: hooks for structured logging and metrics on every
//!   pattern decision
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::io;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use switchyard_resilience::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = BreakerRegistry::new(CircuitBreakerConfig::new(5, Duration::from_secs(30)))?;
//!     let retry = RetryPolicy::new(3, Backoff::exponential(Duration::from_millis(200), Duration::from_secs(5)))?;
//!
//!     let caller = ResilientCaller::<String, io::Error>::builder(registry.get_or_create("postgres"))
//!         .retry(retry)
//!         .timeout(Duration::from_secs(2))
//!         .build()?;
//!
//!     let row = caller
//!         .call(|| async { Ok::<_, io::Error>("row".to_string()) })
//!         .await?;
//!     println!("{row}");
//!
//!     let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::new(100, 10.0))?);
//!     if !limiter.allow("tenant-42") {
//!         println!("slow down");
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

// Core module with fundamental types
pub mod core;

// Pattern implementations
pub mod patterns;

// Higher-level abstractions
pub mod caller;
pub mod registry;

// Observability hooks
pub mod observability;

pub use caller::{Fallback, ResilientCaller, ResilientCallerBuilder};
pub use registry::BreakerRegistry;

// Public API - core types
pub use crate::core::{
    CallerConfig, CircuitBreakerConfig, Classify, Clock, ConfigError, ConfigResult,
    ExpectedFailures, FailureKind, ManualClock, RateLimitExceeded, RateLimiterConfig,
    ResilienceConfig, ResilienceError, ResilienceResult, ResilienceSettings, RetryConfig,
    SystemClock,
};

// Public API - patterns
pub use patterns::{
    // Backoff
    Backoff,
    // Circuit breaker
    CircuitBreaker,
    CircuitBreakerStats,
    Permit,
    // Rate limiting
    QuotaOverride,
    RateLimiter,
    RateLimiterStats,
    Rejection,
    // Retry
    RetryObserver,
    RetryPolicy,
    State,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::caller::{Fallback, ResilientCaller};
    pub use crate::core::{
        BackoffConfig, BackoffKind, CallerConfig, CircuitBreakerConfig, Classify,
        ExpectedFailures, FailureKind, RateLimiterConfig, ResilienceConfig, ResilienceError,
        ResilienceResult, ResilienceSettings, RetryConfig,
    };
    pub use crate::observability::{ObservabilityHook, ObservabilityHooks, PatternEvent};
    pub use crate::patterns::{
        Backoff, CircuitBreaker, RateLimiter, RetryObserver, RetryPolicy, State,
    };
    pub use crate::registry::BreakerRegistry;
}

/// Current version of switchyard-resilience
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
