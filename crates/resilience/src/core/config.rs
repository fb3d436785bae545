//! Configuration surface for breakers, retry policies, rate limiters and
//! the resilient caller
//!
//! Every type here deserializes with field-level defaults, so a config file
//! only has to name what it changes. Call [`ResilienceConfig::validate`] (the
//! component constructors do) before use.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::classify::ExpectedFailures;
use super::constants::{
    DEFAULT_FAILURE_THRESHOLD, DEFAULT_RECOVERY_TIMEOUT, DEFAULT_RETRY_ATTEMPTS,
};
use super::error::{ConfigError, ConfigResult};

/// Upper bound on any configured delay or timeout.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Validation shared by every config type.
pub trait ResilienceConfig {
    /// Check every field is in range.
    fn validate(&self) -> ConfigResult<()>;
}

fn positive_duration(field: &'static str, value: Duration) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::invalid(field, "must be greater than zero"));
    }
    if value > MAX_DURATION {
        return Err(ConfigError::invalid(field, "must not exceed 24h"));
    }
    Ok(())
}

/// Circuit breaker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures that trip the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub recovery_timeout: Duration,
    /// Failure kinds the breaker counts
    pub expected_failures: ExpectedFailures,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout: DEFAULT_RECOVERY_TIMEOUT,
            expected_failures: ExpectedFailures::default(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Config with the given threshold and recovery timeout.
    #[must_use]
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            recovery_timeout,
            ..Self::default()
        }
    }

    /// Replace the counted failure kinds.
    #[must_use]
    pub fn with_expected_failures(mut self, expected: ExpectedFailures) -> Self {
        self.expected_failures = expected;
        self
    }
}

impl ResilienceConfig for CircuitBreakerConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be at least 1"));
        }
        positive_duration("recovery_timeout", self.recovery_timeout)
    }
}

/// Shape of the delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// Constant `base_delay`
    Fixed,
    /// `base_delay * attempt`, capped at `max_delay`
    Linear,
    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`
    #[default]
    Exponential,
}

/// Backoff settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Schedule shape
    pub kind: BackoffKind,
    /// First delay
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub base_delay: Duration,
    /// Cap for growing schedules
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub max_delay: Duration,
    /// Randomize each delay uniformly in `[0, delay]`
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl ResilienceConfig for BackoffConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.base_delay > MAX_DURATION {
            return Err(ConfigError::invalid("base_delay", "must not exceed 24h"));
        }
        if self.max_delay > MAX_DURATION {
            return Err(ConfigError::invalid("max_delay", "must not exceed 24h"));
        }
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(
                "max_delay",
                "must be greater than or equal to base_delay",
            ));
        }
        Ok(())
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay schedule
    pub backoff: BackoffConfig,
    /// Failure kinds that are retried
    pub expected_failures: ExpectedFailures,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            backoff: BackoffConfig::default(),
            expected_failures: ExpectedFailures::default(),
        }
    }
}

impl ResilienceConfig for RetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        self.backoff.validate()
    }
}

/// Rate limiter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Burst size of every client bucket
    pub capacity: u32,
    /// Tokens added per second; zero disables refill
    pub refill_per_second: f64,
    /// Clients admitted without touching a bucket
    pub exempt_client_ids: BTreeSet<String>,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_per_second: 10.0,
            exempt_client_ids: BTreeSet::new(),
        }
    }
}

impl RateLimiterConfig {
    /// Config with the given capacity and refill rate.
    #[must_use]
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
            exempt_client_ids: BTreeSet::new(),
        }
    }

    /// Add an exempt client.
    #[must_use]
    pub fn with_exempt(mut self, client_id: impl Into<String>) -> Self {
        self.exempt_client_ids.insert(client_id.into());
        self
    }
}

impl ResilienceConfig for RateLimiterConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("capacity", "must be at least 1"));
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second < 0.0 {
            return Err(ConfigError::invalid(
                "refill_per_second",
                "must be a finite, non-negative number",
            ));
        }
        Ok(())
    }
}

/// Resilient caller settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CallerConfig {
    /// Per-attempt timeout
    #[cfg_attr(feature = "humantime", serde(with = "humantime_serde"))]
    pub timeout: Option<Duration>,
}

impl ResilienceConfig for CallerConfig {
    fn validate(&self) -> ConfigResult<()> {
        match self.timeout {
            Some(timeout) => positive_duration("timeout", timeout),
            None => Ok(()),
        }
    }
}

/// Full settings block for one protected backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Breaker settings
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry settings
    pub retry: RetryConfig,
    /// Admission settings
    pub rate_limiter: RateLimiterConfig,
    /// Caller settings
    pub caller: CallerConfig,
}

impl ResilienceConfig for ResilienceSettings {
    fn validate(&self) -> ConfigResult<()> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.rate_limiter.validate()?;
        self.caller.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::FailureKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        assert!(ResilienceSettings::default().validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let config = CircuitBreakerConfig::new(0, Duration::from_secs(1));
        assert_eq!(
            config.validate(),
            Err(ConfigError::invalid("failure_threshold", "must be at least 1"))
        );
    }

    #[test]
    fn test_zero_recovery_timeout_is_rejected() {
        let config = CircuitBreakerConfig::new(3, Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_delay_below_base_is_rejected() {
        let config = BackoffConfig {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(1),
            ..BackoffConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_or_nan_refill_is_rejected() {
        assert!(RateLimiterConfig::new(5, -1.0).validate().is_err());
        assert!(RateLimiterConfig::new(5, f64::NAN).validate().is_err());
        assert!(RateLimiterConfig::new(5, 0.0).validate().is_ok());
        assert!(RateLimiterConfig::new(0, 1.0).validate().is_err());
    }

    #[test]
    fn test_zero_caller_timeout_is_rejected() {
        let config = CallerConfig {
            timeout: Some(Duration::ZERO),
        };
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "humantime")]
    #[test]
    fn test_settings_deserialize_with_human_durations() {
        let json = r#"{
            "circuit_breaker": { "failure_threshold": 3, "recovery_timeout": "2m" },
            "retry": {
                "max_attempts": 4,
                "backoff": { "kind": "linear", "base_delay": "250ms", "max_delay": "5s", "jitter": true },
                "expected_failures": ["timeout", "server"]
            },
            "rate_limiter": { "capacity": 20, "refill_per_second": 2.5, "exempt_client_ids": ["ops"] },
            "caller": { "timeout": "1s 500ms" }
        }"#;

        let settings: ResilienceSettings = serde_json::from_str(json).unwrap();

        assert_eq!(settings.circuit_breaker.failure_threshold, 3);
        assert_eq!(
            settings.circuit_breaker.recovery_timeout,
            Duration::from_secs(120)
        );
        assert_eq!(settings.retry.backoff.kind, BackoffKind::Linear);
        assert_eq!(settings.retry.backoff.base_delay, Duration::from_millis(250));
        assert!(settings.retry.backoff.jitter);
        assert!(settings.retry.expected_failures.contains(FailureKind::Server));
        assert!(!settings.retry.expected_failures.contains(FailureKind::Connection));
        assert!(settings.rate_limiter.exempt_client_ids.contains("ops"));
        assert_eq!(settings.caller.timeout, Some(Duration::from_millis(1500)));
        assert!(settings.validate().is_ok());
    }

    #[cfg(feature = "humantime")]
    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: ResilienceSettings =
            serde_json::from_str(r#"{ "retry": { "max_attempts": 1 } }"#).unwrap();

        assert_eq!(settings.retry.max_attempts, 1);
        assert_eq!(settings.retry.backoff, BackoffConfig::default());
        assert_eq!(settings.circuit_breaker, CircuitBreakerConfig::default());
        assert_eq!(settings.caller.timeout, None);
    }
}
