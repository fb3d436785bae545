//! Error types for resilience operations

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::classify::{Classify, FailureKind};
use crate::patterns::circuit_breaker::State;

/// Errors surfaced by breakers, retry policies and the resilient caller.
///
/// `E` is the error type of the protected unit of work. Its values travel
/// through every layer inside [`ResilienceError::Operation`] unchanged.
#[derive(Debug)]
pub enum ResilienceError<E> {
    /// The breaker rejected the call without attempting it
    CircuitOpen {
        /// Protected resource name
        resource: String,
        /// Breaker state at rejection time
        state: State,
        /// Time until the breaker will admit a probe
        retry_after: Option<Duration>,
    },

    /// Every attempt failed with an expected failure
    MaxRetriesExceeded {
        /// Number of attempts made
        attempts: u32,
        /// Failure of the final attempt
        last: Box<ResilienceError<E>>,
    },

    /// An attempt exceeded its timeout
    Timeout {
        /// Timeout that was exceeded
        after: Duration,
    },

    /// The caller cancelled the call
    Cancelled,

    /// The unit of work failed
    Operation(E),
}

impl<E: fmt::Display> fmt::Display for ResilienceError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen {
                resource, state, ..
            } => write!(f, "circuit breaker `{resource}` is {state}"),
            Self::MaxRetriesExceeded { attempts, last } => {
                write!(f, "retry limit exceeded after {attempts} attempts: {last}")
            }
            Self::Timeout { after } => write!(f, "operation timed out after {after:?}"),
            Self::Cancelled => f.write_str("operation cancelled"),
            Self::Operation(e) => fmt::Display::fmt(e, f),
        }
    }
}

impl<E: StdError + 'static> StdError for ResilienceError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Operation(e) => Some(e),
            Self::MaxRetriesExceeded { last, .. } => Some(last.as_ref()),
            _ => None,
        }
    }
}

impl<E> ResilienceError<E> {
    /// Whether this is a breaker rejection.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Whether the retry budget ran out.
    #[must_use]
    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::MaxRetriesExceeded { .. })
    }

    /// Retry hint carried by breaker rejections.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen { retry_after, .. } => *retry_after,
            Self::MaxRetriesExceeded { last, .. } => last.retry_after(),
            _ => None,
        }
    }

    /// Number of attempts behind this error, when known.
    #[must_use]
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::MaxRetriesExceeded { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// The underlying operation error, digging through retry exhaustion.
    #[must_use]
    pub fn operation(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::MaxRetriesExceeded { last, .. } => last.operation(),
            _ => None,
        }
    }

    /// Take the underlying operation error, digging through retry exhaustion.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::MaxRetriesExceeded { last, .. } => last.into_operation(),
            _ => None,
        }
    }

    /// Map the operation error type.
    pub fn map_operation<F, O>(self, f: O) -> ResilienceError<F>
    where
        O: FnOnce(E) -> F,
    {
        match self {
            Self::CircuitOpen {
                resource,
                state,
                retry_after,
            } => ResilienceError::CircuitOpen {
                resource,
                state,
                retry_after,
            },
            Self::MaxRetriesExceeded { attempts, last } => ResilienceError::MaxRetriesExceeded {
                attempts,
                last: Box::new(last.map_operation(f)),
            },
            Self::Timeout { after } => ResilienceError::Timeout { after },
            Self::Cancelled => ResilienceError::Cancelled,
            Self::Operation(e) => ResilienceError::Operation(f(e)),
        }
    }

    pub(crate) fn circuit_open(
        resource: impl Into<String>,
        state: State,
        retry_after: Option<Duration>,
    ) -> Self {
        Self::CircuitOpen {
            resource: resource.into(),
            state,
            retry_after,
        }
    }
}

impl<E: Classify> Classify for ResilienceError<E> {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::CircuitOpen { .. } => FailureKind::Unavailable,
            Self::MaxRetriesExceeded { last, .. } => last.failure_kind(),
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Operation(e) => e.failure_kind(),
        }
    }
}

/// A rate limiter refused admission.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("rate limit exceeded for client `{client_id}`")]
pub struct RateLimitExceeded {
    /// Client whose bucket was empty
    pub client_id: String,
    /// Time until the next token, if the bucket refills at all
    pub retry_after: Option<Duration>,
}

impl Classify for RateLimitExceeded {
    fn failure_kind(&self) -> FailureKind {
        FailureKind::Throttled
    }
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field is outside its allowed range
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

impl ConfigError {
    /// Create a validation error for `field`.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result of a protected call.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;

/// Result of a configuration step.
pub type ConfigResult<T> = Result<T, ConfigError>;
