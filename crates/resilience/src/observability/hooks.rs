//! Observability hooks for pattern lifecycle events
//!
//! Components emit [`PatternEvent`]s through an [`ObservabilityHooks`]
//! collection. Hooks are write-only sinks: a panicking hook is caught and
//! logged, and never reaches the protected call path.

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::core::classify::FailureKind;
use crate::patterns::circuit_breaker::State;

/// Log level for [`LoggingHook`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level
    Info,
    /// Debug level
    Debug,
    /// Trace level
    Trace,
}

/// Events emitted by breakers, retry policies, rate limiters and callers
#[derive(Debug, Clone, PartialEq)]
pub enum PatternEvent {
    /// A breaker changed state
    CircuitStateChanged {
        /// Protected resource
        resource: String,
        /// Previous state
        from: State,
        /// New state
        to: State,
    },
    /// A breaker rejected a call without attempting it
    CallRejected {
        /// Protected resource
        resource: String,
        /// State at rejection time
        state: State,
    },
    /// An attempt failed and another one is scheduled
    RetryAttempt {
        /// Operation name
        operation: String,
        /// Number of the attempt that failed (1-based)
        attempt: u32,
        /// Total attempts allowed
        max_attempts: u32,
        /// Category of the failure
        kind: FailureKind,
        /// Delay before the next attempt
        delay: Duration,
    },
    /// The retry budget ran out
    RetriesExhausted {
        /// Operation name
        operation: String,
        /// Attempts made
        attempts: u32,
        /// Category of the final failure
        kind: FailureKind,
    },
    /// A rate limiter admitted or denied a request
    RateLimitDecision {
        /// Client key
        client_id: String,
        /// Whether the request was admitted
        allowed: bool,
    },
    /// An attempt hit its timeout
    TimeoutOccurred {
        /// Operation name
        operation: String,
        /// Timeout that was exceeded
        timeout: Duration,
    },
    /// A fallback replaced a terminal failure
    FallbackUsed {
        /// Protected resource
        resource: String,
        /// Category of the failure that was replaced
        kind: FailureKind,
    },
}

impl PatternEvent {
    /// Short event name, used for metric keys.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CircuitStateChanged { .. } => "circuit_state_changed",
            Self::CallRejected { .. } => "call_rejected",
            Self::RetryAttempt { .. } => "retry_attempt",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::RateLimitDecision { .. } => "rate_limit_decision",
            Self::TimeoutOccurred { .. } => "timeout_occurred",
            Self::FallbackUsed { .. } => "fallback_used",
        }
    }
}

impl fmt::Display for PatternEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitStateChanged { resource, from, to } => {
                write!(f, "Circuit breaker for {resource} changed from {from} to {to}")
            }
            Self::CallRejected { resource, state } => {
                write!(f, "Call to {resource} rejected, circuit is {state}")
            }
            Self::RetryAttempt {
                operation,
                attempt,
                max_attempts,
                kind,
                delay,
            } => write!(
                f,
                "Retry attempt {attempt}/{max_attempts} for {operation} failed ({kind}), next in {delay:?}"
            ),
            Self::RetriesExhausted {
                operation,
                attempts,
                kind,
            } => write!(
                f,
                "Retries exhausted for {operation} after {attempts} attempts ({kind})"
            ),
            Self::RateLimitDecision { client_id, allowed } => {
                let verdict = if *allowed { "allowed" } else { "denied" };
                write!(f, "Rate limiter {verdict} request for {client_id}")
            }
            Self::TimeoutOccurred { operation, timeout } => {
                write!(f, "Timeout occurred for {operation} after {timeout:?}")
            }
            Self::FallbackUsed { resource, kind } => {
                write!(f, "Fallback used for {resource} after {kind} failure")
            }
        }
    }
}

/// Sink for pattern events
pub trait ObservabilityHook: Send + Sync {
    /// Called when a pattern event occurs
    fn on_event(&self, event: &PatternEvent);
}

impl<F> ObservabilityHook for F
where
    F: Fn(&PatternEvent) + Send + Sync,
{
    fn on_event(&self, event: &PatternEvent) {
        self(event);
    }
}

/// Collection of observability hooks
#[derive(Default, Clone)]
pub struct ObservabilityHooks {
    hooks: Arc<Vec<Arc<dyn ObservabilityHook>>>,
}

impl fmt::Debug for ObservabilityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservabilityHooks")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl ObservabilityHooks {
    /// Create an empty collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook to the collection
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn ObservabilityHook>) -> Self {
        Arc::make_mut(&mut self.hooks).push(hook);
        self
    }

    /// Whether no hook is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Emit an event to all hooks.
    ///
    /// A panicking hook is skipped; the remaining hooks still see the event.
    pub fn emit(&self, event: PatternEvent) {
        for hook in self.hooks.iter() {
            if catch_unwind(AssertUnwindSafe(|| hook.on_event(&event))).is_err() {
                tracing::warn!(event = event.name(), "observability hook panicked");
            }
        }
    }
}

/// Hook that writes every event through `tracing`
#[derive(Debug, Clone, Copy)]
pub struct LoggingHook {
    level: LogLevel,
}

impl LoggingHook {
    /// Create a new logging hook
    #[must_use]
    pub const fn new(level: LogLevel) -> Self {
        Self { level }
    }
}

impl ObservabilityHook for LoggingHook {
    fn on_event(&self, event: &PatternEvent) {
        let name = event.name();
        match self.level {
            LogLevel::Error => tracing::error!(event = name, "{event}"),
            LogLevel::Warn => tracing::warn!(event = name, "{event}"),
            LogLevel::Info => tracing::info!(event = name, "{event}"),
            LogLevel::Debug => tracing::debug!(event = name, "{event}"),
            LogLevel::Trace => tracing::trace!(event = name, "{event}"),
        }
    }
}

/// Point-in-time copy of the counters kept by [`MetricsHook`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Last observed state per resource
    pub breaker_states: HashMap<String, State>,
    /// Transitions into `Open`
    pub trips: u64,
    /// Transitions from `HalfOpen` to `Closed`
    pub recoveries: u64,
    /// Calls rejected by an open breaker
    pub rejected: u64,
    /// Retry attempts, by failure kind
    pub retry_attempts: HashMap<FailureKind, u64>,
    /// Retry sequences that ran out of budget
    pub retries_exhausted: u64,
    /// Admitted rate limiter requests
    pub rate_limit_allowed: u64,
    /// Denied rate limiter requests
    pub rate_limit_denied: u64,
    /// Attempts that hit their timeout
    pub timeouts: u64,
    /// Fallback invocations
    pub fallbacks: u64,
}

impl MetricsSnapshot {
    /// Retry attempts across all kinds
    #[must_use]
    pub fn total_retry_attempts(&self) -> u64 {
        self.retry_attempts.values().sum()
    }
}

/// Hook that aggregates events into in-memory counters
#[derive(Debug, Default)]
pub struct MetricsHook {
    counters: Mutex<MetricsSnapshot>,
}

impl MetricsHook {
    /// Create a new metrics hook
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all counters
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        self.counters.lock().clone()
    }

    /// Clear all counters
    pub fn reset(&self) {
        *self.counters.lock() = MetricsSnapshot::default();
    }
}

impl ObservabilityHook for MetricsHook {
    fn on_event(&self, event: &PatternEvent) {
        let mut counters = self.counters.lock();
        match event {
            PatternEvent::CircuitStateChanged { resource, from, to } => {
                counters.breaker_states.insert(resource.clone(), *to);
                match (from, to) {
                    (_, State::Open) => counters.trips += 1,
                    (State::HalfOpen, State::Closed) => counters.recoveries += 1,
                    _ => {}
                }
            }
            PatternEvent::CallRejected { .. } => counters.rejected += 1,
            PatternEvent::RetryAttempt { kind, .. } => {
                *counters.retry_attempts.entry(*kind).or_default() += 1;
            }
            PatternEvent::RetriesExhausted { .. } => counters.retries_exhausted += 1,
            PatternEvent::RateLimitDecision { allowed: true, .. } => {
                counters.rate_limit_allowed += 1;
            }
            PatternEvent::RateLimitDecision { allowed: false, .. } => {
                counters.rate_limit_denied += 1;
            }
            PatternEvent::TimeoutOccurred { .. } => counters.timeouts += 1,
            PatternEvent::FallbackUsed { .. } => counters.fallbacks += 1,
        }
    }
}
