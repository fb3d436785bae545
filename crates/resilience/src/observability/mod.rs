//! Observability hooks for resilience patterns
//!
//! Integration points for structured logging and metrics export. Breakers,
//! retry policies, rate limiters and callers accept an [`ObservabilityHooks`]
//! collection and emit a [`PatternEvent`] for every decision worth counting.

pub mod hooks;

pub use hooks::{
    LogLevel, LoggingHook, MetricsHook, MetricsSnapshot, ObservabilityHook, ObservabilityHooks,
    PatternEvent,
};
