//! Backoff schedules between retry attempts
//!
//! A [`Backoff`] is a pure mapping from the number of the attempt that just
//! failed (1-based) to the delay before the next one. Only jitter draws
//! randomness; the unjittered schedule is fully deterministic.

use std::time::Duration;

use crate::core::config::{BackoffConfig, BackoffKind, ResilienceConfig};
use crate::core::error::ConfigResult;

/// Delay strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    kind: BackoffKind,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Backoff {
    /// Constant delay.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay: delay,
            max_delay: delay,
            jitter: false,
        }
    }

    /// `base * attempt`, capped at `max`.
    #[must_use]
    pub const fn linear(base: Duration, max: Duration) -> Self {
        Self {
            kind: BackoffKind::Linear,
            base_delay: base,
            max_delay: max,
            jitter: false,
        }
    }

    /// `base * 2^(attempt - 1)`, capped at `max`.
    #[must_use]
    pub const fn exponential(base: Duration, max: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            base_delay: base,
            max_delay: max,
            jitter: false,
        }
    }

    /// No delay at all. Handy in tests.
    #[must_use]
    pub const fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    /// Enable or disable full jitter.
    #[must_use]
    pub const fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build from a config block.
    pub fn from_config(config: &BackoffConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            kind: config.kind,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter: config.jitter,
        })
    }

    /// Schedule shape.
    #[must_use]
    pub const fn kind(&self) -> BackoffKind {
        self.kind
    }

    /// Whether delays are jittered.
    #[must_use]
    pub const fn is_jittered(&self) -> bool {
        self.jitter
    }

    /// Unjittered delay after the given failed attempt (1-based).
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.kind {
            BackoffKind::Fixed => self.base_delay,
            BackoffKind::Linear => self
                .base_delay
                .checked_mul(attempt)
                .map_or(self.max_delay, |d| d.min(self.max_delay)),
            BackoffKind::Exponential => 2u32
                .checked_pow(attempt - 1)
                .and_then(|factor| self.base_delay.checked_mul(factor))
                .map_or(self.max_delay, |d| d.min(self.max_delay)),
        }
    }

    /// Delay to sleep after the given failed attempt, jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if self.jitter {
            full_jitter(delay)
        } else {
            delay
        }
    }

    /// Unjittered schedule for attempts `1..`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (1..=u32::MAX).map(|attempt| self.base_delay_for(attempt))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        let config = BackoffConfig::default();
        Self {
            kind: config.kind,
            base_delay: config.base_delay,
            max_delay: config.max_delay,
            jitter: config.jitter,
        }
    }
}

/// Uniform draw in `[0, delay]`.
fn full_jitter(delay: Duration) -> Duration {
    let nanos = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
    if nanos == 0 {
        return delay;
    }
    Duration::from_nanos(fastrand::u64(0..=nanos))
}
