//! Time sources for breakers and buckets
//!
//! Every elapsed-time decision in this crate asks a [`Clock`] for `now` and
//! compares whole [`Duration`]s. Production code uses [`SystemClock`]; tests
//! drive a [`ManualClock`] so recovery windows of minutes or hours can be
//! crossed without sleeping.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic time source.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Time elapsed since `earlier`, saturating at zero.
    fn elapsed_since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }
}

/// Default clock backed by tokio's instant.
///
/// Reading through `tokio::time::Instant` keeps paused-clock tests
/// (`#[tokio::test(start_paused = true)]`) deterministic; outside a runtime
/// it is the plain monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Hand-driven clock for tests.
///
/// Clones share the same underlying instant, so a test can keep one handle
/// and pass another into the component under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Shared handle suitable for `with_clock` builders.
    #[must_use]
    pub fn shared(&self) -> Arc<dyn Clock> {
        Arc::new(self.clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Shared default clock.
pub(crate) fn system() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}
