//! Circuit breaker
//!
//! One breaker guards one protected resource. Its bookkeeping (state, failure
//! count, last failure time, probe claim) lives behind a single
//! `parking_lot::Mutex`; an `AtomicU8` mirror of the state serves lock-free
//! reads. The lock is only held while bookkeeping changes, never while the
//! protected call runs.
//!
//! ```text
//! CLOSED --(failures >= threshold)--> OPEN
//! OPEN --(elapsed >= recovery_timeout, on next allow_request)--> HALF_OPEN
//! HALF_OPEN --(probe succeeds)--> CLOSED
//! HALF_OPEN --(probe fails)--> OPEN
//! ```
//!
//! Time only moves the breaker inside [`CircuitBreaker::allow_request`]; there
//! are no background timers.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::classify::{Classify, FailureKind};
use crate::core::clock::{self, Clock};
use crate::core::config::{CircuitBreakerConfig, ResilienceConfig};
use crate::core::error::{ConfigResult, ResilienceError, ResilienceResult};
use crate::observability::{ObservabilityHooks, PatternEvent};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Calls flow through
    Closed,
    /// Calls are rejected until the recovery timeout elapses
    Open,
    /// One probe call decides between `Closed` and `Open`
    HalfOpen,
}

impl State {
    const fn to_atomic(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    const fn from_atomic(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Closed),
            1 => Some(Self::Open),
            2 => Some(Self::HalfOpen),
            _ => None,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// A call refused by the breaker.
///
/// Converts into [`ResilienceError::CircuitOpen`] with `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Protected resource
    pub resource: String,
    /// State at rejection time
    pub state: State,
    /// Time until a probe will be admitted; `None` while a probe is in flight
    pub retry_after: Option<Duration>,
}

impl<E> From<Rejection> for ResilienceError<E> {
    fn from(rejection: Rejection) -> Self {
        Self::circuit_open(rejection.resource, rejection.state, rejection.retry_after)
    }
}

/// Breaker statistics snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: State,
    /// Counted failures since the last success or reset
    pub failure_count: u32,
    /// Transitions into `Open`
    pub trips: u64,
    /// Transitions from `HalfOpen` to `Closed`
    pub recoveries: u64,
    /// Calls refused without an attempt
    pub rejected: u64,
    /// Time since the last counted failure
    pub last_failure_age: Option<Duration>,
    /// Whether the half-open probe slot is taken
    pub probe_in_flight: bool,
}

#[derive(Debug)]
struct BreakerInner {
    state: State,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    probe_in_flight: bool,
    trips: u64,
    recoveries: u64,
    rejected: u64,
}

type Transition = Option<(State, State)>;

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: State::Closed,
            failure_count: 0,
            last_failure_time: None,
            probe_in_flight: false,
            trips: 0,
            recoveries: 0,
            rejected: 0,
        }
    }
}

/// Per-resource circuit breaker.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    /// 0=Closed, 1=Open, 2=HalfOpen. Written only under `inner`.
    atomic_state: AtomicU8,
    clock: Arc<dyn Clock>,
    hooks: ObservabilityHooks,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state_fast())
            .field("failure_threshold", &self.config.failure_threshold)
            .field("recovery_timeout", &self.config.recovery_timeout)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a breaker for `name`, validating `config`.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(name.into(), config))
    }

    pub(crate) fn from_validated(name: String, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner::new()),
            atomic_state: AtomicU8::new(State::Closed.to_atomic()),
            clock: clock::system(),
            hooks: ObservabilityHooks::default(),
        }
    }

    /// Create a breaker with default settings.
    pub fn with_defaults(name: impl Into<String>) -> ConfigResult<Self> {
        Self::new(name, CircuitBreakerConfig::default())
    }

    /// Replace the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach observability hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: ObservabilityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Protected resource name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call may be attempted now.
    ///
    /// In `Open`, the first call after the recovery timeout moves the breaker
    /// to `HalfOpen` and claims the single probe slot. In `HalfOpen`, only an
    /// unclaimed slot admits a call.
    ///
    /// A `true` answer from `HalfOpen` holds the probe slot until the outcome
    /// is reported with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure). Prefer
    /// [`try_acquire`](Self::try_acquire), whose permit also frees the slot
    /// when the call is abandoned.
    pub fn allow_request(&self) -> bool {
        match self.try_acquire() {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        }
    }

    /// Admit a call and return a permit that settles its outcome.
    pub fn try_acquire(&self) -> Result<Permit<'_>, Rejection> {
        // Closed needs no bookkeeping.
        if self.state_fast() == State::Closed {
            return Ok(Permit::new(self, false));
        }

        let (admitted, transition) = {
            let mut inner = self.inner.lock();
            match inner.state {
                State::Closed => (Ok(false), None),
                State::Open => {
                    let elapsed = self.elapsed_since_failure(&inner);
                    if elapsed >= self.config.recovery_timeout {
                        inner.probe_in_flight = true;
                        let transition = self.set_state(&mut inner, State::HalfOpen);
                        (Ok(true), transition)
                    } else {
                        inner.rejected += 1;
                        let retry_after = self.config.recovery_timeout.saturating_sub(elapsed);
                        (Err((State::Open, Some(retry_after))), None)
                    }
                }
                State::HalfOpen => {
                    if inner.probe_in_flight {
                        inner.rejected += 1;
                        (Err((State::HalfOpen, None)), None)
                    } else {
                        inner.probe_in_flight = true;
                        (Ok(true), None)
                    }
                }
            }
        };
        self.emit_transition(transition);

        match admitted {
            Ok(probe) => {
                if probe {
                    debug!(resource = %self.name, "circuit breaker admitted half-open probe");
                }
                Ok(Permit::new(self, probe))
            }
            Err((state, retry_after)) => {
                debug!(resource = %self.name, %state, ?retry_after, "circuit breaker rejected call");
                self.hooks.emit(PatternEvent::CallRejected {
                    resource: self.name.clone(),
                    state,
                });
                Err(Rejection {
                    resource: self.name.clone(),
                    state,
                    retry_after,
                })
            }
        }
    }

    /// Report a successful call.
    ///
    /// Closes a half-open breaker and clears the failure count.
    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            inner.probe_in_flight = false;
            match inner.state {
                State::HalfOpen => {
                    inner.recoveries += 1;
                    inner.last_failure_time = None;
                    self.set_state(&mut inner, State::Closed)
                }
                State::Closed | State::Open => None,
            }
        };
        self.emit_transition(transition);
    }

    /// Report a failed call.
    ///
    /// Returns whether the failure was counted. Failures outside the
    /// configured expected kinds leave the count alone.
    pub fn record_failure<E: Classify + ?Sized>(&self, error: &E) -> bool {
        self.record_failure_kind(error.failure_kind())
    }

    /// Report a failed call by category.
    ///
    /// An uncounted failure in `HalfOpen` frees the trial slot claimed by
    /// [`allow_request`](Self::allow_request) for the next caller.
    pub fn record_failure_kind(&self, kind: FailureKind) -> bool {
        let counted = self.count_if_expected(kind);
        if !counted {
            self.release_probe();
        }
        counted
    }

    fn count_if_expected(&self, kind: FailureKind) -> bool {
        if !self.config.expected_failures.contains(kind) {
            debug!(resource = %self.name, %kind, "circuit breaker ignored unexpected failure");
            return false;
        }
        let transition = {
            let mut inner = self.inner.lock();
            self.count_failure(&mut inner)
        };
        self.emit_transition(transition);
        true
    }

    fn count_failure(&self, inner: &mut BreakerInner) -> Transition {
        inner.last_failure_time = Some(self.clock.now());
        // Late failures from calls admitted before the trip only refresh the window.
        if inner.state == State::Open {
            return None;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        match inner.state {
            State::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.trips += 1;
                warn!(
                    resource = %self.name,
                    failure_count = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "circuit breaker opening"
                );
                self.set_state(inner, State::Open)
            }
            State::HalfOpen => {
                inner.trips += 1;
                inner.probe_in_flight = false;
                warn!(resource = %self.name, "half-open probe failed, circuit breaker reopening");
                self.set_state(inner, State::Open)
            }
            State::Closed | State::Open => None,
        }
    }

    /// Free the probe slot without recording an outcome.
    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == State::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            debug!(resource = %self.name, "half-open probe released without outcome");
        }
    }

    /// Account for an abandoned call.
    ///
    /// Counted as a failure when `Cancelled` is an expected kind; otherwise
    /// nothing is recorded and a held probe slot is freed.
    fn record_cancellation(&self, probe: bool) {
        if self.count_if_expected(FailureKind::Cancelled) {
            return;
        }
        if probe {
            self.release_probe();
        }
    }

    /// Force the breaker back to `Closed` with a clean failure count.
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            inner.last_failure_time = None;
            inner.probe_in_flight = false;
            self.set_state(&mut inner, State::Closed)
        };
        info!(resource = %self.name, "circuit breaker manually reset");
        self.emit_transition(transition);
    }

    /// Current state, read under the lock.
    ///
    /// Never moves the breaker; an elapsed recovery timeout is only acted on
    /// by the next [`allow_request`](Self::allow_request).
    #[must_use]
    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    /// Current state without taking the lock.
    #[must_use]
    pub fn state_fast(&self) -> State {
        State::from_atomic(self.atomic_state.load(Ordering::Acquire)).unwrap_or(State::Closed)
    }

    /// Counted failures since the last success or reset.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Consistent snapshot of the breaker's counters.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            trips: inner.trips,
            recoveries: inner.recoveries,
            rejected: inner.rejected,
            last_failure_age: inner
                .last_failure_time
                .map(|at| self.clock.elapsed_since(at)),
            probe_in_flight: inner.probe_in_flight,
        }
    }

    /// Run `operation` under the breaker.
    ///
    /// Fails fast with [`ResilienceError::CircuitOpen`] when rejected.
    /// Dropping the returned future mid-call counts as cancellation.
    #[tracing::instrument(skip(self, operation), fields(resource = %self.name))]
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> ResilienceResult<T, E>
    where
        E: Classify,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        let result = operation().await;
        permit.settle(&result);
        result.map_err(ResilienceError::Operation)
    }

    /// Blocking variant of [`call`](Self::call).
    pub fn call_blocking<T, E, F>(&self, operation: F) -> ResilienceResult<T, E>
    where
        E: Classify,
        F: FnOnce() -> Result<T, E>,
    {
        let permit = self.try_acquire()?;
        let result = operation();
        permit.settle(&result);
        result.map_err(ResilienceError::Operation)
    }

    fn elapsed_since_failure(&self, inner: &BreakerInner) -> Duration {
        inner
            .last_failure_time
            .map_or(Duration::MAX, |at| self.clock.elapsed_since(at))
    }

    fn set_state(&self, inner: &mut BreakerInner, to: State) -> Transition {
        let from = inner.state;
        if from == to {
            return None;
        }
        inner.state = to;
        self.atomic_state.store(to.to_atomic(), Ordering::Release);
        Some((from, to))
    }

    fn emit_transition(&self, transition: Transition) {
        let Some((from, to)) = transition else {
            return;
        };
        match to {
            State::Closed => info!(resource = %self.name, %from, "circuit breaker closed"),
            State::HalfOpen => info!(resource = %self.name, "circuit breaker half-open"),
            State::Open => {}
        }
        self.hooks.emit(PatternEvent::CircuitStateChanged {
            resource: self.name.clone(),
            from,
            to,
        });
    }
}

/// Admission handed out by [`CircuitBreaker::try_acquire`].
///
/// Report the outcome with [`success`](Self::success),
/// [`failure`](Self::failure) or [`settle`](Self::settle). A permit dropped
/// unsettled is treated as a cancelled call.
#[must_use = "dropping a permit records the call as cancelled"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl fmt::Debug for Permit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("resource", &self.breaker.name)
            .field("probe", &self.probe)
            .finish()
    }
}

impl<'a> Permit<'a> {
    const fn new(breaker: &'a CircuitBreaker, probe: bool) -> Self {
        Self {
            breaker,
            probe,
            settled: false,
        }
    }

    /// Whether this permit holds the half-open probe slot.
    #[must_use]
    pub const fn is_probe(&self) -> bool {
        self.probe
    }

    /// The call succeeded.
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// The call failed with `error`.
    ///
    /// An unexpected failure is not counted; a held probe slot is freed so
    /// the breaker does not stall in `HalfOpen`.
    pub fn failure<E: Classify + ?Sized>(mut self, error: &E) {
        self.settled = true;
        if !self.breaker.count_if_expected(error.failure_kind()) && self.probe {
            self.breaker.release_probe();
        }
    }

    /// Report `result` as success or failure.
    pub fn settle<T, E: Classify>(self, result: &Result<T, E>) {
        match result {
            Ok(_) => self.success(),
            Err(error) => self.failure(error),
        }
    }

    /// The call was abandoned.
    pub fn cancelled(mut self) {
        self.settled = true;
        self.breaker.record_cancellation(self.probe);
    }

    /// Drop without reporting anything; a held probe slot stays claimed.
    fn forget(mut self) {
        self.settled = true;
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_cancellation(self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::ExpectedFailures;
    use crate::core::clock::ManualClock;
    use crate::observability::MetricsHook;
    use pretty_assertions::assert_eq;
    use std::io;

    fn breaker(threshold: u32, recovery: Duration) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::new(threshold, recovery))
            .unwrap()
            .with_clock(clock.shared());
        (breaker, clock)
    }

    fn timeout() -> io::Error {
        io::Error::from(io::ErrorKind::TimedOut)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = CircuitBreaker::new("db", CircuitBreakerConfig::new(0, Duration::from_secs(1)));
        assert!(result.is_err());
    }

    #[test]
    fn test_opens_at_threshold() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(30));

        assert!(breaker.record_failure(&timeout()));
        assert!(breaker.record_failure(&timeout()));
        assert_eq!(breaker.state(), State::Closed);
        assert!(breaker.allow_request());

        assert!(breaker.record_failure(&timeout()));
        assert_eq!(breaker.state(), State::Open);
        assert_eq!(breaker.state_fast(), State::Open);
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_success_resets_count() {
        let (breaker, _clock) = breaker(3, Duration::from_secs(30));
        breaker.record_failure(&timeout());
        breaker.record_failure(&timeout());
        breaker.record_success();
        breaker.record_failure(&timeout());
        breaker.record_failure(&timeout());

        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[test]
    fn test_unexpected_failure_is_not_counted() {
        let (breaker, _clock) = breaker(1, Duration::from_secs(30));
        let not_found = io::Error::from(io::ErrorKind::NotFound);

        assert!(!breaker.record_failure(&not_found));
        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_recovers_through_half_open_probe() {
        let (breaker, clock) = breaker(1, Duration::from_secs(90));
        breaker.record_failure(&timeout());

        clock.advance(Duration::from_secs(89));
        assert!(!breaker.allow_request());
        assert_eq!(breaker.state(), State::Open);

        clock.advance(Duration::from_secs(1));
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), State::HalfOpen);
        assert!(!breaker.allow_request(), "second probe must be refused");

        breaker.record_success();
        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.failure_count(), 0);

        let stats = breaker.stats();
        assert_eq!(stats.trips, 1);
        assert_eq!(stats.recoveries, 1);
        assert_eq!(stats.rejected, 2);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let (breaker, clock) = breaker(2, Duration::from_secs(10));
        breaker.record_failure(&timeout());
        breaker.record_failure(&timeout());
        clock.advance(Duration::from_secs(10));

        assert!(breaker.allow_request());
        breaker.record_failure(&timeout());

        assert_eq!(breaker.state(), State::Open);
        assert!(!breaker.allow_request());
        clock.advance(Duration::from_secs(10));
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_rejection_carries_retry_after() {
        let (breaker, clock) = breaker(1, Duration::from_secs(120));
        breaker.record_failure(&timeout());
        clock.advance(Duration::from_secs(45));

        let rejection = breaker.try_acquire().unwrap_err();
        assert_eq!(rejection.state, State::Open);
        assert_eq!(rejection.retry_after, Some(Duration::from_secs(75)));
        assert_eq!(rejection.resource, "test");
    }

    #[test]
    fn test_unexpected_probe_failure_frees_slot() {
        let (breaker, clock) = breaker(1, Duration::from_secs(5));
        breaker.record_failure(&timeout());
        clock.advance(Duration::from_secs(5));

        let permit = breaker.try_acquire().unwrap();
        assert!(permit.is_probe());
        permit.failure(&io::Error::from(io::ErrorKind::InvalidInput));

        assert_eq!(breaker.state(), State::HalfOpen);
        assert!(breaker.allow_request(), "slot must be free again");
    }

    #[test]
    fn test_unexpected_failure_after_allow_request_frees_slot() {
        let (breaker, clock) = breaker(1, Duration::from_secs(10));
        breaker.record_failure(&timeout());
        clock.advance(Duration::from_secs(10));

        assert!(breaker.allow_request());
        assert!(!breaker.record_failure(&io::Error::from(io::ErrorKind::InvalidInput)));

        assert_eq!(breaker.state(), State::HalfOpen);
        assert!(!breaker.stats().probe_in_flight);
        assert!(breaker.allow_request());
        assert!(!breaker.allow_request());
    }

    #[test]
    fn test_late_failure_while_open_keeps_count() {
        let (breaker, clock) = breaker(2, Duration::from_secs(30));
        let late = breaker.try_acquire().unwrap();
        breaker.record_failure(&timeout());
        breaker.record_failure(&timeout());
        assert_eq!(breaker.state(), State::Open);

        clock.advance(Duration::from_secs(20));
        late.failure(&timeout());

        let stats = breaker.stats();
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.trips, 1);
        assert_eq!(stats.last_failure_age, Some(Duration::ZERO));
        clock.advance(Duration::from_secs(20));
        assert!(!breaker.allow_request(), "window restarts at the late failure");
    }

    #[test]
    fn test_dropped_probe_is_not_recorded_by_default() {
        let (breaker, clock) = breaker(1, Duration::from_secs(5));
        breaker.record_failure(&timeout());
        clock.advance(Duration::from_secs(5));

        drop(breaker.try_acquire().unwrap());

        assert_eq!(breaker.state(), State::HalfOpen);
        assert!(!breaker.stats().probe_in_flight);
    }

    #[test]
    fn test_dropped_probe_counts_when_cancellation_expected() {
        let clock = ManualClock::new();
        let config = CircuitBreakerConfig::new(1, Duration::from_secs(5))
            .with_expected_failures(ExpectedFailures::default().with(FailureKind::Cancelled));
        let breaker = CircuitBreaker::new("db", config)
            .unwrap()
            .with_clock(clock.shared());
        breaker.record_failure(&timeout());
        clock.advance(Duration::from_secs(5));

        breaker.try_acquire().unwrap().cancelled();

        assert_eq!(breaker.state(), State::Open);
    }

    #[test]
    fn test_reset_closes() {
        let (breaker, _clock) = breaker(1, Duration::from_secs(3600));
        breaker.record_failure(&timeout());
        assert_eq!(breaker.state(), State::Open);

        breaker.reset();

        assert_eq!(breaker.state(), State::Closed);
        assert_eq!(breaker.failure_count(), 0);
        assert!(breaker.allow_request());
    }

    #[test]
    fn test_state_changes_reach_hooks() {
        let metrics = Arc::new(MetricsHook::new());
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new("llm", CircuitBreakerConfig::new(1, Duration::from_secs(1)))
            .unwrap()
            .with_clock(clock.shared())
            .with_hooks(ObservabilityHooks::new().with_hook(metrics.clone()));

        breaker.record_failure(&timeout());
        assert!(!breaker.allow_request());
        clock.advance(Duration::from_secs(1));
        assert!(breaker.allow_request());
        breaker.record_success();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.trips, 1);
        assert_eq!(snapshot.recoveries, 1);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.breaker_states.get("llm"), Some(&State::Closed));
    }

    #[tokio::test]
    async fn test_call_records_outcomes() {
        let (breaker, _clock) = breaker(2, Duration::from_secs(30));

        let ok: ResilienceResult<u32, io::Error> = breaker.call(|| async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        for _ in 0..2 {
            let err = breaker
                .call(|| async { Err::<(), _>(timeout()) })
                .await
                .unwrap_err();
            assert!(matches!(err, ResilienceError::Operation(_)));
        }

        let rejected = breaker
            .call(|| async { Ok::<_, io::Error>(()) })
            .await
            .unwrap_err();
        assert!(rejected.is_circuit_open());
    }

    #[test]
    fn test_call_blocking_fails_fast_when_open() {
        let (breaker, _clock) = breaker(1, Duration::from_secs(30));
        breaker.record_failure(&timeout());

        let mut invoked = false;
        let result: ResilienceResult<(), io::Error> = breaker.call_blocking(|| {
            invoked = true;
            Ok(())
        });

        assert!(result.unwrap_err().is_circuit_open());
        assert!(!invoked);
    }
}
