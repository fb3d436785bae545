//! Retry policy
//!
//! A [`RetryPolicy`] re-runs a unit of work until it succeeds, fails with an
//! unexpected error, or runs out of attempts. It holds no state between
//! calls, so one policy can be shared by any number of concurrent callers.
//!
//! Attempts are numbered from 1. After failed attempt `n` the policy sleeps
//! `backoff.delay_for(n)`: `tokio::time::sleep` in [`RetryPolicy::execute`],
//! `std::thread::sleep` in [`RetryPolicy::execute_blocking`].

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::backoff::Backoff;
use crate::core::classify::{Classify, ExpectedFailures};
use crate::core::config::RetryConfig;
use crate::core::error::{ConfigError, ConfigResult, ResilienceError, ResilienceResult};
use crate::observability::{ObservabilityHooks, PatternEvent};

/// Observer told about every failed attempt that will be retried
pub trait RetryObserver<E>: Send + Sync {
    /// `attempt` is the number of the attempt that just failed.
    fn on_retry(&self, attempt: u32, error: &ResilienceError<E>);
}

/// Observer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

impl<E> RetryObserver<E> for NoObserver {
    fn on_retry(&self, _attempt: u32, _error: &ResilienceError<E>) {}
}

/// Observer backed by a closure, see [`RetryPolicy::on_retry`]
#[derive(Clone)]
pub struct OnRetry<F>(F);

impl<F> fmt::Debug for OnRetry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OnRetry(..)")
    }
}

impl<E, F> RetryObserver<E> for OnRetry<F>
where
    F: Fn(u32, &ResilienceError<E>) + Send + Sync,
{
    fn on_retry(&self, attempt: u32, error: &ResilienceError<E>) {
        (self.0)(attempt, error);
    }
}

impl<E, O: RetryObserver<E> + ?Sized> RetryObserver<E> for Arc<O> {
    fn on_retry(&self, attempt: u32, error: &ResilienceError<E>) {
        (**self).on_retry(attempt, error);
    }
}

/// What to do after a failed attempt.
pub(crate) enum Step<E> {
    /// Sleep, then run the next attempt
    Retry(Duration),
    /// Stop and surface this error
    Fail(ResilienceError<E>),
}

/// Retry policy
#[derive(Clone)]
pub struct RetryPolicy<O = NoObserver> {
    name: String,
    max_attempts: u32,
    backoff: Backoff,
    expected_failures: ExpectedFailures,
    hooks: ObservabilityHooks,
    observer: O,
}

impl<O> fmt::Debug for RetryPolicy<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("expected_failures", &self.expected_failures)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Policy making up to `max_attempts` attempts with `backoff` between them.
    pub fn new(max_attempts: u32, backoff: Backoff) -> ConfigResult<Self> {
        if max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be at least 1"));
        }
        Ok(Self {
            name: "retry".to_string(),
            max_attempts,
            backoff,
            expected_failures: ExpectedFailures::default(),
            hooks: ObservabilityHooks::default(),
            observer: NoObserver,
        })
    }

    /// Build from a config block.
    pub fn from_config(config: &RetryConfig) -> ConfigResult<Self> {
        let policy = Self::new(config.max_attempts, Backoff::from_config(&config.backoff)?)?;
        Ok(policy.with_expected_failures(config.expected_failures.clone()))
    }

    /// Single attempt, no retries.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            name: "retry".to_string(),
            max_attempts: 1,
            backoff: Backoff::none(),
            expected_failures: ExpectedFailures::default(),
            hooks: ObservabilityHooks::default(),
            observer: NoObserver,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            name: "retry".to_string(),
            max_attempts: crate::core::constants::DEFAULT_RETRY_ATTEMPTS,
            backoff: Backoff::default(),
            expected_failures: ExpectedFailures::default(),
            hooks: ObservabilityHooks::default(),
            observer: NoObserver,
        }
    }
}

impl<O> RetryPolicy<O> {
    /// Name used in logs and events.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the retried failure kinds.
    #[must_use]
    pub fn with_expected_failures(mut self, expected: ExpectedFailures) -> Self {
        self.expected_failures = expected;
        self
    }

    /// Attach observability hooks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: ObservabilityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Replace the observer.
    pub fn with_observer<P>(self, observer: P) -> RetryPolicy<P> {
        RetryPolicy {
            name: self.name,
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            expected_failures: self.expected_failures,
            hooks: self.hooks,
            observer,
        }
    }

    /// Call `f(attempt, &error)` before sleeping after each failed attempt.
    ///
    /// A panic inside `f` is caught; it never replaces the retried error.
    pub fn on_retry<F>(self, f: F) -> RetryPolicy<OnRetry<F>> {
        self.with_observer(OnRetry(f))
    }

    /// Name used in logs and events.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total attempts including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay strategy.
    #[must_use]
    pub const fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Retried failure kinds.
    #[must_use]
    pub const fn expected_failures(&self) -> &ExpectedFailures {
        &self.expected_failures
    }

    /// Unjittered delays this policy would sleep, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let retries = usize::try_from(self.max_attempts.saturating_sub(1)).unwrap_or(usize::MAX);
        self.backoff.delays().take(retries)
    }

    /// Run `operation` until it succeeds or the policy gives up.
    ///
    /// Unexpected failures return as [`ResilienceError::Operation`] right
    /// away. Running out of attempts returns
    /// [`ResilienceError::MaxRetriesExceeded`], except with a single-attempt
    /// policy, where the error comes back exactly as a direct call would
    /// produce it.
    #[tracing::instrument(skip(self, operation), fields(operation = %self.name, max_attempts = self.max_attempts))]
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> ResilienceResult<T, E>
    where
        E: Classify,
        O: RetryObserver<E>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => ResilienceError::Operation(error),
            };
            match self.after_failure(attempt, error) {
                Step::Retry(delay) => tokio::time::sleep(delay).await,
                Step::Fail(error) => return Err(error),
            }
            attempt += 1;
        }
    }

    /// Blocking variant of [`execute`](Self::execute).
    pub fn execute_blocking<T, E, F>(&self, mut operation: F) -> ResilienceResult<T, E>
    where
        E: Classify,
        O: RetryObserver<E>,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation() {
                Ok(value) => return Ok(value),
                Err(error) => ResilienceError::Operation(error),
            };
            match self.after_failure(attempt, error) {
                Step::Retry(delay) => std::thread::sleep(delay),
                Step::Fail(error) => return Err(error),
            }
            attempt += 1;
        }
    }

    /// Decide what follows failed attempt `attempt`.
    pub(crate) fn after_failure<E>(&self, attempt: u32, error: ResilienceError<E>) -> Step<E>
    where
        E: Classify,
        O: RetryObserver<E>,
    {
        let kind = error.failure_kind();
        if !self.expected_failures.contains(kind) {
            debug!(operation = %self.name, attempt, %kind, "not retrying unexpected failure");
            return Step::Fail(error);
        }
        if attempt >= self.max_attempts {
            return Step::Fail(self.exhausted(attempt, error));
        }

        let delay = self.backoff.delay_for(attempt);
        self.notify(attempt, &error);
        debug!(
            operation = %self.name,
            attempt,
            max_attempts = self.max_attempts,
            %kind,
            delay_ms = delay.as_millis(),
            "attempt failed, retrying after delay"
        );
        self.hooks.emit(PatternEvent::RetryAttempt {
            operation: self.name.clone(),
            attempt,
            max_attempts: self.max_attempts,
            kind,
            delay,
        });
        Step::Retry(delay)
    }

    /// Wrap the final error once the budget is spent.
    pub(crate) fn exhausted<E: Classify>(
        &self,
        attempts: u32,
        last: ResilienceError<E>,
    ) -> ResilienceError<E> {
        if attempts <= 1 {
            return last;
        }
        let kind = last.failure_kind();
        warn!(operation = %self.name, attempts, %kind, "retry limit exceeded");
        self.hooks.emit(PatternEvent::RetriesExhausted {
            operation: self.name.clone(),
            attempts,
            kind,
        });
        ResilienceError::MaxRetriesExceeded {
            attempts,
            last: Box::new(last),
        }
    }

    fn notify<E>(&self, attempt: u32, error: &ResilienceError<E>)
    where
        O: RetryObserver<E>,
    {
        let observed = catch_unwind(AssertUnwindSafe(|| self.observer.on_retry(attempt, error)));
        if observed.is_err() {
            warn!(operation = %self.name, attempt, "retry observer panicked");
        }
    }
}
