//! Resilient caller: circuit breaker around retry around one unit of work
//!
//! The breaker is the outer gate and is asked again before every attempt,
//! so a breaker that trips mid-sequence stops the remaining retries. Each
//! attempt's outcome is recorded to the breaker individually. An optional
//! per-attempt timeout wraps only the unit of work and counts as a
//! [`FailureKind::Timeout`](crate::core::classify::FailureKind::Timeout)
//! failure.
//!
//! Dropping a call future, or cancelling it through
//! [`ResilientCaller::call_with_cancellation`], abandons the attempt in
//! flight. The breaker records it as a failure only when `Cancelled` is one
//! of its expected kinds; otherwise nothing is recorded and a held probe
//! slot is freed.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::classify::Classify;
use crate::core::config::{CallerConfig, ResilienceConfig, ResilienceSettings};
use crate::core::error::{ConfigResult, ResilienceError, ResilienceResult};
use crate::observability::{ObservabilityHooks, PatternEvent};
use crate::patterns::circuit_breaker::{CircuitBreaker, Permit};
use crate::patterns::retry::{NoObserver, RetryObserver, RetryPolicy, Step};

/// Substitute result for a call that could not complete
pub trait Fallback<T, E>: Send + Sync {
    /// Produce a degraded result from the terminal `error`.
    fn fallback(&self, error: ResilienceError<E>) -> ResilienceResult<T, E>;
}

impl<T, E, F> Fallback<T, E> for F
where
    F: Fn(ResilienceError<E>) -> ResilienceResult<T, E> + Send + Sync,
{
    fn fallback(&self, error: ResilienceError<E>) -> ResilienceResult<T, E> {
        self(error)
    }
}

/// Composed call protection for one resource
pub struct ResilientCaller<T, E, O = NoObserver> {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy<O>,
    timeout: Option<Duration>,
    fallback: Option<Arc<dyn Fallback<T, E>>>,
    hooks: ObservabilityHooks,
}

impl<T, E, O> Clone for ResilientCaller<T, E, O>
where
    O: Clone,
{
    fn clone(&self) -> Self {
        Self {
            breaker: Arc::clone(&self.breaker),
            retry: self.retry.clone(),
            timeout: self.timeout,
            fallback: self.fallback.clone(),
            hooks: self.hooks.clone(),
        }
    }
}

impl<T, E, O> fmt::Debug for ResilientCaller<T, E, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientCaller")
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<T, E> ResilientCaller<T, E> {
    /// Start building a caller around `breaker`.
    pub fn builder(breaker: Arc<CircuitBreaker>) -> ResilientCallerBuilder<T, E> {
        ResilientCallerBuilder {
            breaker,
            retry: RetryPolicy::default(),
            timeout: None,
            fallback: None,
            hooks: ObservabilityHooks::default(),
        }
    }

    /// Caller for `resource` with a fresh breaker and retry policy from
    /// `settings`.
    pub fn from_settings(
        resource: impl Into<String>,
        settings: &ResilienceSettings,
    ) -> ConfigResult<Self> {
        settings.validate()?;
        let resource = resource.into();
        let breaker = CircuitBreaker::new(resource.clone(), settings.circuit_breaker.clone())?;
        let retry = RetryPolicy::from_config(&settings.retry)?.with_name(resource);
        Self::builder(Arc::new(breaker))
            .retry(retry)
            .config(&settings.caller)
            .build()
    }
}

impl<T, E, O> ResilientCaller<T, E, O> {
    /// Shared breaker.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Retry policy applied inside the breaker.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy<O> {
        &self.retry
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Whether a fallback is configured.
    #[must_use]
    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

impl<T, E, O> ResilientCaller<T, E, O>
where
    E: Classify,
    O: RetryObserver<E>,
{
    /// Run `operation` under the breaker and retry policy.
    ///
    /// Without a fallback, a rejection surfaces as
    /// [`ResilienceError::CircuitOpen`] and a spent retry budget as
    /// [`ResilienceError::MaxRetriesExceeded`]. Unexpected failures always
    /// propagate unchanged and never reach the fallback.
    #[tracing::instrument(skip_all, fields(resource = %self.breaker.name()))]
    pub async fn call<F, Fut>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let result = self.run(operation).await;
        self.finish(result)
    }

    /// Like [`call`](Self::call), abandoning the call when `token` fires.
    ///
    /// A cancelled call returns [`ResilienceError::Cancelled`]; the fallback
    /// is not consulted.
    #[tracing::instrument(skip_all, fields(resource = %self.breaker.name()))]
    pub async fn call_with_cancellation<F, Fut>(
        &self,
        token: &CancellationToken,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                info!("resilient call cancelled");
                Err(ResilienceError::Cancelled)
            }
            result = self.run(operation) => self.finish(result),
        }
    }

    async fn run<F, Fut>(&self, mut operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            let permit = match self.breaker.try_acquire() {
                Ok(permit) => permit,
                Err(rejection) => {
                    if attempt > 1 {
                        debug!(attempt, "breaker opened mid-sequence, abandoning retries");
                    }
                    return Err(rejection.into());
                }
            };
            let error = match self.attempt(permit, &mut operation).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            match self.retry.after_failure(attempt, error) {
                Step::Retry(delay) => tokio::time::sleep(delay).await,
                Step::Fail(error) => return Err(error),
            }
            attempt += 1;
        }
    }

    async fn attempt<F, Fut>(&self, permit: Permit<'_>, operation: &mut F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, operation()).await {
                Ok(result) => result.map_err(ResilienceError::Operation),
                Err(_elapsed) => {
                    debug!(timeout_ms = limit.as_millis(), "attempt timed out");
                    self.hooks.emit(PatternEvent::TimeoutOccurred {
                        operation: self.breaker.name().to_string(),
                        timeout: limit,
                    });
                    Err(ResilienceError::Timeout { after: limit })
                }
            },
            None => operation().await.map_err(ResilienceError::Operation),
        };
        permit.settle(&outcome);
        outcome
    }

    fn finish(&self, result: ResilienceResult<T, E>) -> ResilienceResult<T, E> {
        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };
        let Some(fallback) = self.fallback.as_ref() else {
            return Err(error);
        };
        if !self.wants_fallback(&error) {
            return Err(error);
        }
        let kind = error.failure_kind();
        info!(resource = %self.breaker.name(), %kind, "using fallback");
        self.hooks.emit(PatternEvent::FallbackUsed {
            resource: self.breaker.name().to_string(),
            kind,
        });
        fallback.fallback(error)
    }

    fn wants_fallback(&self, error: &ResilienceError<E>) -> bool {
        match error {
            ResilienceError::CircuitOpen { .. } | ResilienceError::MaxRetriesExceeded { .. } => {
                true
            }
            ResilienceError::Cancelled => false,
            // Single-attempt policies surface expected failures unwrapped.
            other => self
                .retry
                .expected_failures()
                .contains(other.failure_kind()),
        }
    }
}

/// Builder for [`ResilientCaller`]
pub struct ResilientCallerBuilder<T, E, O = NoObserver> {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy<O>,
    timeout: Option<Duration>,
    fallback: Option<Arc<dyn Fallback<T, E>>>,
    hooks: ObservabilityHooks,
}

impl<T, E, O> fmt::Debug for ResilientCallerBuilder<T, E, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientCallerBuilder")
            .field("breaker", &self.breaker.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<T, E, O> ResilientCallerBuilder<T, E, O> {
    /// Retry policy run inside the breaker.
    pub fn retry<P>(self, retry: RetryPolicy<P>) -> ResilientCallerBuilder<T, E, P> {
        ResilientCallerBuilder {
            breaker: self.breaker,
            retry,
            timeout: self.timeout,
            fallback: self.fallback,
            hooks: self.hooks,
        }
    }

    /// Per-attempt timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Apply a config block.
    #[must_use]
    pub fn config(mut self, config: &CallerConfig) -> Self {
        self.timeout = config.timeout;
        self
    }

    /// Substitute result for rejected or exhausted calls.
    #[must_use]
    pub fn fallback<F>(self, fallback: F) -> Self
    where
        F: Fn(ResilienceError<E>) -> ResilienceResult<T, E> + Send + Sync + 'static,
    {
        self.fallback_with(fallback)
    }

    /// Like [`fallback`](Self::fallback), for any [`Fallback`] implementation.
    #[must_use]
    pub fn fallback_with(mut self, fallback: impl Fallback<T, E> + 'static) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Attach observability hooks for timeout and fallback events.
    #[must_use]
    pub fn hooks(mut self, hooks: ObservabilityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate and build.
    pub fn build(self) -> ConfigResult<ResilientCaller<T, E, O>> {
        CallerConfig {
            timeout: self.timeout,
        }
        .validate()?;
        Ok(ResilientCaller {
            breaker: self.breaker,
            retry: self.retry,
            timeout: self.timeout,
            fallback: self.fallback,
            hooks: self.hooks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::FailureKind;
    use crate::core::config::CircuitBreakerConfig;
    use crate::patterns::backoff::Backoff;
    use crate::patterns::circuit_breaker::State;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(
            CircuitBreaker::new(
                "backend",
                CircuitBreakerConfig::new(threshold, Duration::from_secs(60)),
            )
            .unwrap(),
        )
    }

    fn retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Backoff::none()).unwrap()
    }

    fn unavailable() -> io::Error {
        io::Error::from(io::ErrorKind::ConnectionReset)
    }

    #[tokio::test]
    async fn test_records_every_attempt_against_breaker() {
        let breaker = breaker(10);
        let caller = ResilientCaller::<(), io::Error>::builder(Arc::clone(&breaker))
            .retry(retry(3))
            .build()
            .unwrap();

        let err = caller
            .call(|| async { Err(unavailable()) })
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), Some(3));
        assert_eq!(breaker.failure_count(), 3);
    }

    #[tokio::test]
    async fn test_trip_mid_sequence_stops_retrying() {
        let breaker = breaker(2);
        let calls = AtomicU32::new(0);
        let caller = ResilientCaller::<(), io::Error>::builder(Arc::clone(&breaker))
            .retry(retry(5))
            .build()
            .unwrap();

        let err = caller
            .call(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), State::Open);
    }

    #[tokio::test]
    async fn test_unexpected_error_skips_fallback() {
        let caller = ResilientCaller::<u32, io::Error>::builder(breaker(5))
            .retry(retry(3))
            .fallback(|_err| Ok(0))
            .build()
            .unwrap();

        let err = caller
            .call(|| async { Err(io::Error::from(io::ErrorKind::InvalidData)) })
            .await
            .unwrap_err();

        assert!(matches!(err, ResilienceError::Operation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let breaker = breaker(5);
        let caller = ResilientCaller::<(), io::Error>::builder(Arc::clone(&breaker))
            .retry(retry(2))
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();

        let err = caller
            .call(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            })
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::Timeout);
        assert_eq!(breaker.failure_count(), 2);
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let result = ResilientCaller::<(), io::Error>::builder(breaker(1))
            .timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }
}
