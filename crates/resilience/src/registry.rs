//! Named breaker registry
//!
//! Owns one [`CircuitBreaker`] per protected resource. Each component that
//! makes outbound calls holds (or is handed) a registry and asks it for the
//! breaker of the resource it is about to call.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::core::clock::{self, Clock};
use crate::core::config::{CircuitBreakerConfig, ResilienceConfig};
use crate::core::error::ConfigResult;
use crate::observability::ObservabilityHooks;
use crate::patterns::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};

/// One circuit breaker per resource name
pub struct BreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
    hooks: ObservabilityHooks,
}

impl fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("default_config", &self.default_config)
            .field("resources", &self.breakers.len())
            .finish_non_exhaustive()
    }
}

impl BreakerRegistry {
    /// Registry whose breakers start from `default_config`.
    pub fn new(default_config: CircuitBreakerConfig) -> ConfigResult<Self> {
        default_config.validate()?;
        Ok(Self {
            default_config,
            breakers: DashMap::new(),
            clock: clock::system(),
            hooks: ObservabilityHooks::default(),
        })
    }

    /// Time source handed to every breaker created from now on.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Hooks handed to every breaker created from now on.
    #[must_use]
    pub fn with_hooks(mut self, hooks: ObservabilityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Breaker for `resource`, created with the default config if missing.
    pub fn get_or_create(&self, resource: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(resource) {
            return Arc::clone(breaker.value());
        }
        let breaker = self
            .breakers
            .entry(resource.to_string())
            .or_insert_with(|| self.build(resource.to_string(), self.default_config.clone()));
        Arc::clone(breaker.value())
    }

    /// Install a breaker for `resource` with its own config.
    ///
    /// Replaces any existing breaker; holders of the old one keep using it.
    pub fn register(
        &self,
        resource: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<Arc<CircuitBreaker>> {
        config.validate()?;
        let resource = resource.into();
        let breaker = self.build(resource.clone(), config);
        self.breakers.insert(resource, Arc::clone(&breaker));
        Ok(breaker)
    }

    fn build(&self, resource: String, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        Arc::new(
            CircuitBreaker::from_validated(resource, config)
                .with_clock(Arc::clone(&self.clock))
                .with_hooks(self.hooks.clone()),
        )
    }

    /// Breaker for `resource`, if one exists.
    #[must_use]
    pub fn get(&self, resource: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(resource).map(|b| Arc::clone(b.value()))
    }

    /// Drop the breaker for `resource`.
    pub fn remove(&self, resource: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(resource).map(|(_, breaker)| breaker)
    }

    /// Reset one breaker. Returns `false` for unknown resources.
    pub fn reset(&self, resource: &str) -> bool {
        match self.get(resource) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Reset every breaker.
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.iter().map(|b| Arc::clone(b.value())).collect();
        info!(count = breakers.len(), "resetting all circuit breakers");
        for breaker in breakers {
            breaker.reset();
        }
    }

    /// Stats of every breaker, keyed by resource.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, CircuitBreakerStats> {
        self.breakers
            .iter()
            .map(|b| (b.key().clone(), b.value().stats()))
            .collect()
    }

    /// Registered resource names.
    #[must_use]
    pub fn resources(&self) -> Vec<String> {
        self.breakers.iter().map(|b| b.key().clone()).collect()
    }

    /// Number of registered resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether no resource is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self {
            default_config: CircuitBreakerConfig::default(),
            breakers: DashMap::new(),
            clock: clock::system(),
            hooks: ObservabilityHooks::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::patterns::circuit_breaker::State;
    use std::io;
    use std::time::Duration;

    fn failure() -> io::Error {
        io::Error::from(io::ErrorKind::TimedOut)
    }

    #[test]
    fn test_same_resource_shares_breaker() {
        let registry = BreakerRegistry::default();
        let a = registry.get_or_create("postgres");
        let b = registry.get_or_create("postgres");
        let other = registry.get_or_create("openai");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_resources_trip_independently() {
        let registry =
            BreakerRegistry::new(CircuitBreakerConfig::new(1, Duration::from_secs(60))).unwrap();
        registry.get_or_create("mcp-peer").record_failure(&failure());

        assert_eq!(registry.get_or_create("mcp-peer").state(), State::Open);
        assert_eq!(registry.get_or_create("postgres").state(), State::Closed);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot["mcp-peer"].trips, 1);
        assert_eq!(snapshot["postgres"].trips, 0);
    }

    #[test]
    fn test_register_overrides_defaults() {
        let clock = ManualClock::new();
        let registry = BreakerRegistry::default().with_clock(clock.shared());
        let breaker = registry
            .register("slow-api", CircuitBreakerConfig::new(2, Duration::from_secs(300)))
            .unwrap();

        assert_eq!(breaker.config().failure_threshold, 2);
        assert!(registry.register("bad", CircuitBreakerConfig::new(0, Duration::from_secs(1))).is_err());
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn test_reset_and_reset_all() {
        let registry =
            BreakerRegistry::new(CircuitBreakerConfig::new(1, Duration::from_secs(60))).unwrap();
        registry.get_or_create("a").record_failure(&failure());
        registry.get_or_create("b").record_failure(&failure());

        assert!(registry.reset("a"));
        assert!(!registry.reset("missing"));
        assert_eq!(registry.get("a").unwrap().state(), State::Closed);
        assert_eq!(registry.get("b").unwrap().state(), State::Open);

        registry.reset_all();
        assert_eq!(registry.get("b").unwrap().state(), State::Closed);
        assert!(registry.remove("b").is_some());
        assert_eq!(registry.resources(), vec!["a".to_string()]);
    }
}
