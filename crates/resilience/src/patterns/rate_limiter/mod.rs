//! Per-client rate limiting
//!
//! [`RateLimiter`] keeps one [`TokenBucket`] per client key, created full on
//! first sight. Buckets live in a `DashMap` of individually locked entries,
//! so unrelated clients never contend. The aggregate counters are updated
//! while the deciding client's lock is still held, which keeps
//! `allowed_requests + denied_requests == total_requests` exact for every
//! client and for the aggregate at any observation point.
//!
//! Exempt clients are admitted without touching a bucket and are not counted
//! in any statistic.

mod token_bucket;

pub use token_bucket::TokenBucket;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::clock::{self, Clock};
use crate::core::config::{RateLimiterConfig, ResilienceConfig};
use crate::core::error::{ConfigError, ConfigResult, RateLimitExceeded};
use crate::observability::{ObservabilityHooks, PatternEvent};

/// Admission counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterStats {
    /// Every counted request
    pub total_requests: u64,
    /// Requests that got a token
    pub allowed_requests: u64,
    /// Requests refused for lack of a token
    pub denied_requests: u64,
}

impl RateLimiterStats {
    fn record(&mut self, allowed: bool) {
        self.total_requests += 1;
        if allowed {
            self.allowed_requests += 1;
        } else {
            self.denied_requests += 1;
        }
    }

    /// Fraction of counted requests that were denied.
    #[must_use]
    pub fn denial_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.denied_requests as f64 / self.total_requests as f64
        }
    }
}

/// Manual quota change for one client.
///
/// `None` fields keep the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaOverride {
    /// New burst size
    pub capacity: Option<u32>,
    /// New refill rate in tokens per second
    pub refill_per_second: Option<f64>,
}

impl QuotaOverride {
    /// Override only the burst size.
    #[must_use]
    pub const fn capacity(capacity: u32) -> Self {
        Self {
            capacity: Some(capacity),
            refill_per_second: None,
        }
    }

    /// Override only the refill rate.
    #[must_use]
    pub const fn refill_per_second(rate: f64) -> Self {
        Self {
            capacity: None,
            refill_per_second: Some(rate),
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.capacity == Some(0) {
            return Err(ConfigError::invalid("capacity", "must be at least 1"));
        }
        if let Some(rate) = self.refill_per_second
            && (!rate.is_finite() || rate < 0.0)
        {
            return Err(ConfigError::invalid(
                "refill_per_second",
                "must be a finite, non-negative number",
            ));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct ClientEntry {
    bucket: TokenBucket,
    stats: RateLimiterStats,
}

struct Decision {
    allowed: bool,
    retry_after: Option<Duration>,
}

/// Per-client token bucket rate limiter
pub struct RateLimiter {
    capacity: u32,
    refill_per_second: f64,
    clients: DashMap<String, Arc<Mutex<ClientEntry>>>,
    exempt: RwLock<HashSet<String>>,
    // Locked after a client entry, never before.
    totals: Mutex<RateLimiterStats>,
    clock: Arc<dyn Clock>,
    hooks: ObservabilityHooks,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.capacity)
            .field("refill_per_second", &self.refill_per_second)
            .field("clients", &self.clients.len())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter, validating `config`.
    pub fn new(config: RateLimiterConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            capacity: config.capacity,
            refill_per_second: config.refill_per_second,
            clients: DashMap::new(),
            exempt: RwLock::new(config.exempt_client_ids.into_iter().collect()),
            totals: Mutex::new(RateLimiterStats::default()),
            clock: clock::system(),
            hooks: ObservabilityHooks::default(),
        })
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

    /// Admit or deny one request from `client_id`.
    pub fn allow(&self, client_id: &str) -> bool {
        self.decide(client_id).allowed
    }

    /// Like [`allow`](Self::allow), with a typed error on denial.
    pub fn check(&self, client_id: &str) -> Result<(), RateLimitExceeded> {
        let decision = self.decide(client_id);
        if decision.allowed {
            Ok(())
        } else {
            Err(RateLimitExceeded {
                client_id: client_id.to_string(),
                retry_after: decision.retry_after,
            })
        }
    }

    fn decide(&self, client_id: &str) -> Decision {
        if self.is_exempt(client_id) {
            return Decision {
                allowed: true,
                retry_after: None,
            };
        }

        let entry = self.entry(client_id);
        let decision = {
            let mut entry = entry.lock();
            let allowed = entry.bucket.try_take(self.clock.now());
            entry.stats.record(allowed);
            self.totals.lock().record(allowed);
            Decision {
                allowed,
                retry_after: if allowed {
                    None
                } else {
                    entry.bucket.time_until_token()
                },
            }
        };

        if !decision.allowed {
            debug!(client_id, retry_after = ?decision.retry_after, "rate limit exceeded");
        }
        self.hooks.emit(PatternEvent::RateLimitDecision {
            client_id: client_id.to_string(),
            allowed: decision.allowed,
        });
        decision
    }

    fn entry(&self, client_id: &str) -> Arc<Mutex<ClientEntry>> {
        if let Some(entry) = self.clients.get(client_id) {
            return Arc::clone(entry.value());
        }
        let entry = self
            .clients
            .entry(client_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ClientEntry {
                    bucket: TokenBucket::new(
                        self.capacity,
                        self.refill_per_second,
                        self.clock.now(),
                    ),
                    stats: RateLimiterStats::default(),
                }))
            });
        Arc::clone(entry.value())
    }

    /// Counters for one client, or the aggregate when `client_id` is `None`.
    ///
    /// Unknown and exempt clients report zeros.
    #[must_use]
    pub fn get_stats(&self, client_id: Option<&str>) -> RateLimiterStats {
        match client_id {
            Some(id) => self
                .clients
                .get(id)
                .map(|entry| Arc::clone(entry.value()))
                .map(|entry| entry.lock().stats)
                .unwrap_or_default(),
            None => *self.totals.lock(),
        }
    }

    /// Change one client's quota. Creates the client if unseen.
    pub fn adjust_quota(&self, client_id: &str, quota: QuotaOverride) -> ConfigResult<()> {
        quota.validate()?;
        let entry = self.entry(client_id);
        let mut entry = entry.lock();
        if let Some(rate) = quota.refill_per_second {
            entry.bucket.set_refill_rate(rate, self.clock.now());
        }
        if let Some(capacity) = quota.capacity {
            entry.bucket.set_capacity(capacity);
        }
        debug!(
            client_id,
            capacity = entry.bucket.capacity(),
            refill_per_second = entry.bucket.refill_rate(),
            "rate limit quota adjusted"
        );
        Ok(())
    }

    /// Top up a client's bucket, capped at its capacity. Returns the new level.
    pub fn grant(&self, client_id: &str, tokens: u32) -> f64 {
        let entry = self.entry(client_id);
        let mut entry = entry.lock();
        entry.bucket.refill(self.clock.now());
        entry.bucket.grant(tokens)
    }

    /// Refill a client's bucket to capacity. Counters are kept.
    pub fn reset_client(&self, client_id: &str) {
        if let Some(entry) = self.clients.get(client_id).map(|e| Arc::clone(e.value())) {
            entry.lock().bucket.fill(self.clock.now());
        }
    }

    /// Forget a client entirely. Its next request starts a fresh full bucket.
    ///
    /// The aggregate counters keep the evicted client's history.
    pub fn evict(&self, client_id: &str) -> bool {
        self.clients.remove(client_id).is_some()
    }

    /// Exempt a client from limiting.
    pub fn add_exempt(&self, client_id: impl Into<String>) {
        self.exempt.write().insert(client_id.into());
    }

    /// Subject a client to limiting again.
    pub fn remove_exempt(&self, client_id: &str) -> bool {
        self.exempt.write().remove(client_id)
    }

    /// Whether `client_id` bypasses limiting.
    #[must_use]
    pub fn is_exempt(&self, client_id: &str) -> bool {
        self.exempt.read().contains(client_id)
    }

    /// Current token level of a known client, refilled to now.
    #[must_use]
    pub fn tokens(&self, client_id: &str) -> Option<f64> {
        let entry = self.clients.get(client_id).map(|e| Arc::clone(e.value()))?;
        let mut entry = entry.lock();
        entry.bucket.refill(self.clock.now());
        Some(entry.bucket.tokens())
    }

    /// Known client keys.
    #[must_use]
    pub fn clients(&self) -> Vec<String> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of known clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}
