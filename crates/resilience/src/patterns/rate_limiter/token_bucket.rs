//! Token bucket used for every rate-limited client

use std::time::{Duration, Instant};

/// Classic token bucket.
///
/// The bucket itself is not synchronized; [`RateLimiter`](super::RateLimiter)
/// keeps each one behind its client's lock. Tokens always stay within
/// `[0, capacity]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Full bucket of `capacity` tokens refilled at `refill_rate` per second.
    #[must_use]
    pub fn new(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        let capacity = f64::from(capacity);
        Self {
            tokens: capacity,
            capacity,
            refill_rate: sanitize_rate(refill_rate),
            last_refill: now,
        }
    }

    /// Add `elapsed * refill_rate` tokens, capped at capacity.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if self.refill_rate > 0.0 {
            let added = elapsed.as_secs_f64() * self.refill_rate;
            self.tokens = (self.tokens + added).min(self.capacity);
        }
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    /// Refill, then take one token if available.
    pub fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one token is available; `None` if the bucket never refills.
    #[must_use]
    pub fn time_until_token(&self) -> Option<Duration> {
        if self.tokens >= 1.0 {
            return Some(Duration::ZERO);
        }
        if self.refill_rate <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64((1.0 - self.tokens) / self.refill_rate).ok()
    }

    /// Tokens currently held.
    #[must_use]
    pub const fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Burst size.
    #[must_use]
    pub const fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Tokens added per second.
    #[must_use]
    pub const fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Change the burst size, dropping tokens above the new capacity.
    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = f64::from(capacity);
        self.tokens = self.tokens.min(self.capacity);
    }

    /// Change the refill rate. Accrued time is settled at the old rate first.
    pub fn set_refill_rate(&mut self, refill_rate: f64, now: Instant) {
        self.refill(now);
        self.refill_rate = sanitize_rate(refill_rate);
    }

    /// Add `tokens`, capped at capacity. Returns the new level.
    pub fn grant(&mut self, tokens: u32) -> f64 {
        self.tokens = (self.tokens + f64::from(tokens)).min(self.capacity);
        self.tokens
    }

    /// Refill to capacity.
    pub fn fill(&mut self, now: Instant) {
        self.tokens = self.capacity;
        self.last_refill = now;
    }
}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 { rate } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_full_and_drains() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(3, 0.0, now);

        assert!(bucket.try_take(now));
        assert!(bucket.try_take(now));
        assert!(bucket.try_take(now));
        assert!(!bucket.try_take(now));
        assert!(bucket.tokens() >= 0.0);
        assert_eq!(bucket.time_until_token(), None);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(5, 2.0, start);
        for _ in 0..5 {
            assert!(bucket.try_take(start));
        }

        bucket.refill(start + Duration::from_secs(1));
        assert!((bucket.tokens() - 2.0).abs() < 1e-9);

        bucket.refill(start + Duration::from_secs(3600));
        assert!((bucket.tokens() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_until_token() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1, 4.0, start);
        assert!(bucket.try_take(start));

        assert_eq!(bucket.time_until_token(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_capacity_change_clamps_tokens() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new(10, 1.0, now);
        bucket.set_capacity(4);
        assert!((bucket.tokens() - 4.0).abs() < 1e-9);
        assert!((bucket.grant(100) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let start = Instant::now() + Duration::from_secs(10);
        let mut bucket = TokenBucket::new(2, 1.0, start);
        assert!(bucket.try_take(start));
        bucket.refill(start - Duration::from_secs(5));
        assert!((bucket.tokens() - 1.0).abs() < 1e-9);
    }
}
