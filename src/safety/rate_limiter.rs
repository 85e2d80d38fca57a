//! Token-bucket rate limiting, one bucket per Policy (spec §4.3
//! `CheckRateLimit`). Mirrors the shared `Arc<RwLock<HashMap<...>>>`
//! isolation-tracking pattern used for per-pod state elsewhere in this
//! codebase: one process-wide map, keyed by the caller's identity, guarded
//! by a single lock.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

struct Bucket {
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(capacity: u32) -> Self {
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            last_refill: Instant::now(),
        }
    }

    /// Refills linearly assuming the full capacity is earned back over one
    /// rolling hour, then resizes if the Policy's configured capacity
    /// changed since the bucket was created.
    fn refill(&mut self, capacity: u32) {
        let capacity = capacity as f64;
        if (capacity - self.capacity).abs() > f64::EPSILON {
            self.capacity = capacity;
            self.tokens = self.tokens.min(capacity);
        }

        let elapsed = self.last_refill.elapsed().as_secs_f64();
        let refill_rate = self.capacity / 3600.0;
        self.tokens = (self.tokens + elapsed * refill_rate).min(self.capacity);
        self.last_refill = Instant::now();
    }
}

#[derive(Default)]
pub struct RateLimiter {
    buckets: Arc<RwLock<HashMap<String, Bucket>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Peeks at whether a token is available without consuming it.
    /// Tokens decrement only on [`RateLimiter::consume`], called when an
    /// Action is actually created.
    pub async fn check(&self, key: &str, capacity: u32) -> bool {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(capacity));
        bucket.refill(capacity);
        bucket.tokens >= 1.0
    }

    pub async fn consume(&self, key: &str, capacity: u32) {
        let mut buckets = self.buckets.write().await;
        let bucket = buckets
            .entry(key.to_string())
            .or_insert_with(|| Bucket::new(capacity));
        bucket.refill(capacity);
        bucket.tokens = (bucket.tokens - 1.0).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn denies_when_bucket_is_empty() {
        let limiter = RateLimiter::new();
        let key = "default/policy-a";
        assert!(limiter.check(key, 1).await);
        limiter.consume(key, 1).await;
        assert!(!limiter.check(key, 1).await);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new();
        limiter.consume("default/policy-a", 1).await;
        assert!(limiter.check("default/policy-b", 1).await);
    }
}
