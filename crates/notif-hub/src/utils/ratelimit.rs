/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Per-key token bucket rate limiting.
//!
//! Buckets live in a capacity-bounded cache so abandoned keys age out instead
//! of accumulating. Each API key gets its own bucket; a per-key rate override
//! from the key row takes precedence over the configured default.

use moka::sync::Cache;
use notif_utils::config::RateLimit as RateLimitConfig;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A single token bucket.
#[derive(Debug)]
struct Bucket {
    /// Tokens currently available.
    tokens: f64,
    /// Sustained refill rate, tokens per second.
    rate: f64,
    /// Bucket capacity.
    burst: f64,
    /// Last refill instant.
    last_refill: Instant,
}

impl Bucket {
    fn new(rate: f64, burst: f64) -> Self {
        Self {
            tokens: burst,
            rate,
            burst,
            last_refill: Instant::now(),
        }
    }

    /// Refills by elapsed time and takes one token if available.
    fn try_take(&mut self, now: Instant) -> bool {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-key token bucket rate limiter with bounded key tracking.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Cache<String, Arc<Mutex<Bucket>>>,
    default_rate: f64,
    burst: f64,
}

impl RateLimiter {
    /// Creates a rate limiter from configuration.
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            buckets: Cache::builder()
                .max_capacity(config.max_tracked_keys)
                .time_to_idle(Duration::from_secs(600))
                .build(),
            default_rate: config.default_per_second,
            burst: config.burst,
        }
    }

    /// Checks whether a request under `key` is admitted.
    ///
    /// # Arguments
    /// * `key` - The rate limit key (typically the API key id).
    /// * `rate_override` - Optional per-key sustained rate.
    pub fn check(&self, key: &str, rate_override: Option<f64>) -> bool {
        let rate = rate_override.unwrap_or(self.default_rate);
        let burst = self.burst.max(rate);

        let bucket = self
            .buckets
            .get_with(key.to_string(), || Arc::new(Mutex::new(Bucket::new(rate, burst))));

        let mut bucket = bucket.lock().expect("rate limit bucket lock poisoned");
        // A changed override takes effect on the live bucket
        bucket.rate = rate;
        bucket.burst = burst;
        bucket.try_take(Instant::now())
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> u64 {
        self.buckets.run_pending_tasks();
        self.buckets.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(default_per_second: f64, burst: f64) -> RateLimitConfig {
        RateLimitConfig {
            default_per_second,
            burst,
            max_tracked_keys: 100,
        }
    }

    #[test]
    fn test_burst_then_deny() {
        let limiter = RateLimiter::new(&config(1.0, 3.0));

        assert!(limiter.check("k1", None));
        assert!(limiter.check("k1", None));
        assert!(limiter.check("k1", None));
        assert!(!limiter.check("k1", None));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(&config(1.0, 1.0));

        assert!(limiter.check("a", None));
        assert!(!limiter.check("a", None));
        assert!(limiter.check("b", None));
    }

    #[test]
    fn test_refill_over_time() {
        let limiter = RateLimiter::new(&config(1000.0, 1.0));

        assert!(limiter.check("k", None));
        assert!(!limiter.check("k", None));

        std::thread::sleep(Duration::from_millis(5));
        assert!(limiter.check("k", None));
    }

    #[test]
    fn test_rate_override() {
        let limiter = RateLimiter::new(&config(1.0, 1.0));

        // Override larger than the default burst expands the bucket
        assert!(limiter.check("k", Some(5.0)));
        assert!(limiter.check("k", Some(5.0)));
    }

    #[test]
    fn test_tracked_keys_bounded() {
        let limiter = RateLimiter::new(&config(1.0, 1.0));

        for i in 0..500 {
            limiter.check(&format!("key-{}", i), None);
        }

        assert!(limiter.tracked_keys() <= 100);
    }
}
