//! Per-client token-bucket rate limiting.
//!
//! Buckets refill continuously based on elapsed time. A denied request
//! reports how long the client should wait before retrying. Admission
//! is checked before validation so rejected requests consume no CPU.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Burst size: the maximum number of tokens a bucket can hold.
    pub capacity: u32,
    /// Tokens restored per second.
    pub refill_rate_per_sec: f64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_rate_per_sec: 1.0,
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Positive when denied: seconds until enough tokens accumulate.
    pub retry_after_seconds: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucketLimiter {
    config: RateLimiterConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl TokenBucketLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically refill the client's bucket, then deduct `cost` tokens
    /// if available.
    pub fn check(&self, client_id: &str, cost: u32) -> RateLimitDecision {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(client_id.to_string()).or_insert(Bucket {
            tokens: self.config.capacity as f64,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.config.refill_rate_per_sec)
            .min(self.config.capacity as f64);
        bucket.last_refill = now;

        let cost = cost as f64;
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            RateLimitDecision {
                allowed: true,
                retry_after_seconds: 0.0,
            }
        } else {
            let deficit = cost - bucket.tokens;
            let retry_after = if self.config.refill_rate_per_sec > 0.0 {
                deficit / self.config.refill_rate_per_sec
            } else {
                f64::INFINITY
            };
            RateLimitDecision {
                allowed: false,
                retry_after_seconds: retry_after,
            }
        }
    }

    /// Drop buckets idle for longer than `max_idle`. Returns the number
    /// removed.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.last_refill) <= max_idle);
        before - buckets.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}
