// Token bucket rate limiter keeping outbound calls under the external service's request ceiling

use crate::error::RateLimitExceeded;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

// Tolerance for float drift when a waiter wakes exactly at the refill point
const TOKEN_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_per_second: f64,
    // Longest a caller may sleep waiting for tokens before giving up
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_per_second: 5.0,
            max_wait: Duration::from_secs(1),
        }
    }
}

#[derive(Debug)]
pub struct RateLimitBucket {
    capacity: f64,
    tokens: f64,
    refill_per_second: f64,
    max_wait: Duration,
    last_refill: Instant,
}

impl RateLimitBucket {
    fn new(config: &RateLimitConfig, now: Instant) -> Self {
        Self {
            capacity: f64::from(config.capacity),
            tokens: f64::from(config.capacity),
            refill_per_second: config.refill_per_second,
            max_wait: config.max_wait,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
        self.last_refill = now;
    }

    // Takes `requested` tokens, or reports how long until enough have accrued
    fn try_take(&mut self, requested: f64, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens + TOKEN_EPSILON >= requested {
            self.tokens = (self.tokens - requested).max(0.0);
            Ok(())
        } else {
            Err(self.time_to_accrue(requested - self.tokens))
        }
    }

    fn time_to_accrue(&self, missing: f64) -> Duration {
        if self.refill_per_second <= 0.0 {
            return Duration::MAX;
        }
        Duration::try_from_secs_f64(missing / self.refill_per_second).unwrap_or(Duration::MAX)
    }

    fn give_back(&mut self, tokens: f64) {
        self.tokens = (self.tokens + tokens).min(self.capacity);
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

/// Per-resource token buckets, created lazily on first use.
///
/// Each bucket sits behind its own mutex so that callers limiting different
/// endpoints never contend with each other. The lock is never held across an
/// await point: a caller that has to wait computes the wait under the lock,
/// sleeps without it, then re-checks once.
pub struct RateLimiter {
    default_config: RateLimitConfig,
    overrides: HashMap<String, RateLimitConfig>,
    buckets: DashMap<String, Arc<Mutex<RateLimitBucket>>>,
}

impl RateLimiter {
    pub fn new(default_config: RateLimitConfig) -> Self {
        Self {
            default_config,
            overrides: HashMap::new(),
            buckets: DashMap::new(),
        }
    }

    /// Use a dedicated configuration for one resource key.
    pub fn with_resource(mut self, resource: impl Into<String>, config: RateLimitConfig) -> Self {
        self.overrides.insert(resource.into(), config);
        self
    }

    fn config_for(&self, resource: &str) -> &RateLimitConfig {
        self.overrides.get(resource).unwrap_or(&self.default_config)
    }

    fn bucket(&self, resource: &str) -> Arc<Mutex<RateLimitBucket>> {
        if let Some(bucket) = self.buckets.get(resource) {
            return Arc::clone(bucket.value());
        }
        let config = self.config_for(resource);
        self.buckets
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RateLimitBucket::new(config, Instant::now()))))
            .value()
            .clone()
    }

    /// Take `tokens` permits for `resource`, sleeping at most once for the
    /// bucket's configured `max_wait` when they are not yet available.
    pub async fn acquire(&self, resource: &str, tokens: u32) -> Result<(), RateLimitExceeded> {
        let bucket = self.bucket(resource);
        let requested = f64::from(tokens);

        let (wait, max_wait) = {
            let mut bucket = bucket.lock();
            if requested > bucket.capacity {
                return Err(RateLimitExceeded {
                    resource: resource.to_string(),
                    wait: bucket.time_to_accrue(requested),
                });
            }
            match bucket.try_take(requested, Instant::now()) {
                Ok(()) => return Ok(()),
                Err(wait) => (wait, bucket.max_wait),
            }
        };

        if wait > max_wait {
            warn!(
                resource,
                wait_ms = wait.as_millis() as u64,
                max_wait_ms = max_wait.as_millis() as u64,
                "rate limit wait exceeds bound"
            );
            return Err(RateLimitExceeded {
                resource: resource.to_string(),
                wait,
            });
        }

        debug!(resource, wait_ms = wait.as_millis() as u64, "waiting for rate limit tokens");
        sleep(wait).await;

        let mut bucket = bucket.lock();
        bucket
            .try_take(requested, Instant::now())
            .map_err(|still_missing| RateLimitExceeded {
                resource: resource.to_string(),
                wait: still_missing,
            })
    }

    /// Give back tokens that were acquired for a call that never happened.
    pub fn release(&self, resource: &str, tokens: u32) {
        if let Some(bucket) = self.buckets.get(resource) {
            bucket.lock().give_back(f64::from(tokens));
        }
    }

    /// Tokens currently available for `resource`, after refill.
    pub fn available(&self, resource: &str) -> f64 {
        match self.buckets.get(resource) {
            Some(bucket) => {
                let mut bucket = bucket.lock();
                bucket.refill(Instant::now());
                bucket.tokens()
            }
            None => f64::from(self.config_for(resource).capacity),
        }
    }
}
