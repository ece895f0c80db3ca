//! Core token bucket limiter implementation.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use crate::config::LimiterConfig;
use crate::error::{Result, TollgateError};

use super::backend::RateLimiterBackend;
use super::bucket::TokenBucket;
use super::clock::{Clock, SystemClock};
use super::decision::Decision;

/// A per-key token bucket rate limiter with bounded memory.
///
/// Each key gets its own bucket, created full on first use and refilled lazily
/// on every check. Buckets idle for longer than the configured TTL are evicted
/// by a sweep that piggybacks on `allow` at most once per sweep interval.
///
/// All state lives behind one mutex, so concurrent checks for the same key
/// can never both spend the same tokens. Instances share nothing with each
/// other.
pub struct TokenBucketLimiter {
    /// Validated configuration
    config: LimiterConfig,
    /// Monotonic time source
    clock: Arc<dyn Clock>,
    /// Buckets and sweep bookkeeping
    state: Mutex<LimiterState>,
}

struct LimiterState {
    /// Buckets indexed by limiter key
    buckets: HashMap<String, TokenBucket>,
    /// When the last eviction pass ran
    last_sweep: Instant,
}

impl LimiterState {
    /// Run an eviction pass if the sweep interval has elapsed.
    fn sweep_if_due(&mut self, now: Instant, config: &LimiterConfig) {
        if now.saturating_duration_since(self.last_sweep) < config.sweep_interval() {
            return;
        }
        self.sweep(now, config);
    }

    /// Drop every bucket idle for longer than the TTL.
    fn sweep(&mut self, now: Instant, config: &LimiterConfig) -> usize {
        let ttl = config.ttl();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for(now) <= ttl);
        self.last_sweep = now;

        let evicted = before - self.buckets.len();
        debug!(
            evicted = evicted,
            live = self.buckets.len(),
            "Swept idle buckets"
        );
        evicted
    }
}

impl TokenBucketLimiter {
    /// Create a new limiter driven by the system clock.
    pub fn new(config: LimiterConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a new limiter driven by the given clock.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let now = clock.now();
        Ok(Self {
            config,
            clock,
            state: Mutex::new(LimiterState {
                buckets: HashMap::new(),
                last_sweep: now,
            }),
        })
    }

    /// Check whether `key` may spend `cost` tokens, and spend them if so.
    ///
    /// A denied check leaves the bucket's tokens untouched but still counts
    /// as activity for TTL purposes. Only a negative or non-finite `cost` is
    /// an error; every well-formed call returns a decision.
    pub fn allow(&self, key: &str, cost: f64) -> Result<Decision> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(TollgateError::InvalidCost(cost));
        }

        let capacity = self.config.capacity;
        let rate = self.config.rate_per_second;

        trace!(key = %key, cost = cost, "Checking rate limit");

        let mut state = self.state.lock();
        let now = self.clock.now();
        state.sweep_if_due(now, &self.config);

        let bucket = state.buckets.entry(key.to_owned()).or_insert_with(|| {
            debug!(key = %key, capacity = capacity, "Creating new token bucket");
            TokenBucket::full(capacity, now)
        });

        bucket.refill(now, rate, capacity);

        if bucket.try_consume(cost) {
            return Ok(Decision::allowed(bucket.tokens()));
        }

        let retry_after_secs =
            bucket.retry_after_secs(cost, rate, self.config.blocked_retry_after_secs);
        debug!(
            key = %key,
            cost = cost,
            tokens = bucket.tokens(),
            retry_after_secs = retry_after_secs,
            "Rate limit exceeded"
        );

        Ok(Decision::denied(retry_after_secs, bucket.tokens()))
    }

    /// Check a single-token request for `key`.
    pub fn allow_one(&self, key: &str) -> Result<Decision> {
        self.allow(key, 1.0)
    }

    /// Evict idle buckets now, regardless of the sweep interval.
    ///
    /// Returns the number of buckets evicted.
    pub fn evict_idle(&self) -> usize {
        let mut state = self.state.lock();
        let now = self.clock.now();
        state.sweep(now, &self.config)
    }

    /// Stored tokens for `key`, without refilling.
    ///
    /// Returns `None` if the key has no bucket.
    pub fn tokens(&self, key: &str) -> Option<f64> {
        self.state.lock().buckets.get(key).map(TokenBucket::tokens)
    }

    /// Get the number of live buckets.
    pub fn len(&self) -> usize {
        self.state.lock().buckets.len()
    }

    /// Whether no bucket is currently held.
    pub fn is_empty(&self) -> bool {
        self.state.lock().buckets.is_empty()
    }

    /// Drop every bucket.
    pub fn clear(&self) {
        self.state.lock().buckets.clear();
    }

    /// Maximum tokens per bucket.
    pub fn capacity(&self) -> f64 {
        self.config.capacity
    }

    /// Tokens added per second.
    pub fn rate(&self) -> f64 {
        self.config.rate_per_second
    }

    /// The configuration this limiter was built with.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }
}

impl std::fmt::Debug for TokenBucketLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucketLimiter")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl RateLimiterBackend for TokenBucketLimiter {
    fn allow(&self, key: &str, cost: f64) -> Result<Decision> {
        TokenBucketLimiter::allow(self, key, cost)
    }

    fn capacity(&self) -> f64 {
        self.config.capacity
    }
}
