//! Token bucket state and arithmetic.

use std::time::{Duration, Instant};

/// A single key's token bucket.
///
/// Tokens are real-valued so that sub-second refills are exact. The bucket
/// does not know its own rate or capacity; the limiter passes them in so all
/// buckets of one limiter share a single configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    /// Tokens currently available, within `[0, capacity]`
    tokens: f64,
    /// Instant of the most recent refill
    last_seen: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn full(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_seen: now,
        }
    }

    /// Add the tokens earned since the last refill and mark the bucket as seen.
    ///
    /// An instant earlier than `last_seen` counts as zero elapsed time and
    /// leaves `last_seen` where it is.
    pub fn refill(&mut self, now: Instant, rate: f64, capacity: f64) {
        let elapsed = now.saturating_duration_since(self.last_seen);
        if !elapsed.is_zero() {
            self.tokens = capacity.min(self.tokens + elapsed.as_secs_f64() * rate);
            self.last_seen = now;
        }
    }

    /// Debit `cost` tokens if enough are available.
    ///
    /// Returns `true` if the tokens were taken. A failed attempt takes nothing.
    pub fn try_consume(&mut self, cost: f64) -> bool {
        if self.tokens >= cost {
            self.tokens -= cost;
            true
        } else {
            false
        }
    }

    /// Whole seconds until `cost` tokens will be available.
    ///
    /// Never zero. With no refill at all the bucket will never recover, so
    /// `blocked_secs` is returned instead.
    pub fn retry_after_secs(&self, cost: f64, rate: f64, blocked_secs: u64) -> u64 {
        if rate <= 0.0 {
            return blocked_secs;
        }

        let missing = (cost - self.tokens).max(0.0);
        // Float to int casts saturate, so a huge wait clamps to u64::MAX
        let secs = (missing / rate).ceil() as u64;
        secs.max(1)
    }

    /// Tokens currently available.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Instant of the most recent refill.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// How long the bucket has been idle at `now`.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen)
    }
}
