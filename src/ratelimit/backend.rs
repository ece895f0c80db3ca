//! Rate limiter trait for decoupling the gate from a concrete limiter.

use crate::error::Result;

use super::decision::Decision;

/// Trait for rate limiter implementations consulted by the [`Gate`](crate::gate::Gate).
///
/// Checks are synchronous: a limiter never performs I/O or suspends.
pub trait RateLimiterBackend: Send + Sync {
    /// Check and debit `cost` tokens for `key`.
    fn allow(&self, key: &str, cost: f64) -> Result<Decision>;

    /// Maximum burst size, advertised to callers as the limit.
    fn capacity(&self) -> f64;
}
