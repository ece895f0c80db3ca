//! Admission gate for request-handling layers.
//!
//! The gate is the boundary between a request handler and the limiter. It
//! derives the limiter key from the caller's identity, turns a [`Decision`]
//! into response metadata, and fails open: if the limiter errors or panics,
//! the request is let through and the fault is logged.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::ratelimit::{Decision, PrincipalKey, RateLimiterBackend};

/// Header carrying the bucket capacity.
pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
/// Header carrying the whole tokens left.
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Header carrying the wait hint on rejection.
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Informational quota metadata for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Maximum burst size
    pub limit: u64,
    /// Whole tokens left after this request
    pub remaining: u64,
}

/// What the request handler should do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Let the request through.
    ///
    /// `quota` is `None` when the limiter could not be consulted.
    Allowed { quota: Option<Quota> },
    /// Reject the request (HTTP 429) and ask the client to wait.
    Rejected { retry_after_secs: u64, quota: Quota },
}

impl Admission {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }

    /// The wait hint, present only on rejection.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Admission::Allowed { .. } => None,
            Admission::Rejected {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
        }
    }

    /// Response headers to attach.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Admission::Allowed { quota: None } => Vec::new(),
            Admission::Allowed { quota: Some(quota) } => quota_headers(quota),
            Admission::Rejected {
                retry_after_secs,
                quota,
            } => {
                let mut headers = quota_headers(quota);
                headers.push((RETRY_AFTER_HEADER, retry_after_secs.to_string()));
                headers
            }
        }
    }
}

fn quota_headers(quota: &Quota) -> Vec<(&'static str, String)> {
    vec![
        (LIMIT_HEADER, quota.limit.to_string()),
        (REMAINING_HEADER, quota.remaining.to_string()),
    ]
}

/// Fail-open admission gate over a rate limiter backend.
pub struct Gate<B: RateLimiterBackend> {
    /// The rate limiter instance
    backend: Arc<B>,
}

impl<B: RateLimiterBackend> Gate<B> {
    /// Create a new gate over the given backend.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Get the backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Decide whether a principal's request may proceed.
    pub fn admit(&self, principal: &PrincipalKey, cost: f64) -> Admission {
        self.admit_key(&principal.to_limiter_key(), cost)
    }

    /// Decide whether a request under an already-derived key may proceed.
    pub fn admit_key(&self, key: &str, cost: f64) -> Admission {
        let backend = &self.backend;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            backend
                .allow(key, cost)
                .map(|decision| (decision, backend.capacity()))
        }));

        let (decision, capacity) = match outcome {
            Ok(Ok(checked)) => checked,
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Rate limiter failed, allowing request");
                return Admission::Allowed { quota: None };
            }
            Err(_) => {
                warn!(key = %key, "Rate limiter panicked, allowing request");
                return Admission::Allowed { quota: None };
            }
        };

        Self::shape(key, decision, capacity)
    }

    fn shape(key: &str, decision: Decision, capacity: f64) -> Admission {
        let quota = Quota {
            limit: capacity.max(0.0) as u64,
            remaining: decision.remaining_whole(),
        };

        if decision.allowed {
            trace!(key = %key, remaining = quota.remaining, "Request admitted");
            Admission::Allowed { quota: Some(quota) }
        } else {
            debug!(
                key = %key,
                retry_after_secs = decision.retry_after_secs,
                "Request rejected"
            );
            Admission::Rejected {
                retry_after_secs: decision.retry_after_secs,
                quota,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimiterConfig;
    use crate::error::{Result, TollgateError};
    use crate::ratelimit::TokenBucketLimiter;

    struct FailingBackend;

    impl RateLimiterBackend for FailingBackend {
        fn allow(&self, _key: &str, cost: f64) -> Result<Decision> {
            Err(TollgateError::InvalidCost(cost))
        }

        fn capacity(&self) -> f64 {
            10.0
        }
    }

    struct PanickingBackend;

    impl RateLimiterBackend for PanickingBackend {
        fn allow(&self, _key: &str, _cost: f64) -> Result<Decision> {
            panic!("limiter state corrupted");
        }

        fn capacity(&self) -> f64 {
            10.0
        }
    }

    fn create_gate(rate: f64, capacity: f64) -> Gate<TokenBucketLimiter> {
        let limiter = TokenBucketLimiter::new(LimiterConfig::new(rate, capacity)).unwrap();
        Gate::new(Arc::new(limiter))
    }

    #[test]
    fn test_allowed_request_carries_quota() {
        let gate = create_gate(5.0, 10.0);
        let principal = PrincipalKey::new("1", "dev-key-1");

        let admission = gate.admit(&principal, 1.0);
        assert_eq!(
            admission,
            Admission::Allowed {
                quota: Some(Quota {
                    limit: 10,
                    remaining: 9
                })
            }
        );
        assert_eq!(
            admission.headers(),
            vec![
                (LIMIT_HEADER, "10".to_string()),
                (REMAINING_HEADER, "9".to_string()),
            ]
        );
    }

    #[test]
    fn test_third_request_rejected_without_refill() {
        let gate = create_gate(0.0, 2.0);
        let principal = PrincipalKey::new("1", "dev-key-1");

        assert!(gate.admit(&principal, 1.0).is_allowed());
        assert!(gate.admit(&principal, 1.0).is_allowed());

        let admission = gate.admit(&principal, 1.0);
        assert!(!admission.is_allowed());
        assert!(admission.retry_after_secs().unwrap() >= 1);

        let headers = admission.headers();
        assert!(headers.contains(&(RETRY_AFTER_HEADER, "60".to_string())));
        assert!(headers.contains(&(REMAINING_HEADER, "0".to_string())));
        assert!(headers.contains(&(LIMIT_HEADER, "2".to_string())));
    }

    #[test]
    fn test_principals_are_limited_separately() {
        let gate = create_gate(0.0, 1.0);
        let first = PrincipalKey::new("1", "caller");
        let other_tenant = PrincipalKey::new("2", "caller");

        assert!(gate.admit(&first, 1.0).is_allowed());
        assert!(!gate.admit(&first, 1.0).is_allowed());
        assert!(gate.admit(&other_tenant, 1.0).is_allowed());
        assert_eq!(gate.backend().len(), 2);
    }

    #[test]
    fn test_fractional_remaining_rounds_down() {
        let gate = create_gate(1.0, 3.0);

        let admission = gate.admit_key("k", 1.5);
        assert_eq!(
            admission,
            Admission::Allowed {
                quota: Some(Quota {
                    limit: 3,
                    remaining: 1
                })
            }
        );
    }

    #[test]
    fn test_backend_error_fails_open() {
        let gate = Gate::new(Arc::new(FailingBackend));

        let admission = gate.admit(&PrincipalKey::new("1", "caller"), 1.0);
        assert_eq!(admission, Admission::Allowed { quota: None });
        assert!(admission.headers().is_empty());
    }

    #[test]
    fn test_invalid_cost_fails_open() {
        let gate = create_gate(1.0, 1.0);

        let admission = gate.admit_key("k", -1.0);
        assert_eq!(admission, Admission::Allowed { quota: None });
        assert!(gate.backend().is_empty());
    }

    #[test]
    fn test_backend_panic_fails_open() {
        let gate = Gate::new(Arc::new(PanickingBackend));

        let admission = gate.admit_key("k", 1.0);
        assert_eq!(admission, Admission::Allowed { quota: None });
        assert_eq!(admission.retry_after_secs(), None);
    }
}
