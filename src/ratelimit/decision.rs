//! The result of a single admission check.

use serde::Serialize;
use std::time::Duration;

/// Outcome of [`TokenBucketLimiter::allow`](super::TokenBucketLimiter::allow).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Decision {
    /// Whether the caller may proceed
    pub allowed: bool,
    /// Advisory wait before retrying; zero when allowed, at least one otherwise
    pub retry_after_secs: u64,
    /// Tokens left in the bucket after this check
    pub remaining: f64,
}

impl Decision {
    pub(crate) fn allowed(remaining: f64) -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
            remaining,
        }
    }

    pub(crate) fn denied(retry_after_secs: u64, remaining: f64) -> Self {
        Self {
            allowed: false,
            retry_after_secs,
            remaining,
        }
    }

    /// The retry hint as a `Duration`.
    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }

    /// Remaining tokens rounded down to a whole number, for display.
    pub fn remaining_whole(&self) -> u64 {
        self.remaining.max(0.0).floor() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_decision_has_no_wait() {
        let decision = Decision::allowed(3.5);
        assert!(decision.allowed);
        assert_eq!(decision.retry_after(), Duration::ZERO);
        assert_eq!(decision.remaining_whole(), 3);
    }

    #[test]
    fn test_denied_decision() {
        let decision = Decision::denied(4, 0.25);
        assert!(!decision.allowed);
        assert_eq!(decision.retry_after(), Duration::from_secs(4));
        assert_eq!(decision.remaining_whole(), 0);
    }

    #[test]
    fn test_serializes_as_flat_object() {
        let json = serde_json::to_value(Decision::denied(1, 0.0)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"allowed": false, "retry_after_secs": 1, "remaining": 0.0})
        );
    }
}
