//! Limiter key derivation.

/// Identity of a rate-limited principal.
///
/// A principal is always scoped to a tenant so one tenant's callers never
/// share a bucket with another's. Both parts should come from authenticated
/// identity, not from values the client can choose.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrincipalKey {
    /// The tenant (organization) the caller belongs to
    pub tenant: String,
    /// The caller within the tenant, e.g. an API key id
    pub caller: String,
}

impl PrincipalKey {
    /// Create a new principal key.
    pub fn new(tenant: impl Into<String>, caller: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            caller: caller.into(),
        }
    }

    /// Convert to the string key used by the limiter.
    ///
    /// Format: `org:{tenant}:key:{caller}`
    pub fn to_limiter_key(&self) -> String {
        format!("org:{}:key:{}", self.tenant, self.caller)
    }
}

impl std::fmt::Display for PrincipalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_limiter_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_key_format() {
        let key = PrincipalKey::new("42", "dev-key-1");
        assert_eq!(key.to_limiter_key(), "org:42:key:dev-key-1");
        assert_eq!(key.to_string(), "org:42:key:dev-key-1");
    }

    #[test]
    fn test_same_caller_in_different_tenants_differs() {
        let a = PrincipalKey::new("1", "caller");
        let b = PrincipalKey::new("2", "caller");

        assert_ne!(a, b);
        assert_ne!(a.to_limiter_key(), b.to_limiter_key());
    }
}
