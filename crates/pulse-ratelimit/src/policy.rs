//! Named rate-limit policies applied to request identities.

use pulse_cache::keys;
use pulse_core::config::rate_limit::{RateLimitPolicy, RateLimitScope};
use pulse_core::traits::rate_limiter::{RateLimitDecision, RateLimiter};

/// Who sent a request, as far as throttling is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    /// Client IP, port stripped.
    pub ip: String,
    /// Authenticated user id, if any.
    pub user_id: Option<String>,
    /// Endpoint name used by [`RateLimitScope::IpEndpoint`].
    pub endpoint: String,
}

impl RequestIdentity {
    /// Identity for an anonymous request.
    pub fn anonymous(ip: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_id: None,
            endpoint: endpoint.into(),
        }
    }

    /// Attach an authenticated user id.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Limiter key for `policy_name` under `scope`.
    ///
    /// The user scope falls back to the IP for anonymous requests.
    pub fn key(&self, policy_name: &str, scope: RateLimitScope) -> String {
        match scope {
            RateLimitScope::Ip => keys::rate_limit(policy_name, format!("ip:{}", self.ip)),
            RateLimitScope::User => match &self.user_id {
                Some(user_id) => keys::rate_limit(policy_name, format!("user:{user_id}")),
                None => keys::rate_limit(policy_name, format!("ip:{}", self.ip)),
            },
            RateLimitScope::IpEndpoint => keys::rate_limit(
                policy_name,
                format!("ip:{}:{}", self.ip, self.endpoint),
            ),
        }
    }
}

/// Check one request against a named policy.
pub async fn enforce(
    limiter: &dyn RateLimiter,
    policy_name: &str,
    policy: &RateLimitPolicy,
    identity: &RequestIdentity,
) -> RateLimitDecision {
    let key = identity.key(policy_name, policy.scope);
    match policy.forgiveness {
        Some(forgiveness) if forgiveness > 0 => {
            limiter
                .allow_with_forgiveness(&key, policy.limit, policy.window(), forgiveness)
                .await
        }
        _ => limiter.allow(&key, policy.limit, policy.window()).await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryRateLimiter;

    #[test]
    fn test_scope_keys() {
        let anon = RequestIdentity::anonymous("1.2.3.4", "login");
        assert_eq!(anon.key("login", RateLimitScope::IpEndpoint), "login:ip:1.2.3.4:login");
        assert_eq!(anon.key("api", RateLimitScope::User), "api:ip:1.2.3.4");

        let user = anon.with_user("42");
        assert_eq!(user.key("api", RateLimitScope::User), "api:user:42");
        assert_eq!(user.key("global", RateLimitScope::Ip), "global:ip:1.2.3.4");
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforce_applies_forgiveness() {
        let limiter = MemoryRateLimiter::new(Duration::from_secs(300));
        let identity = RequestIdentity::anonymous("10.0.0.1", "feed");
        let mut policy = RateLimitPolicy::new(1, 60, RateLimitScope::Ip);

        assert!(enforce(&limiter, "feed", &policy, &identity).await.allowed);
        assert!(!enforce(&limiter, "feed", &policy, &identity).await.allowed);

        policy.forgiveness = Some(1);
        let other = RequestIdentity::anonymous("10.0.0.2", "feed");
        assert!(enforce(&limiter, "feed", &policy, &other).await.allowed);
        assert!(enforce(&limiter, "feed", &policy, &other).await.allowed);
        assert!(!enforce(&limiter, "feed", &policy, &other).await.allowed);
    }
}
