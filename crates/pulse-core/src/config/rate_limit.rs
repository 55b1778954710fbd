//! Rate limiting configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a request is turned into a rate-limit key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    /// Client IP address.
    Ip,
    /// Authenticated user id, falling back to the client IP.
    User,
    /// Client IP combined with the policy (endpoint) name.
    IpEndpoint,
}

/// A named limit applied to a group of routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Requests admitted per window.
    pub limit: u64,
    /// Window length in seconds.
    pub window_seconds: u64,
    /// Extra burst allowance consulted after the limit denies.
    #[serde(default)]
    pub forgiveness: Option<u64>,
    /// Key derivation strategy.
    #[serde(default = "default_scope")]
    pub scope: RateLimitScope,
}

impl RateLimitPolicy {
    /// Create a policy with no forgiveness.
    pub fn new(limit: u64, window_seconds: u64, scope: RateLimitScope) -> Self {
        Self {
            limit,
            window_seconds,
            forgiveness: None,
            scope,
        }
    }

    /// The window as a [`Duration`].
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Top-level rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether requests are throttled at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Prefix for limiter keys in the backing store.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Interval of the in-memory stale-bucket sweep in seconds.
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
    /// Honour `X-Forwarded-For` / `X-Real-IP` when resolving the client IP.
    #[serde(default = "default_true")]
    pub trust_proxy_headers: bool,
    /// Named policies (`global`, `login`, `register`, `api`, ...).
    #[serde(default = "default_policies")]
    pub policies: HashMap<String, RateLimitPolicy>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            key_prefix: default_key_prefix(),
            cleanup_interval_seconds: default_cleanup_interval(),
            trust_proxy_headers: true,
            policies: default_policies(),
        }
    }
}

impl RateLimitConfig {
    /// Look up a named policy.
    pub fn policy(&self, name: &str) -> Option<&RateLimitPolicy> {
        self.policies.get(name)
    }
}

fn default_scope() -> RateLimitScope {
    RateLimitScope::Ip
}

fn default_true() -> bool {
    true
}

fn default_key_prefix() -> String {
    "ratelimit:".to_string()
}

fn default_cleanup_interval() -> u64 {
    300
}

fn default_policies() -> HashMap<String, RateLimitPolicy> {
    let mut policies = HashMap::new();
    policies.insert(
        "global".to_string(),
        RateLimitPolicy {
            limit: 300,
            window_seconds: 60,
            forgiveness: Some(30),
            scope: RateLimitScope::Ip,
        },
    );
    policies.insert(
        "login".to_string(),
        RateLimitPolicy::new(5, 15 * 60, RateLimitScope::IpEndpoint),
    );
    policies.insert(
        "register".to_string(),
        RateLimitPolicy::new(3, 60 * 60, RateLimitScope::IpEndpoint),
    );
    policies.insert(
        "api".to_string(),
        RateLimitPolicy {
            limit: 100,
            window_seconds: 60,
            forgiveness: Some(10),
            scope: RateLimitScope::User,
        },
    );
    policies
}
