//! Per-policy rate limiting middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

use pulse_core::config::rate_limit::RateLimitPolicy;
use pulse_core::traits::rate_limiter::{RateLimitDecision, RateLimiter};
use pulse_ratelimit::{RequestIdentity, enforce};

use crate::error::rate_limit_exceeded;
use crate::extractors::{AuthUser, resolve_client_ip};
use crate::state::AppState;

/// `X-RateLimit-Limit`
pub const LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// `X-RateLimit-Remaining`
pub const REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// `X-RateLimit-Reset`, unix seconds
pub const RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");
/// `X-RateLimit-Type`, `distributed` or `local`
pub const TYPE_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-type");

/// Middleware state: one named policy bound to the shared limiter.
#[derive(Debug, Clone)]
pub struct PolicyGuard {
    /// Policy name, used as the key namespace.
    name: Arc<str>,
    /// The policy, or `None` when throttling is off for this route group.
    policy: Option<RateLimitPolicy>,
    /// Shared limiter.
    limiter: Arc<dyn RateLimiter>,
    /// Honour proxy headers when resolving the client IP.
    trust_proxy: bool,
}

impl PolicyGuard {
    /// Bind the policy `name` from configuration.
    ///
    /// An unknown policy or globally disabled throttling yields a guard that
    /// lets every request through.
    pub fn new(state: &AppState, name: &str) -> Self {
        let config = &state.config.rate_limit;
        let policy = if config.enabled {
            let policy = config.policy(name).cloned();
            if policy.is_none() {
                warn!(policy = name, "Unknown rate limit policy, route group not throttled");
            }
            policy
        } else {
            None
        };

        Self {
            name: Arc::from(name),
            policy,
            limiter: state.limiter.clone(),
            trust_proxy: config.trust_proxy_headers,
        }
    }

    fn identity(&self, request: &Request) -> RequestIdentity {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let ip = resolve_client_ip(request.headers(), peer, self.trust_proxy);
        let endpoint = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());

        let identity = RequestIdentity::anonymous(ip, endpoint);
        match AuthUser::from_extensions(request.extensions()) {
            Some(user_id) => identity.with_user(user_id),
            None => identity,
        }
    }
}

/// Throttle a request against the guard's policy.
///
/// Every throttled response carries the `X-RateLimit-*` headers; a denial
/// short-circuits with 429.
pub async fn rate_limit(State(guard): State<PolicyGuard>, request: Request, next: Next) -> Response {
    let Some(policy) = guard.policy.as_ref() else {
        return next.run(request).await;
    };

    let identity = guard.identity(&request);
    let decision = enforce(guard.limiter.as_ref(), &guard.name, policy, &identity).await;
    let distributed = guard.limiter.is_distributed();

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(
            policy = %guard.name,
            ip = %identity.ip,
            "Rate limit exceeded"
        );
        rate_limit_exceeded(&decision)
    };

    apply_headers(response.headers_mut(), &decision, distributed);
    response
}

/// Write the `X-RateLimit-*` headers for a decision.
///
/// Headers already set by an inner, more specific policy are kept.
pub fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision, distributed: bool) {
    if headers.contains_key(LIMIT_HEADER) {
        return;
    }
    headers.insert(LIMIT_HEADER, HeaderValue::from(decision.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(decision.remaining));
    headers.insert(
        RESET_HEADER,
        HeaderValue::from(decision.reset_at.timestamp().max(0)),
    );
    headers.insert(
        TYPE_HEADER,
        HeaderValue::from_static(if distributed { "distributed" } else { "local" }),
    );
}
