//! Rate limiter trait consumed by request-handling middleware.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The limit the decision was made against.
    pub limit: u64,
    /// Further requests permitted before `reset_at`. Advisory, but always
    /// `0` when `allowed` is `false`.
    pub remaining: u64,
    /// When the quota is expected to be available again.
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    /// An admitting decision.
    pub fn allowed(limit: u64, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            reset_at,
        }
    }

    /// A denying decision.
    pub fn denied(limit: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
        }
    }

    /// Seconds a denied client should wait, never less than one.
    pub fn retry_after_seconds(&self) -> u64 {
        let secs = (self.reset_at - Utc::now()).num_seconds();
        secs.max(1) as u64
    }
}

/// Request-throttling contract.
///
/// Implementations never surface errors: a distributed backend failure
/// fails open, and the in-memory backend cannot fail.
#[async_trait]
pub trait RateLimiter: Send + Sync + std::fmt::Debug + 'static {
    /// Consume one request from `key`'s quota of `limit` per `window`.
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> RateLimitDecision;

    /// Like [`RateLimiter::allow`], but when the primary quota denies, admit
    /// up to `forgiveness` extra requests before denying outright.
    async fn allow_with_forgiveness(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        forgiveness: u64,
    ) -> RateLimitDecision;

    /// Remaining quota for `key` without consuming any of it.
    async fn get_remaining(&self, key: &str, limit: u64, window: Duration) -> u64;

    /// Forget all state for `key`.
    async fn reset(&self, key: &str);

    /// Whether decisions are shared across server instances.
    fn is_distributed(&self) -> bool;

    /// Stop background tasks owned by the limiter.
    async fn shutdown(&self) {}
}
