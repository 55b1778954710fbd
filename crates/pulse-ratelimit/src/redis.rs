//! Distributed sliding-window-log rate limiter backed by Redis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use pulse_cache::redis::RedisCacheProvider;
use pulse_core::result::CacheResult;
use pulse_core::traits::cache::CacheProvider;
use pulse_core::traits::rate_limiter::{RateLimitDecision, RateLimiter};

/// Lua script for one atomic sliding-window decision.
///
/// KEYS[1] = marker sorted set
/// ARGV[1] = now (ms)
/// ARGV[2] = window (ms)
/// ARGV[3] = limit
/// ARGV[4] = marker member
///
/// Returns `{allowed (1|0), remaining}`.
const SLIDING_WINDOW_SCRIPT: &str = r#"
    local key = KEYS[1]
    local now = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])
    local limit = tonumber(ARGV[3])
    local member = ARGV[4]

    -- Drop markers older than the window
    redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
    local current = redis.call('ZCARD', key)

    if current < limit then
        redis.call('ZADD', key, now, member)
        redis.call('PEXPIRE', key, window)
        return {1, limit - current - 1}
    end
    return {0, 0}
"#;

/// Lua script counting live markers without recording a request.
///
/// KEYS[1] = marker sorted set
/// ARGV[1] = now (ms)
/// ARGV[2] = window (ms)
const COUNT_SCRIPT: &str = r#"
    local key = KEYS[1]
    local now = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])
    redis.call('ZREMRANGEBYSCORE', key, '-inf', '(' .. (now - window))
    return redis.call('ZCARD', key)
"#;

/// Suffix of the auxiliary window that tracks forgiven requests.
const FORGIVENESS_SUFFIX: &str = ":forgiveness";

/// Sliding-window-log limiter shared by every server instance.
///
/// Every decision is a single script call, so concurrent callers on one key
/// can never both be admitted past the limit. Backend failures fail open.
///
/// `reset_at` is reported as `now + window`, an upper bound on when the
/// oldest marker leaves the window.
#[derive(Debug)]
pub struct RedisRateLimiter {
    /// Redis provider.
    provider: Arc<RedisCacheProvider>,
    /// Prefix for limiter keys.
    key_prefix: String,
    /// Decision script.
    allow_script: ::redis::Script,
    /// Read-only count script.
    count_script: ::redis::Script,
}

impl RedisRateLimiter {
    /// Create a limiter on top of a Redis provider.
    pub fn new(provider: Arc<RedisCacheProvider>, key_prefix: impl Into<String>) -> Self {
        Self {
            provider,
            key_prefix: key_prefix.into(),
            allow_script: ::redis::Script::new(SLIDING_WINDOW_SCRIPT),
            count_script: ::redis::Script::new(COUNT_SCRIPT),
        }
    }

    fn full_key(&self, key: &str) -> String {
        self.provider
            .client()
            .prefixed_key(&format!("{}{key}", self.key_prefix))
    }

    /// Run the sliding-window script; returns `(allowed, remaining)`.
    async fn run_window(&self, key: &str, limit: u64, window_ms: u64) -> CacheResult<(bool, u64)> {
        let now_ms = Utc::now().timestamp_millis();
        let member = format!("{now_ms}-{}", Uuid::new_v4().simple());

        let mut invocation = self.allow_script.key(self.full_key(key));
        invocation.arg(now_ms).arg(window_ms).arg(limit).arg(member);

        let (allowed, remaining): (i64, i64) = self
            .provider
            .client()
            .execute(|mut conn| async move { invocation.invoke_async(&mut conn).await })
            .await?;
        Ok((allowed == 1, remaining.max(0) as u64))
    }

    fn fail_open(
        &self,
        key: &str,
        limit: u64,
        reset_at: DateTime<Utc>,
        err: impl std::fmt::Display,
    ) -> RateLimitDecision {
        warn!(key, error = %err, "Rate limiter backend failed, allowing request");
        RateLimitDecision::allowed(limit, limit, reset_at)
    }
}

fn window_millis(window: Duration) -> u64 {
    (window.as_millis().min(u128::from(u64::MAX)) as u64).max(1)
}

fn reset_after(window: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero())
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> RateLimitDecision {
        let reset_at = reset_after(window);
        match self.run_window(key, limit, window_millis(window)).await {
            Ok((true, remaining)) => RateLimitDecision::allowed(limit, remaining, reset_at),
            Ok((false, _)) => RateLimitDecision::denied(limit, reset_at),
            Err(e) => self.fail_open(key, limit, reset_at, e),
        }
    }

    async fn allow_with_forgiveness(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        forgiveness: u64,
    ) -> RateLimitDecision {
        let primary = self.allow(key, limit, window).await;
        if primary.allowed || forgiveness == 0 {
            return primary;
        }

        let forgiveness_key = format!("{key}{FORGIVENESS_SUFFIX}");
        match self
            .run_window(&forgiveness_key, forgiveness, window_millis(window))
            .await
        {
            Ok((true, _)) => RateLimitDecision::allowed(limit, 0, primary.reset_at),
            Ok((false, _)) => primary,
            Err(e) => self.fail_open(key, limit, primary.reset_at, e),
        }
    }

    async fn get_remaining(&self, key: &str, limit: u64, window: Duration) -> u64 {
        let now_ms = Utc::now().timestamp_millis();
        let mut invocation = self.count_script.key(self.full_key(key));
        invocation.arg(now_ms).arg(window_millis(window));

        let result: CacheResult<u64> = self
            .provider
            .client()
            .execute(|mut conn| async move { invocation.invoke_async(&mut conn).await })
            .await;
        match result {
            Ok(current) => limit.saturating_sub(current),
            Err(e) => {
                warn!(key, error = %e, "Rate limiter backend failed, reporting full quota");
                limit
            }
        }
    }

    async fn reset(&self, key: &str) {
        let primary = format!("{}{key}", self.key_prefix);
        let forgiveness = format!("{primary}{FORGIVENESS_SUFFIX}");
        if let Err(e) = self.provider.mdelete(&[&primary, &forgiveness]).await {
            warn!(key, error = %e, "Failed to reset rate limit");
        }
    }

    fn is_distributed(&self) -> bool {
        true
    }
}
