//! Limiter that picks the distributed or local algorithm at construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use pulse_cache::redis::RedisCacheProvider;
use pulse_core::config::RateLimitConfig;
use pulse_core::traits::cache::CacheProvider;
use pulse_core::traits::rate_limiter::{RateLimitDecision, RateLimiter};

use crate::memory::MemoryRateLimiter;
use crate::redis::RedisRateLimiter;

/// Rate limiter that uses Redis when it is reachable at construction and the
/// in-memory token bucket otherwise.
///
/// The choice is never revisited: a Redis outage at startup keeps the
/// process on the local limiter until restart.
#[derive(Debug, Clone)]
pub struct HybridRateLimiter {
    /// The active limiter.
    inner: Arc<dyn RateLimiter>,
}

impl HybridRateLimiter {
    /// Create a limiter, preferring `distributed` when it is available.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(distributed: Option<Arc<RedisCacheProvider>>, config: &RateLimitConfig) -> Self {
        let inner: Arc<dyn RateLimiter> = match distributed {
            Some(provider) if provider.is_available() => {
                info!("Using distributed sliding-window rate limiter");
                Arc::new(RedisRateLimiter::new(provider, config.key_prefix.clone()))
            }
            Some(_) => {
                warn!("Redis unavailable, using local rate limiter (single instance only)");
                Self::local(config)
            }
            None => {
                info!("Using local token-bucket rate limiter");
                Self::local(config)
            }
        };
        Self { inner }
    }

    fn local(config: &RateLimitConfig) -> Arc<dyn RateLimiter> {
        Arc::new(MemoryRateLimiter::new(Duration::from_secs(
            config.cleanup_interval_seconds,
        )))
    }
}

#[async_trait]
impl RateLimiter for HybridRateLimiter {
    async fn allow(&self, key: &str, limit: u64, window: Duration) -> RateLimitDecision {
        self.inner.allow(key, limit, window).await
    }

    async fn allow_with_forgiveness(
        &self,
        key: &str,
        limit: u64,
        window: Duration,
        forgiveness: u64,
    ) -> RateLimitDecision {
        self.inner
            .allow_with_forgiveness(key, limit, window, forgiveness)
            .await
    }

    async fn get_remaining(&self, key: &str, limit: u64, window: Duration) -> u64 {
        self.inner.get_remaining(key, limit, window).await
    }

    async fn reset(&self, key: &str) {
        self.inner.reset(key).await
    }

    fn is_distributed(&self) -> bool {
        self.inner.is_distributed()
    }

    async fn shutdown(&self) {
        self.inner.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::config::cache::RedisCacheConfig;

    #[tokio::test]
    async fn test_without_redis_uses_local() {
        let limiter = HybridRateLimiter::new(None, &RateLimitConfig::default());
        assert!(!limiter.is_distributed());

        let window = Duration::from_secs(60);
        assert!(limiter.allow("k", 1, window).await.allowed);
        assert!(!limiter.allow("k", 1, window).await.allowed);
        limiter.shutdown().await;
    }

    #[tokio::test]
    async fn test_unavailable_redis_uses_local() {
        let config = RedisCacheConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout_ms: 200,
            health_check_interval_seconds: 0,
            ..RedisCacheConfig::default()
        };
        let provider = Arc::new(RedisCacheProvider::connect(&config).await.unwrap());
        let limiter = HybridRateLimiter::new(Some(provider), &RateLimitConfig::default());

        assert!(!limiter.is_distributed());
        // Local limiting still enforces the quota.
        let window = Duration::from_secs(60);
        assert!(limiter.allow("k", 2, window).await.allowed);
        assert!(limiter.allow("k", 2, window).await.allowed);
        assert!(!limiter.allow("k", 2, window).await.allowed);
    }
}
