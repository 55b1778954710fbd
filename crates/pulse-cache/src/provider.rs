//! Cache manager that dispatches to the configured provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use pulse_core::config::cache::CacheConfig;
use pulse_core::error::AppError;
use pulse_core::result::{AppResult, CacheResult};
use pulse_core::traits::cache::{CacheProvider, KeyTtl, Subscription};

#[cfg(feature = "redis-backend")]
use crate::redis::RedisCacheProvider;

/// Cache manager that wraps the configured cache provider.
///
/// The provider is selected at construction time based on configuration.
/// When Redis is requested but unreachable the manager degrades to the
/// in-memory provider for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct CacheManager {
    /// The inner cache provider.
    inner: Arc<dyn CacheProvider>,
    /// The Redis provider, when it is the active backend.
    #[cfg(feature = "redis-backend")]
    distributed: Option<Arc<RedisCacheProvider>>,
    /// Default TTL for entries written without an explicit one.
    default_ttl: Duration,
}

impl CacheManager {
    /// Create a new cache manager from configuration.
    pub async fn new(config: &CacheConfig) -> AppResult<Self> {
        let default_ttl = Duration::from_secs(config.default_ttl_seconds);

        match config.provider.as_str() {
            #[cfg(feature = "redis-backend")]
            "redis" => {
                info!("Initializing Redis cache provider");
                let provider = RedisCacheProvider::connect(&config.redis).await?;
                if provider.is_available() {
                    let provider = Arc::new(provider);
                    return Ok(Self {
                        inner: provider.clone(),
                        distributed: Some(provider),
                        default_ttl,
                    });
                }

                provider.close().await?;
                Self::memory_fallback(config, default_ttl)
            }
            #[cfg(feature = "memory")]
            "memory" => {
                info!("Initializing in-memory cache provider");
                let provider = crate::memory::MemoryCacheProvider::new(&config.memory);
                Ok(Self::with_ttl(Arc::new(provider), default_ttl))
            }
            other => Err(AppError::configuration(format!(
                "Unknown cache provider: '{other}'. Supported: memory, redis"
            ))),
        }
    }

    #[cfg(all(feature = "redis-backend", feature = "memory"))]
    fn memory_fallback(config: &CacheConfig, default_ttl: Duration) -> AppResult<Self> {
        warn!("Redis is unreachable, falling back to the in-memory cache (single instance only)");
        let provider = crate::memory::MemoryCacheProvider::new(&config.memory);
        Ok(Self::with_ttl(Arc::new(provider), default_ttl))
    }

    #[cfg(all(feature = "redis-backend", not(feature = "memory")))]
    fn memory_fallback(_config: &CacheConfig, _default_ttl: Duration) -> AppResult<Self> {
        Err(AppError::service_unavailable(
            "Redis is unreachable and the in-memory provider is not compiled in",
        ))
    }

    /// Create a cache manager from an existing provider (for testing).
    pub fn from_provider(provider: Arc<dyn CacheProvider>) -> Self {
        Self::with_ttl(provider, Duration::from_secs(300))
    }

    fn with_ttl(inner: Arc<dyn CacheProvider>, default_ttl: Duration) -> Self {
        Self {
            inner,
            #[cfg(feature = "redis-backend")]
            distributed: None,
            default_ttl,
        }
    }

    /// Get a shared handle to the inner provider.
    pub fn provider(&self) -> Arc<dyn CacheProvider> {
        self.inner.clone()
    }

    /// The Redis provider, if Redis is the active backend.
    #[cfg(feature = "redis-backend")]
    pub fn distributed(&self) -> Option<Arc<RedisCacheProvider>> {
        self.distributed.clone()
    }

    /// Name of the active backend.
    pub fn backend_name(&self) -> &'static str {
        if self.is_distributed() { "redis" } else { "memory" }
    }

    #[cfg(feature = "redis-backend")]
    fn is_distributed(&self) -> bool {
        self.distributed.is_some()
    }

    #[cfg(not(feature = "redis-backend"))]
    fn is_distributed(&self) -> bool {
        false
    }

    /// Default TTL for entries written without an explicit one.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Set a key using the configured default TTL.
    pub async fn set_default(&self, key: &str, value: &str) -> CacheResult<()> {
        self.inner.set(key, value, self.default_ttl).await
    }
}

#[async_trait]
impl CacheProvider for CacheManager {
    async fn get(&self, key: &str) -> CacheResult<String> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.inner.exists(key).await
    }

    async fn mget(&self, keys: &[&str]) -> CacheResult<Vec<String>> {
        self.inner.mget(keys).await
    }

    async fn mset(&self, entries: &HashMap<String, String>, ttl: Duration) -> CacheResult<()> {
        self.inner.mset(entries, ttl).await
    }

    async fn mdelete(&self, keys: &[&str]) -> CacheResult<()> {
        self.inner.mdelete(keys).await
    }

    async fn lpush(&self, key: &str, values: &[&str]) -> CacheResult<u64> {
        self.inner.lpush(key, values).await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        self.inner.lrange(key, start, stop).await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> CacheResult<()> {
        self.inner.ltrim(key, start, stop).await
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<String> {
        self.inner.hget(key, field).await
    }

    async fn hset(&self, key: &str, fields: &HashMap<String, String>) -> CacheResult<()> {
        self.inner.hset(key, fields).await
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        self.inner.hgetall(key).await
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> CacheResult<u64> {
        self.inner.hdel(key, fields).await
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        self.inner.hincrby(key, field, delta).await
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        self.inner.incr(key).await
    }

    async fn decr(&self, key: &str) -> CacheResult<i64> {
        self.inner.decr(key).await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        self.inner.set_nx(key, value, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        self.inner.ttl(key).await
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.inner.keys(pattern).await
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        self.inner.scan(cursor, pattern, count).await
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        self.inner.delete_pattern(pattern).await
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        self.inner.publish(channel, message).await
    }

    async fn subscribe(&self, channels: &[&str]) -> CacheResult<Subscription> {
        self.inner.subscribe(channels).await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.inner.ping().await
    }

    async fn close(&self) -> CacheResult<()> {
        self.inner.close().await
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
