//! Cache provider configuration.

use serde::{Deserialize, Serialize};

/// Top-level cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache provider type: `"memory"` or `"redis"`.
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Default TTL for cached entries in seconds.
    #[serde(default = "default_ttl")]
    pub default_ttl_seconds: u64,
    /// Redis-specific cache configuration.
    #[serde(default)]
    pub redis: RedisCacheConfig,
    /// In-memory cache configuration.
    #[serde(default)]
    pub memory: MemoryCacheConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            default_ttl_seconds: default_ttl(),
            redis: RedisCacheConfig::default(),
            memory: MemoryCacheConfig::default(),
        }
    }
}

/// Redis cache backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisCacheConfig {
    /// Redis connection URL (`redis://` or `rediss://`).
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Key prefix applied to every key and pub/sub channel.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Force an encrypted transport even when the URL uses `redis://`.
    #[serde(default)]
    pub tls: bool,
    /// Skip certificate verification (self-signed cloud endpoints).
    #[serde(default)]
    pub tls_insecure: bool,
    /// Timeout for the initial connection probe in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Deadline applied to every individual operation in milliseconds.
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
    /// Interval of the background availability probe; 0 disables it.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_seconds: u64,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            tls: false,
            tls_insecure: false,
            connect_timeout_ms: default_connect_timeout(),
            operation_timeout_ms: default_operation_timeout(),
            health_check_interval_seconds: default_health_check_interval(),
        }
    }
}

/// In-memory cache backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryCacheConfig {
    /// Interval between expiry sweeps in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    /// Per-subscriber buffer; messages beyond it are dropped.
    #[serde(default = "default_pubsub_buffer")]
    pub pubsub_buffer_size: usize,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: default_sweep_interval(),
            pubsub_buffer_size: default_pubsub_buffer(),
        }
    }
}

fn default_provider() -> String {
    "memory".to_string()
}

fn default_ttl() -> u64 {
    300
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "pulse:".to_string()
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_operation_timeout() -> u64 {
    500
}

fn default_health_check_interval() -> u64 {
    15
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_pubsub_buffer() -> usize {
    100
}
