//! Redis cache provider implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use pulse_core::config::cache::RedisCacheConfig;
use pulse_core::error::CacheError;
use pulse_core::result::{AppResult, CacheResult};
use pulse_core::traits::cache::{CacheProvider, KeyTtl, Subscription};

use super::client::RedisClient;

/// Subscriber buffer size for Redis pub/sub forwarding.
const SUBSCRIPTION_BUFFER: usize = 100;

/// Redis-backed cache provider, shared by every server instance.
#[derive(Debug)]
pub struct RedisCacheProvider {
    /// Redis client.
    client: RedisClient,
    /// Parent token of the health probe and every forwarding task.
    shutdown: CancellationToken,
}

impl RedisCacheProvider {
    /// Connect to Redis and start the availability probe.
    pub async fn connect(config: &RedisCacheConfig) -> AppResult<Self> {
        let client = RedisClient::connect(config).await?;
        Ok(Self::new(
            client,
            Duration::from_secs(config.health_check_interval_seconds),
        ))
    }

    /// Wrap an existing client. A zero `probe_interval` disables the probe.
    pub fn new(client: RedisClient, probe_interval: Duration) -> Self {
        let shutdown = CancellationToken::new();
        if !probe_interval.is_zero() {
            tokio::spawn(run_health_probe(
                client.clone(),
                probe_interval,
                shutdown.child_token(),
            ));
        }
        Self { client, shutdown }
    }

    /// The underlying client.
    pub fn client(&self) -> &RedisClient {
        &self.client
    }

    fn ttl_millis(ttl: Duration) -> u64 {
        ttl.as_millis().clamp(1, u64::MAX as u128) as u64
    }
}

async fn run_health_probe(client: RedisClient, interval: Duration, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {
                if let Err(e) = client.ping().await {
                    debug!(error = %e, "Redis health probe failed");
                }
            }
        }
    }
    debug!("Redis health probe stopped");
}

#[async_trait]
impl CacheProvider for RedisCacheProvider {
    async fn get(&self, key: &str) -> CacheResult<String> {
        let full_key = self.client.prefixed_key(key);
        let result: Option<String> = self
            .client
            .execute(|mut conn| async move { conn.get(full_key).await })
            .await?;
        result.ok_or_else(|| CacheError::miss(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()> {
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.client.prefixed_key(key)).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(Self::ttl_millis(ttl));
        }
        self.client
            .execute(|mut conn| async move { cmd.query_async::<()>(&mut conn).await })
            .await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let full_key = self.client.prefixed_key(key);
        self.client
            .execute(|mut conn| async move { conn.del::<_, ()>(full_key).await })
            .await
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let full_key = self.client.prefixed_key(key);
        self.client
            .execute(|mut conn| async move { conn.exists(full_key).await })
            .await
    }

    async fn mget(&self, keys: &[&str]) -> CacheResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.client.prefixed_key(k)).collect();
        let values: Vec<Option<String>> = self
            .client
            .execute(|mut conn| async move {
                redis::cmd("MGET").arg(full_keys).query_async(&mut conn).await
            })
            .await?;
        Ok(values.into_iter().map(Option::unwrap_or_default).collect())
    }

    async fn mset(&self, entries: &HashMap<String, String>, ttl: Duration) -> CacheResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        let mut mset = redis::cmd("MSET");
        for (key, value) in entries {
            mset.arg(self.client.prefixed_key(key)).arg(value);
        }
        pipe.add_command(mset).ignore();
        if !ttl.is_zero() {
            let ms = Self::ttl_millis(ttl);
            for key in entries.keys() {
                pipe.cmd("PEXPIRE")
                    .arg(self.client.prefixed_key(key))
                    .arg(ms)
                    .ignore();
            }
        }
        self.client
            .execute(|mut conn| async move { pipe.query_async::<()>(&mut conn).await })
            .await
    }

    async fn mdelete(&self, keys: &[&str]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let full_keys: Vec<String> = keys.iter().map(|k| self.client.prefixed_key(k)).collect();
        self.client
            .execute(|mut conn| async move { conn.del::<_, ()>(full_keys).await })
            .await
    }

    async fn lpush(&self, key: &str, values: &[&str]) -> CacheResult<u64> {
        if values.is_empty() {
            return Err(CacheError::backend("LPUSH requires at least one value"));
        }
        let mut cmd = redis::cmd("LPUSH");
        cmd.arg(self.client.prefixed_key(key)).arg(values);
        self.client
            .execute(|mut conn| async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>> {
        let mut cmd = redis::cmd("LRANGE");
        cmd.arg(self.client.prefixed_key(key)).arg(start).arg(stop);
        self.client
            .execute(|mut conn| async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> CacheResult<()> {
        let mut cmd = redis::cmd("LTRIM");
        cmd.arg(self.client.prefixed_key(key)).arg(start).arg(stop);
        self.client
            .execute(|mut conn| async move { cmd.query_async::<()>(&mut conn).await })
            .await
    }

    async fn hget(&self, key: &str, field: &str) -> CacheResult<String> {
        let mut cmd = redis::cmd("HGET");
        cmd.arg(self.client.prefixed_key(key)).arg(field);
        let value: Option<String> = self
            .client
            .execute(|mut conn| async move { cmd.query_async(&mut conn).await })
            .await?;
        value.ok_or_else(|| CacheError::miss(format!("{key}#{field}")))
    }

    async fn hset(&self, key: &str, fields: &HashMap<String, String>) -> CacheResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut cmd = redis::cmd("HSET");
        cmd.arg(self.client.prefixed_key(key));
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        self.client
            .execute(|mut conn| async move { cmd.query_async::<()>(&mut conn).await })
            .await
    }

    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>> {
        let mut cmd = redis::cmd("HGETALL");
        cmd.arg(self.client.prefixed_key(key));
        self.client
            .execute(|mut conn| async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn hdel(&self, key: &str, fields: &[&str]) -> CacheResult<u64> {
        if fields.is_empty() {
            return Ok(0);
        }
        let mut cmd = redis::cmd("HDEL");
        cmd.arg(self.client.prefixed_key(key)).arg(fields);
        self.client
            .execute(|mut conn| async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64> {
        let mut cmd = redis::cmd("HINCRBY");
        cmd.arg(self.client.prefixed_key(key)).arg(field).arg(delta);
        self.client
            .execute(|mut conn| async move { cmd.query_async(&mut conn).await })
            .await
    }

    async fn incr(&self, key: &str) -> CacheResult<i64> {
        let full_key = self.client.prefixed_key(key);
        self.client
            .execute(|mut conn| async move { conn.incr(full_key, 1i64).await })
            .await
    }

    async fn decr(&self, key: &str) -> CacheResult<i64> {
        let full_key = self.client.prefixed_key(key);
        self.client
            .execute(|mut conn| async move { conn.decr(full_key, 1i64).await })
            .await
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool> {
        // SET key value NX [PX ttl]
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.client.prefixed_key(key)).arg(value).arg("NX");
        if !ttl.is_zero() {
            cmd.arg("PX").arg(Self::ttl_millis(ttl));
        }
        let result: Option<String> = self
            .client
            .execute(|mut conn| async move { cmd.query_async(&mut conn).await })
            .await?;
        Ok(result.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let full_key = self.client.prefixed_key(key);
        if ttl.is_zero() {
            let (_, exists): (i64, bool) = self
                .client
                .execute(|mut conn| async move {
                    redis::pipe()
                        .cmd("PERSIST")
                        .arg(&full_key)
                        .cmd("EXISTS")
                        .arg(&full_key)
                        .query_async(&mut conn)
                        .await
                })
                .await?;
            return Ok(exists);
        }
        let ms = Self::ttl_millis(ttl);
        self.client
            .execute(|mut conn| async move {
                redis::cmd("PEXPIRE")
                    .arg(full_key)
                    .arg(ms)
                    .query_async(&mut conn)
                    .await
            })
            .await
    }

    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl> {
        let full_key = self.client.prefixed_key(key);
        let ms: i64 = self
            .client
            .execute(|mut conn| async move {
                redis::cmd("PTTL").arg(full_key).query_async(&mut conn).await
            })
            .await?;
        Ok(KeyTtl::from_millis(ms))
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let full_pattern = self.client.prefixed_key(pattern);
        let keys: Vec<String> = self
            .client
            .execute(|mut conn| async move {
                redis::cmd("KEYS").arg(full_pattern).query_async(&mut conn).await
            })
            .await?;
        Ok(keys.iter().map(|k| self.client.strip_prefix(k)).collect())
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> CacheResult<(u64, Vec<String>)> {
        let mut cmd = redis::cmd("SCAN");
        cmd.arg(cursor)
            .arg("MATCH")
            .arg(self.client.prefixed_key(pattern))
            .arg("COUNT")
            .arg(count.max(1));
        let (next, keys): (u64, Vec<String>) = self
            .client
            .execute(|mut conn| async move { cmd.query_async(&mut conn).await })
            .await?;
        Ok((next, keys.iter().map(|k| self.client.strip_prefix(k)).collect()))
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64> {
        let full_channel = self.client.prefixed_key(channel);
        let message = message.to_string();
        self.client
            .execute(|mut conn| async move { conn.publish(full_channel, message).await })
            .await
    }

    async fn subscribe(&self, channels: &[&str]) -> CacheResult<Subscription> {
        super::pubsub::subscribe(&self.client, channels, SUBSCRIPTION_BUFFER, &self.shutdown)
            .await
    }

    async fn ping(&self) -> CacheResult<()> {
        self.client.ping().await
    }

    async fn close(&self) -> CacheResult<()> {
        self.shutdown.cancel();
        self.client.disconnect().await;
        info!("Redis cache closed");
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.client.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn unreachable_provider() -> RedisCacheProvider {
        let config = RedisCacheConfig {
            url: "redis://127.0.0.1:1".to_string(),
            connect_timeout_ms: 200,
            health_check_interval_seconds: 0,
            ..RedisCacheConfig::default()
        };
        RedisCacheProvider::connect(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_unavailable_backend_fails_fast() {
        let provider = unreachable_provider().await;
        assert!(!provider.is_available());

        let err = provider.get("k").await.unwrap_err();
        assert!(err.is_cache_unavailable());
        assert!(!err.is_cache_miss());

        let err = provider.hincrby("h", "f", 1).await.unwrap_err();
        assert!(err.is_cache_unavailable());

        let err = provider.subscribe(&["chan"]).await.unwrap_err();
        assert!(err.is_cache_unavailable());
    }

    #[tokio::test]
    async fn test_failed_ping_keeps_unavailable() {
        let provider = unreachable_provider().await;
        assert!(provider.ping().await.is_err());
        assert!(!provider.is_available());
        provider.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_batches_skip_the_network() {
        let provider = unreachable_provider().await;
        assert!(provider.mget(&[]).await.unwrap().is_empty());
        provider.mdelete(&[]).await.unwrap();
        provider.mset(&HashMap::new(), Duration::ZERO).await.unwrap();
    }
}
