//! Cache provider trait for pluggable caching backends.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::result::CacheResult;

/// A message delivered to a [`Subscription`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Channel the message was published on.
    pub channel: String,
    /// Message body.
    pub payload: String,
}

/// Remaining lifetime of a key.
///
/// Converts to the usual integer sentinels with [`KeyTtl::as_seconds`]:
/// `-1` for a key without expiry and `-2` for a missing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// The key does not exist or has expired.
    Missing,
    /// The key exists and never expires.
    Persistent,
    /// The key expires after the given duration.
    Expires(Duration),
}

impl KeyTtl {
    /// Whole seconds remaining, or the `-1` / `-2` sentinel.
    pub fn as_seconds(&self) -> i64 {
        match self {
            Self::Missing => -2,
            Self::Persistent => -1,
            Self::Expires(d) => d.as_secs() as i64,
        }
    }

    /// Build from a millisecond TTL using the `-1` / `-2` sentinels.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            -2 => Self::Missing,
            -1 => Self::Persistent,
            ms if ms < 0 => Self::Missing,
            ms => Self::Expires(Duration::from_millis(ms as u64)),
        }
    }
}

/// A live binding of one or more pub/sub channels to a consumer.
///
/// Delivery is at-most-once: the publisher never waits for a slow
/// subscriber, so messages are dropped once the buffer is full.
/// Closing (or dropping) the subscription stops delivery and removes it
/// from the provider's fan-out table.
pub struct Subscription {
    channels: Vec<String>,
    receiver: mpsc::Receiver<PubSubMessage>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Create a subscription; `on_close` runs exactly once when it is closed.
    pub fn new(
        channels: Vec<String>,
        receiver: mpsc::Receiver<PubSubMessage>,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channels,
            receiver,
            on_close: Some(Box::new(on_close)),
        }
    }

    /// Channels this subscription listens on.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Wait for the next message. Returns `None` once closed.
    pub async fn recv(&mut self) -> Option<PubSubMessage> {
        self.receiver.recv().await
    }

    /// Take a buffered message without waiting.
    pub fn try_recv(&mut self) -> Option<PubSubMessage> {
        self.receiver.try_recv().ok()
    }

    /// The underlying delivery channel.
    pub fn channel(&mut self) -> &mut mpsc::Receiver<PubSubMessage> {
        &mut self.receiver
    }

    /// Whether [`Subscription::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.on_close.is_none()
    }

    /// Stop delivery and deregister from the provider. Idempotent.
    pub fn close(&mut self) {
        if let Some(on_close) = self.on_close.take() {
            on_close();
            self.receiver.close();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("channels", &self.channels)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

/// Trait for cache backends (Redis or in-memory).
///
/// Values are strings; structured values go through
/// [`CacheProviderExt::get_json`] / [`CacheProviderExt::set_json`].
/// A `Duration::ZERO` TTL means the entry never expires. Absent keys are
/// reported as [`CacheError::Miss`](crate::error::CacheError::Miss) and an
/// unreachable backend as
/// [`CacheError::Unavailable`](crate::error::CacheError::Unavailable).
#[async_trait]
pub trait CacheProvider: Send + Sync + fmt::Debug + 'static {
    /// Get a value by key.
    async fn get(&self, key: &str) -> CacheResult<String>;

    /// Set a value with a TTL (`Duration::ZERO` = no expiry).
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Get several values at once. Missing keys yield an empty string.
    async fn mget(&self, keys: &[&str]) -> CacheResult<Vec<String>>;

    /// Set several values with a shared TTL.
    async fn mset(&self, entries: &HashMap<String, String>, ttl: Duration) -> CacheResult<()>;

    /// Delete several keys.
    async fn mdelete(&self, keys: &[&str]) -> CacheResult<()>;

    /// Prepend values, one at a time in argument order, so the last value
    /// ends up at the head. Returns the new list length.
    async fn lpush(&self, key: &str, values: &[&str]) -> CacheResult<u64>;

    /// Read an inclusive index range; negative indices count from the end.
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> CacheResult<Vec<String>>;

    /// Keep only the inclusive index range, removing the list if it is empty.
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> CacheResult<()>;

    /// Get one hash field.
    async fn hget(&self, key: &str, field: &str) -> CacheResult<String>;

    /// Set one or more hash fields.
    async fn hset(&self, key: &str, fields: &HashMap<String, String>) -> CacheResult<()>;

    /// Get every field of a hash. An absent hash yields an empty map.
    async fn hgetall(&self, key: &str) -> CacheResult<HashMap<String, String>>;

    /// Delete hash fields. Returns how many existed.
    async fn hdel(&self, key: &str, fields: &[&str]) -> CacheResult<u64>;

    /// Atomically add `delta` to an integer hash field.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> CacheResult<i64>;

    /// Increment an integer value by 1. Returns the new value.
    async fn incr(&self, key: &str) -> CacheResult<i64>;

    /// Decrement an integer value by 1. Returns the new value.
    async fn decr(&self, key: &str) -> CacheResult<i64>;

    /// Set a value only if the key does not already exist (NX).
    /// Returns `true` if the value was set.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> CacheResult<bool>;

    /// Set the TTL on an existing key. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Remaining lifetime of a key.
    async fn ttl(&self, key: &str) -> CacheResult<KeyTtl>;

    /// All keys matching a glob pattern. Full scan; low-cardinality use only.
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Incremental iteration. A returned cursor of `0` means iteration is done.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize)
    -> CacheResult<(u64, Vec<String>)>;

    /// Publish a message. Returns how many subscribers it was handed to.
    async fn publish(&self, channel: &str, message: &str) -> CacheResult<u64>;

    /// Subscribe to one or more channels.
    async fn subscribe(&self, channels: &[&str]) -> CacheResult<Subscription>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> CacheResult<()>;

    /// Stop background tasks and release connections.
    async fn close(&self) -> CacheResult<()>;

    /// Whether the backend is currently considered reachable.
    fn is_available(&self) -> bool;

    /// Delete every key matching a glob pattern. Returns the number deleted.
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64> {
        let mut cursor = 0;
        let mut deleted = 0u64;
        loop {
            let (next, batch) = self.scan(cursor, pattern, 500).await?;
            if !batch.is_empty() {
                let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
                self.mdelete(&refs).await?;
                deleted += batch.len() as u64;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }
        tracing::debug!(pattern, deleted, "Deleted keys matching pattern");
        Ok(deleted)
    }
}

/// Typed helpers available on every [`CacheProvider`], including trait objects.
#[async_trait]
pub trait CacheProviderExt: CacheProvider {
    /// Get a value, mapping a miss to `None`.
    async fn get_opt(&self, key: &str) -> CacheResult<Option<String>> {
        match self.get(key).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_cache_miss() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get a typed value by deserializing from JSON.
    async fn get_json<T: serde::de::DeserializeOwned + Send>(
        &self,
        key: &str,
    ) -> CacheResult<Option<T>> {
        match self.get_opt(key).await? {
            Some(value) => Ok(Some(serde_json::from_str(&value)?)),
            None => Ok(None),
        }
    }

    /// Set a typed value by serializing to JSON.
    async fn set_json<T: serde::Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheResult<()> {
        let json = serde_json::to_string(value)?;
        self.set(key, &json, ttl).await
    }
}

impl<P: CacheProvider + ?Sized> CacheProviderExt for P {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_sentinels() {
        assert_eq!(KeyTtl::Missing.as_seconds(), -2);
        assert_eq!(KeyTtl::Persistent.as_seconds(), -1);
        assert_eq!(KeyTtl::from_millis(-1), KeyTtl::Persistent);
        assert_eq!(KeyTtl::from_millis(-2), KeyTtl::Missing);
        assert_eq!(KeyTtl::from_millis(2500).as_seconds(), 2);
    }

    #[tokio::test]
    async fn test_subscription_close_runs_hook_once() {
        let (tx, rx) = mpsc::channel(4);
        let (hook_tx, mut hook_rx) = mpsc::unbounded_channel();
        let mut sub = Subscription::new(vec!["news".to_string()], rx, move || {
            let _ = hook_tx.send(());
        });

        tx.send(PubSubMessage {
            channel: "news".to_string(),
            payload: "hello".to_string(),
        })
        .await
        .unwrap();
        assert_eq!(sub.recv().await.unwrap().payload, "hello");

        sub.close();
        sub.close();
        drop(sub);

        assert!(hook_rx.recv().await.is_some());
        assert!(hook_rx.recv().await.is_none());
        assert!(tx.is_closed());
    }
}
