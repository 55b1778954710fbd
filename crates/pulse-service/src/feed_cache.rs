//! Cached feed pages.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use pulse_cache::keys;
use pulse_core::traits::cache::{CacheProvider, CacheProviderExt};

use crate::message_cache::{log_write, read};

/// Default lifetime of a cached feed page.
pub const DEFAULT_FEED_TTL: Duration = Duration::from_secs(120);

/// Per-user and global feed pages stored as JSON blobs.
#[derive(Debug, Clone)]
pub struct FeedCache {
    /// Cache provider.
    cache: Arc<dyn CacheProvider>,
    /// Page lifetime.
    ttl: Duration,
}

impl FeedCache {
    /// Creates a feed cache with the default page lifetime.
    pub fn new(cache: Arc<dyn CacheProvider>) -> Self {
        Self::with_ttl(cache, DEFAULT_FEED_TTL)
    }

    /// Creates a feed cache with a custom page lifetime.
    pub fn with_ttl(cache: Arc<dyn CacheProvider>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// A cached page of a user's feed.
    pub async fn page<T>(&self, user_id: impl Display, page: u32) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        let key = keys::feed_page(user_id, page);
        read(&key, self.cache.get_json(&key).await).flatten()
    }

    /// Cache a page of a user's feed.
    pub async fn set_page<T>(&self, user_id: impl Display, page: u32, items: &T)
    where
        T: Serialize + Send + Sync,
    {
        let key = keys::feed_page(user_id, page);
        log_write(&key, self.cache.set_json(&key, items, self.ttl).await);
    }

    /// Drop every cached page of a user's feed.
    pub async fn invalidate_user(&self, user_id: impl Display) -> u64 {
        let pattern = keys::feed_pattern(user_id);
        let deleted = read(&pattern, self.cache.delete_pattern(&pattern).await).unwrap_or(0);
        debug!(pattern = %pattern, deleted, "Invalidated feed pages");
        deleted
    }

    /// Drop the cached feeds of several users, e.g. the followers of an author.
    pub async fn invalidate_users<I: Display>(&self, user_ids: &[I]) -> u64 {
        let mut deleted = 0;
        for user_id in user_ids {
            deleted += self.invalidate_user(user_id).await;
        }
        deleted
    }

    /// A cached page of the global feed.
    pub async fn global_page<T>(&self, page: u32) -> Option<T>
    where
        T: DeserializeOwned + Send,
    {
        let key = keys::global_feed(page);
        read(&key, self.cache.get_json(&key).await).flatten()
    }

    /// Cache a page of the global feed.
    pub async fn set_global_page<T>(&self, page: u32, items: &T)
    where
        T: Serialize + Send + Sync,
    {
        let key = keys::global_feed(page);
        log_write(&key, self.cache.set_json(&key, items, self.ttl).await);
    }

    /// Drop every cached global feed page.
    pub async fn invalidate_global(&self) -> u64 {
        let pattern = keys::global_feed_pattern();
        read(&pattern, self.cache.delete_pattern(&pattern).await).unwrap_or(0)
    }
}
