//! Message, conversation-list, presence, typing and unread-count caches.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pulse_cache::keys;
use pulse_core::result::CacheResult;
use pulse_core::traits::cache::{CacheProvider, CacheProviderExt, Subscription};

/// Messages kept per conversation.
pub const RECENT_MESSAGES_LIMIT: usize = 50;
/// Lifetime of a conversation's recency list.
const RECENT_MESSAGES_TTL: Duration = Duration::from_secs(24 * 3600);
/// Lifetime of a cached conversation list.
const CONVERSATION_LIST_TTL: Duration = Duration::from_secs(300);
/// Lifetime of an online presence record without a heartbeat.
const ONLINE_TTL: Duration = Duration::from_secs(300);
/// Lifetime of an offline presence record.
const OFFLINE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
/// Lifetime of a typing indicator.
const TYPING_TTL: Duration = Duration::from_secs(5);

/// A message as stored in the recency list and published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedMessage {
    /// Message id.
    pub id: String,
    /// Conversation the message belongs to.
    pub conversation_id: String,
    /// Author.
    pub sender_id: String,
    /// Text content.
    pub body: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// One row of a user's conversation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation id.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Preview of the latest message.
    pub last_message_preview: Option<String>,
    /// Time of the latest message.
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Presence record of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Whether the user is connected.
    pub online: bool,
    /// Last time the user was seen.
    pub last_seen: DateTime<Utc>,
}

/// Caches for the messaging feature.
#[derive(Debug, Clone)]
pub struct MessageCache {
    /// Cache provider.
    cache: Arc<dyn CacheProvider>,
}

impl MessageCache {
    /// Creates a new message cache.
    pub fn new(cache: Arc<dyn CacheProvider>) -> Self {
        Self { cache }
    }

    // ── Recent messages ────────────────────────────────────

    /// Prepend a message to its conversation's recency list and publish it.
    pub async fn push_message(&self, message: &CachedMessage) {
        let key = keys::recent_messages(&message.conversation_id);
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize message");
                return;
            }
        };

        let channel = keys::message_channel(&message.conversation_id);
        log_write(&key, self.try_push(&key, &json, &channel).await);
    }

    async fn try_push(&self, key: &str, json: &str, channel: &str) -> CacheResult<()> {
        self.cache.lpush(key, &[json]).await?;
        self.cache
            .ltrim(key, 0, RECENT_MESSAGES_LIMIT as i64 - 1)
            .await?;
        self.cache.expire(key, RECENT_MESSAGES_TTL).await?;
        self.cache.publish(channel, json).await?;
        Ok(())
    }

    /// Newest-first messages of a conversation, at most `limit`.
    ///
    /// `None` when nothing is cached. A zero `limit` is an empty page.
    pub async fn recent_messages(
        &self,
        conversation_id: impl Display,
        limit: usize,
    ) -> Option<Vec<CachedMessage>> {
        if limit == 0 {
            return Some(Vec::new());
        }
        let key = keys::recent_messages(conversation_id);
        let stop = limit.min(RECENT_MESSAGES_LIMIT) as i64 - 1;
        let raw = read(&key, self.cache.lrange(&key, 0, stop).await)?;
        if raw.is_empty() {
            return None;
        }

        let messages: Vec<CachedMessage> = raw
            .iter()
            .filter_map(|json| serde_json::from_str(json).ok())
            .collect();
        if messages.len() != raw.len() {
            warn!(key = %key, "Dropping corrupt message list");
            self.invalidate_messages_key(&key).await;
            return None;
        }
        Some(messages)
    }

    /// Replace a conversation's recency list, newest first.
    pub async fn set_recent_messages(
        &self,
        conversation_id: impl Display,
        messages: &[CachedMessage],
    ) {
        let key = keys::recent_messages(conversation_id);
        let encoded: Result<Vec<String>, _> = messages
            .iter()
            .take(RECENT_MESSAGES_LIMIT)
            .map(serde_json::to_string)
            .collect();
        let encoded = match encoded {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(error = %e, "Failed to serialize messages");
                return;
            }
        };

        log_write(&key, self.try_replace(&key, &encoded).await);
    }

    async fn try_replace(&self, key: &str, encoded: &[String]) -> CacheResult<()> {
        self.cache.delete(key).await?;
        if encoded.is_empty() {
            return Ok(());
        }
        // LPUSH reverses, so push oldest first.
        let values: Vec<&str> = encoded.iter().rev().map(String::as_str).collect();
        self.cache.lpush(key, &values).await?;
        self.cache.expire(key, RECENT_MESSAGES_TTL).await?;
        Ok(())
    }

    /// Drop a conversation's recency list.
    pub async fn invalidate_messages(&self, conversation_id: impl Display) {
        self.invalidate_messages_key(&keys::recent_messages(conversation_id))
            .await;
    }

    async fn invalidate_messages_key(&self, key: &str) {
        log_write(key, self.cache.delete(key).await);
    }

    /// Subscribe to new messages of a conversation.
    pub async fn subscribe_messages(
        &self,
        conversation_id: impl Display,
    ) -> CacheResult<Subscription> {
        self.cache
            .subscribe(&[&keys::message_channel(conversation_id)])
            .await
    }

    // ── Conversation lists ─────────────────────────────────

    /// Cache a user's conversation list.
    pub async fn set_conversation_list(
        &self,
        user_id: impl Display,
        conversations: &[ConversationSummary],
    ) {
        let key = keys::conversation_list(user_id);
        let result = self
            .cache
            .set_json(&key, &conversations, CONVERSATION_LIST_TTL)
            .await;
        log_write(&key, result);
    }

    /// A user's cached conversation list.
    pub async fn conversation_list(
        &self,
        user_id: impl Display,
    ) -> Option<Vec<ConversationSummary>> {
        let key = keys::conversation_list(user_id);
        read(&key, self.cache.get_json(&key).await).flatten()
    }

    /// Drop the cached conversation lists of every participant.
    pub async fn invalidate_conversation_lists<I: Display>(&self, user_ids: &[I]) {
        let list_keys: Vec<String> = user_ids.iter().map(keys::conversation_list).collect();
        let refs: Vec<&str> = list_keys.iter().map(String::as_str).collect();
        log_write("conv:list", self.cache.mdelete(&refs).await);
    }

    // ── Presence ───────────────────────────────────────────

    /// Mark a user online. Repeat as a heartbeat to stay online.
    pub async fn set_online(&self, user_id: impl Display) {
        self.write_presence(user_id, true, ONLINE_TTL).await;
    }

    /// Mark a user offline, recording the last-seen time.
    pub async fn set_offline(&self, user_id: impl Display) {
        self.write_presence(user_id, false, OFFLINE_TTL).await;
    }

    async fn write_presence(&self, user_id: impl Display, online: bool, ttl: Duration) {
        let key = keys::presence(user_id);
        let fields = HashMap::from([
            ("online".to_string(), if online { "1" } else { "0" }.to_string()),
            ("last_seen".to_string(), Utc::now().to_rfc3339()),
        ]);

        let result = match self.cache.hset(&key, &fields).await {
            Ok(()) => self.cache.expire(&key, ttl).await.map(drop),
            Err(e) => Err(e),
        };
        log_write(&key, result);
    }

    /// A user's presence. `None` when unknown or expired.
    pub async fn presence(&self, user_id: impl Display) -> Option<Presence> {
        let key = keys::presence(user_id);
        let fields = read(&key, self.cache.hgetall(&key).await)?;
        let last_seen = fields
            .get("last_seen")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())?
            .with_timezone(&Utc);
        Some(Presence {
            online: fields.get("online").is_some_and(|v| v == "1"),
            last_seen,
        })
    }

    /// Presence of several users; unknown users are omitted.
    pub async fn presence_many<I: Display>(&self, user_ids: &[I]) -> HashMap<String, Presence> {
        let mut result = HashMap::with_capacity(user_ids.len());
        for user_id in user_ids {
            if let Some(presence) = self.presence(user_id).await {
                result.insert(user_id.to_string(), presence);
            }
        }
        result
    }

    // ── Typing indicators ──────────────────────────────────

    /// Record that a user is typing. Expires on its own after a few seconds.
    pub async fn set_typing(&self, conversation_id: impl Display, user_id: impl Display) {
        let key = keys::typing(conversation_id, user_id);
        log_write(&key, self.cache.set(&key, "1", TYPING_TTL).await);
    }

    /// Clear a typing indicator.
    pub async fn clear_typing(&self, conversation_id: impl Display, user_id: impl Display) {
        let key = keys::typing(conversation_id, user_id);
        log_write(&key, self.cache.delete(&key).await);
    }

    /// Users currently typing in a conversation.
    pub async fn typing_users(&self, conversation_id: impl Display) -> Vec<String> {
        let pattern = keys::typing_pattern(&conversation_id);
        let prefix = pattern.trim_end_matches('*').to_string();
        let mut users: Vec<String> = read(&pattern, self.cache.keys(&pattern).await)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        users.sort();
        users
    }

    // ── Unread counters ────────────────────────────────────

    /// Add one unread message for a user in a conversation.
    pub async fn increment_unread(
        &self,
        user_id: impl Display,
        conversation_id: impl Display,
    ) -> Option<i64> {
        let key = keys::unread_counts(user_id);
        read(
            &key,
            self.cache
                .hincrby(&key, &conversation_id.to_string(), 1)
                .await,
        )
    }

    /// Mark a conversation read for a user.
    pub async fn clear_unread(&self, user_id: impl Display, conversation_id: impl Display) {
        let key = keys::unread_counts(user_id);
        let field = conversation_id.to_string();
        log_write(&key, self.cache.hdel(&key, &[&field]).await);
    }

    /// Unread counts per conversation. `None` when nothing is cached.
    pub async fn unread_counts(&self, user_id: impl Display) -> Option<HashMap<String, i64>> {
        let key = keys::unread_counts(user_id);
        let raw = read(&key, self.cache.hgetall(&key).await)?;
        if raw.is_empty() {
            return None;
        }
        Some(
            raw.into_iter()
                .filter_map(|(conv, count)| count.parse().ok().map(|n| (conv, n)))
                .collect(),
        )
    }
}

/// Turn a read into `Some` on success and `None` on any cache failure.
pub(crate) fn read<T>(key: &str, result: CacheResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if e.is_cache_miss() => {
            debug!(key, "Cache miss");
            None
        }
        Err(e) => {
            warn!(key, error = %e, "Cache read failed");
            None
        }
    }
}

/// Log a failed write; writes never fail the caller.
pub(crate) fn log_write<T>(key: &str, result: CacheResult<T>) {
    if let Err(e) = result {
        warn!(key, error = %e, "Cache write failed");
    }
}
