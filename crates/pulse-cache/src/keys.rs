//! Cache key builders for every Pulse cache entry.
//!
//! Keys follow `<domain>:<qualifier>:<id>`. Building them in one place
//! keeps the derived caches and the rate limiter from drifting apart.

use std::fmt::Display;

// ── Message keys ───────────────────────────────────────────

/// Recency list of serialized messages for a conversation, newest first.
pub fn recent_messages(conversation_id: impl Display) -> String {
    format!("msg:conv:{conversation_id}")
}

/// JSON blob with a user's conversation list.
pub fn conversation_list(user_id: impl Display) -> String {
    format!("conv:list:{user_id}")
}

/// Pub/sub channel carrying new messages of a conversation.
pub fn message_channel(conversation_id: impl Display) -> String {
    format!("chan:conv:{conversation_id}")
}

// ── Presence keys ──────────────────────────────────────────

/// Presence hash (`online`, `last_seen`) of a user.
pub fn presence(user_id: impl Display) -> String {
    format!("presence:user:{user_id}")
}

/// Short-lived typing indicator of a user in a conversation.
pub fn typing(conversation_id: impl Display, user_id: impl Display) -> String {
    format!("typing:conv:{conversation_id}:{user_id}")
}

/// Pattern matching every typing indicator of a conversation.
pub fn typing_pattern(conversation_id: impl Display) -> String {
    format!("typing:conv:{conversation_id}:*")
}

/// Hash of per-conversation unread counters of a user.
pub fn unread_counts(user_id: impl Display) -> String {
    format!("unread:user:{user_id}")
}

// ── Feed keys ──────────────────────────────────────────────

/// JSON blob for one page of a user's feed.
pub fn feed_page(user_id: impl Display, page: u32) -> String {
    format!("feed:user:{user_id}:page:{page}")
}

/// Pattern matching every cached feed page of a user.
pub fn feed_pattern(user_id: impl Display) -> String {
    format!("feed:user:{user_id}:*")
}

/// JSON blob for one page of the global feed.
pub fn global_feed(page: u32) -> String {
    format!("feed:global:page:{page}")
}

/// Pattern matching every cached global feed page.
pub fn global_feed_pattern() -> String {
    "feed:global:*".to_string()
}

// ── Rate limit keys ────────────────────────────────────────

/// Rate limit key for a policy and a request identity.
pub fn rate_limit(policy: &str, identity: impl Display) -> String {
    format!("{policy}:{identity}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(recent_messages(1), "msg:conv:1");
        assert_eq!(typing("c9", "u3"), "typing:conv:c9:u3");
        assert_eq!(feed_page("u1", 2), "feed:user:u1:page:2");
        assert_eq!(rate_limit("login", "1.2.3.4:/auth/login"), "login:1.2.3.4:/auth/login");
    }

    #[cfg(feature = "memory")]
    #[test]
    fn test_patterns_cover_their_keys() {
        use crate::memory::pattern::glob_match;

        assert!(glob_match(&feed_pattern("u1"), &feed_page("u1", 7)));
        assert!(!glob_match(&feed_pattern("u1"), &feed_page("u10", 7)));
        assert!(glob_match(&typing_pattern("c1"), &typing("c1", "u2")));
        assert!(glob_match(&global_feed_pattern(), &global_feed(3)));
    }
}
