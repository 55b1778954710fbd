//! # pulse-service
//!
//! Domain caches built on a [`CacheProvider`](pulse_core::traits::cache::CacheProvider).
//! A miss or an unreachable backend reads as "not cached" so callers fall
//! back to the system of record; write failures are logged and swallowed.

pub mod feed_cache;
pub mod message_cache;

pub use feed_cache::FeedCache;
pub use message_cache::{CachedMessage, ConversationSummary, MessageCache, Presence};
