//! Core trait definitions for Pulse's pluggable components.

pub mod cache;
pub mod rate_limiter;

pub use cache::{CacheProvider, CacheProviderExt, KeyTtl, PubSubMessage, Subscription};
pub use rate_limiter::{RateLimitDecision, RateLimiter};
