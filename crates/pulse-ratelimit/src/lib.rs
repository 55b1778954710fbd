//! # pulse-ratelimit
//!
//! Request throttling for Pulse:
//!
//! - [`MemoryRateLimiter`]: per-key token buckets with a forgiveness
//!   allowance. Single instance only.
//! - [`RedisRateLimiter`]: sliding-window log evaluated by one atomic Lua
//!   script, shared by every instance. Fails open on backend errors.
//! - [`HybridRateLimiter`]: picks one of the two at construction.

pub mod hybrid;
pub mod memory;
pub mod policy;
pub mod redis;

pub use hybrid::HybridRateLimiter;
pub use memory::MemoryRateLimiter;
pub use policy::{RequestIdentity, enforce};
pub use redis::RedisRateLimiter;
