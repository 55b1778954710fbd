//! # pulse-cache
//!
//! Cache provider implementations for Pulse. Supports two modes:
//!
//! - **memory**: process-local maps with a background expiry sweep and
//!   in-process pub/sub. Single-instance deployments only.
//! - **redis**: Redis-backed cache using the [redis](https://crates.io/crates/redis) crate,
//!   shared by every server instance.
//!
//! The provider is selected at runtime based on configuration.

pub mod keys;
#[cfg(feature = "memory")]
pub mod memory;
pub mod provider;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use provider::CacheManager;
