//! # pulse-core
//!
//! Core crate for Pulse. Contains the cache provider and rate limiter
//! traits, configuration schemas, and the unified error system.
//!
//! This crate has **no** internal dependencies on other Pulse crates.

pub mod config;
pub mod error;
pub mod result;
pub mod traits;

pub use error::{AppError, CacheError};
pub use result::{AppResult, CacheResult};
