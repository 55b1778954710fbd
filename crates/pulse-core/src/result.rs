//! Convenience result type aliases for Pulse.

use crate::error::{AppError, CacheError};

/// A specialized `Result` type for application-level operations.
pub type AppResult<T> = Result<T, AppError>;

/// A specialized `Result` type for cache provider operations.
///
/// Every cache failure is a [`CacheError`], so callers can branch on
/// misses and unavailability without inspecting messages.
pub type CacheResult<T> = Result<T, CacheError>;
