//! Unified error types for Pulse.
//!
//! Cache providers report failures as [`CacheError`], whose variants
//! separate an ordinary miss from an unreachable backend. Everything at
//! the application boundary (configuration, startup, HTTP) is mapped into
//! [`AppError`] for consistent propagation through the `?` operator.

use std::fmt;
use thiserror::Error;

/// Failure of a cache provider operation.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key (or hash field) is absent or has expired.
    #[error("cache miss: {key}")]
    Miss {
        /// The key that was looked up.
        key: String,
    },
    /// The backend cannot be reached. Never used for a plain miss.
    #[error("cache unavailable: {reason}")]
    Unavailable {
        /// Why the backend is considered unreachable.
        reason: String,
    },
    /// The backend rejected a well-formed request.
    #[error("cache operation failed: {message}")]
    Backend {
        /// What went wrong.
        message: String,
        /// Underlying backend error, when there is one.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    /// A cached value could not be encoded or decoded as JSON.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Create a miss error for the given key.
    pub fn miss(key: impl Into<String>) -> Self {
        Self::Miss { key: key.into() }
    }

    /// Create an unavailable error.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    /// Create a backend error without an underlying cause.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            source: None,
        }
    }

    /// Create a backend error wrapping its cause.
    pub fn backend_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Whether this error is a cache miss.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, Self::Miss { .. })
    }

    /// Whether this error means the backend is unreachable.
    pub fn is_cache_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Returns `true` if `err` is a cache miss.
pub fn is_cache_miss(err: &CacheError) -> bool {
    err.is_cache_miss()
}

/// Returns `true` if `err` means the cache backend is unreachable.
pub fn is_cache_unavailable(err: &CacheError) -> bool {
    err.is_cache_unavailable()
}

/// Category of an [`AppError`], used to pick the HTTP status and error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Validation,
    RateLimit,
    Internal,
    Cache,
    Configuration,
    Serialization,
    ServiceUnavailable,
}

impl ErrorKind {
    /// Stable upper-case name, as printed in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Validation => "VALIDATION",
            Self::RateLimit => "RATE_LIMIT",
            Self::Internal => "INTERNAL",
            Self::Cache => "CACHE",
            Self::Configuration => "CONFIGURATION",
            Self::Serialization => "SERIALIZATION",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error at the application boundary: startup, configuration and HTTP.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            source: Some(Box::new(source)),
            ..Self::new(kind, message)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cache, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// The cache backend required by the configuration is unreachable.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceUnavailable, message)
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        let kind = match &err {
            CacheError::Miss { .. } => ErrorKind::NotFound,
            CacheError::Unavailable { .. } => ErrorKind::ServiceUnavailable,
            CacheError::Serialization(_) => ErrorKind::Serialization,
            CacheError::Backend { .. } => ErrorKind::Cache,
        };
        Self::with_source(kind, err.to_string(), err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::with_source(ErrorKind::Serialization, err.to_string(), err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::Internal, err.to_string(), err)
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::with_source(ErrorKind::Configuration, err.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicates_distinguish_miss_from_unavailable() {
        let miss = CacheError::miss("user:1");
        let down = CacheError::unavailable("connection refused");

        assert!(is_cache_miss(&miss));
        assert!(!is_cache_unavailable(&miss));
        assert!(is_cache_unavailable(&down));
        assert!(!is_cache_miss(&down));
        assert!(!CacheError::backend("WRONGTYPE").is_cache_miss());
    }

    #[test]
    fn test_cache_error_maps_to_app_error_kind() {
        let err: AppError = CacheError::unavailable("down").into();
        assert_eq!(err.kind, ErrorKind::ServiceUnavailable);

        let err: AppError = CacheError::miss("k").into();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.to_string().starts_with("NOT_FOUND: "));
    }
}
