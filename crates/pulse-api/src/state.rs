//! Shared handler state.

use std::sync::Arc;

use pulse_cache::CacheManager;
use pulse_core::config::AppConfig;
use pulse_core::traits::rate_limiter::RateLimiter;
use pulse_service::{FeedCache, MessageCache};

/// Everything a handler or middleware needs, cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<CacheManager>,
    /// Local or distributed, fixed at startup.
    pub limiter: Arc<dyn RateLimiter>,
    pub messages: Arc<MessageCache>,
    pub feeds: Arc<FeedCache>,
}

impl AppState {
    /// Assemble the state; the derived caches share `cache`.
    pub fn new(config: AppConfig, cache: Arc<CacheManager>, limiter: Arc<dyn RateLimiter>) -> Self {
        let provider = cache.provider();
        Self {
            config: Arc::new(config),
            messages: Arc::new(MessageCache::new(provider.clone())),
            feeds: Arc::new(FeedCache::new(provider)),
            cache,
            limiter,
        }
    }
}
