//! Liveness and backend topology report.

use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};

use pulse_core::traits::cache::CacheProvider;

use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the cache backend is unreachable.
    pub status: String,
    pub version: String,
    /// Active cache backend (`memory` or `redis`).
    pub cache_backend: String,
    /// Whether the cache backend answers.
    pub cache_available: bool,
    /// Rate limiter topology (`distributed` or `local`).
    pub rate_limiter: String,
}

/// `GET /health`. Never throttled; a down cache reports `degraded` with 200
/// because the limiter and memory fallback keep serving.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache_available = state.cache.is_available();
    Json(HealthResponse {
        status: if cache_available { "ok" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        cache_backend: state.cache.backend_name().to_string(),
        cache_available,
        rate_limiter: if state.limiter.is_distributed() {
            "distributed"
        } else {
            "local"
        }
        .to_string(),
    })
}
