//! Application builder and server bootstrap.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use pulse_cache::CacheManager;
use pulse_core::config::AppConfig;
use pulse_core::error::{AppError, ErrorKind};
use pulse_core::traits::cache::CacheProvider;
use pulse_core::traits::rate_limiter::RateLimiter;
use pulse_ratelimit::HybridRateLimiter;

use crate::router::build_router;
use crate::state::AppState;

/// Builds the complete Axum application with all routes and middleware.
pub fn build_app(state: AppState, api_routes: Router<AppState>) -> Router {
    build_router(state, api_routes).layer(TraceLayer::new_for_http())
}

/// Runs the Pulse server until ctrl-c or SIGTERM, then stops every
/// background task owned by the cache and the rate limiter.
pub async fn run_server(config: AppConfig, api_routes: Router<AppState>) -> Result<(), AppError> {
    info!("Starting Pulse server...");

    // ── Cache ────────────────────────────────────────────────
    info!(provider = %config.cache.provider, "Initializing cache");
    let cache = Arc::new(CacheManager::new(&config.cache).await?);

    // ── Rate limiter ─────────────────────────────────────────
    let limiter: Arc<dyn RateLimiter> =
        Arc::new(HybridRateLimiter::new(cache.distributed(), &config.rate_limit));

    // ── HTTP server ──────────────────────────────────────────
    let addr = config.server.bind_address();
    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let state = AppState::new(config, Arc::clone(&cache), Arc::clone(&limiter));
    let app = build_app(state, api_routes);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        AppError::with_source(ErrorKind::Internal, format!("Failed to bind {addr}"), e)
    })?;
    info!(address = %addr, "Pulse server listening");

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        let _ = stop_tx.send(true);
    })
    .into_future();

    // Lingering connections get `grace` to finish once the signal arrives.
    let deadline = async move {
        let _ = stop_rx.wait_for(|stopped| *stopped).await;
        tokio::time::sleep(grace).await;
    };

    let result = tokio::select! {
        served = server => served.map_err(AppError::from),
        _ = deadline => {
            warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out");
            Ok(())
        }
    };

    // ── Cleanup ──────────────────────────────────────────────
    info!("Stopping background tasks");
    limiter.shutdown().await;
    if let Err(e) = cache.close().await {
        error!(error = %e, "Failed to close cache");
    }
    info!("Pulse server stopped");

    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
