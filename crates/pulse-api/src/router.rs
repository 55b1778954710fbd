//! Route definitions for the Pulse HTTP API.
//!
//! Application routes are mounted under `/api` behind the `global` policy;
//! route groups can add a stricter named policy with [`throttled`].

use axum::Router;
use axum::middleware as axum_middleware;
use axum::routing::get;

use crate::handlers;
use crate::middleware::{self, PolicyGuard};
use crate::state::AppState;

/// Build the router around the application's `/api` routes.
pub fn build_router(state: AppState, api_routes: Router<AppState>) -> Router {
    let api = api_routes
        .route("/rate-limit", get(handlers::quota::quota))
        .layer(axum_middleware::from_fn_with_state(
            PolicyGuard::new(&state, "global"),
            middleware::rate_limit,
        ));

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api", api)
        .layer(axum_middleware::from_fn(
            middleware::logging::request_logging,
        ))
        .with_state(state)
}

/// Throttle a route group with the named policy, e.g. `login` or `register`.
pub fn throttled(routes: Router<AppState>, state: &AppState, policy: &str) -> Router<AppState> {
    routes.route_layer(axum_middleware::from_fn_with_state(
        PolicyGuard::new(state, policy),
        middleware::rate_limit,
    ))
}
