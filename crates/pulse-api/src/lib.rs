//! # pulse-api
//!
//! Axum integration for the Pulse rate limiter and cache: per-policy
//! throttling middleware, client identity extraction, a health endpoint
//! and the server bootstrap.

pub mod app;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use app::{build_app, run_server};
pub use state::AppState;
