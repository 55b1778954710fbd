//! Access log middleware.

use std::time::Instant;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{Level, event};

/// One event per request. Throttled requests are logged at `warn` so they
/// stand out from normal traffic.
pub async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if status == StatusCode::TOO_MANY_REQUESTS {
        event!(Level::WARN, %method, %path, status = status.as_u16(), elapsed_ms, "Request throttled");
    } else {
        event!(Level::INFO, %method, %path, status = status.as_u16(), elapsed_ms, "Request served");
    }

    response
}
