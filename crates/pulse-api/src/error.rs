//! Maps domain errors and rate-limit denials to HTTP responses.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use pulse_core::error::{AppError, ErrorKind};
use pulse_core::traits::rate_limiter::RateLimitDecision;

/// Standard API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
    /// Machine-readable error code.
    pub error: String,
    /// Seconds to wait before retrying, for throttled requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// HTTP wrapper around [`AppError`].
#[derive(Debug)]
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let (status, error_code) = match &err.kind {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation_error"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::RateLimit => (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded"),
            ErrorKind::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable"),
            ErrorKind::Internal
            | ErrorKind::Cache
            | ErrorKind::Configuration
            | ErrorKind::Serialization => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        // Internal details never reach the client.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "Internal server error".to_string()
        } else {
            err.message
        };

        let body = ApiErrorResponse {
            success: false,
            message,
            error: error_code.to_string(),
            retry_after: None,
        };

        (status, Json(body)).into_response()
    }
}

/// 429 response for a denied request, with a `Retry-After` header.
pub fn rate_limit_exceeded(decision: &RateLimitDecision) -> Response {
    let retry_after = decision.retry_after_seconds();
    let body = ApiErrorResponse {
        success: false,
        message: "Too many requests, please try again later".to_string(),
        error: "rate_limit_exceeded".to_string(),
        retry_after: Some(retry_after),
    };

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn test_rate_limit_response_shape() {
        let decision = RateLimitDecision::denied(5, Utc::now() + Duration::seconds(30));
        let response = rate_limit_exceeded(&decision);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let retry: u64 = response.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((29..=30).contains(&retry));
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let response = ApiError(AppError::cache("redis exploded")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = ApiError(AppError::not_found("no such thing")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
