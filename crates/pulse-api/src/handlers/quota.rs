//! Remaining-quota report for the caller.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};

use pulse_core::error::AppError;
use pulse_ratelimit::RequestIdentity;

use crate::error::ApiError;
use crate::extractors::{AuthUser, ClientIp};
use crate::state::AppState;

/// Quota left under one policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyQuota {
    /// Requests per window.
    pub limit: u64,
    /// Requests left, without consuming any.
    pub remaining: u64,
    /// Window length in seconds.
    pub window_seconds: u64,
}

/// GET /api/rate-limit
///
/// Peeks at every configured policy for the calling identity. Endpoint
/// scoped policies are reported for this endpoint only. Answers 404 when
/// throttling is switched off.
pub async fn quota(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    user: Option<Extension<AuthUser>>,
) -> Result<Json<BTreeMap<String, PolicyQuota>>, ApiError> {
    if !state.config.rate_limit.enabled {
        return Err(AppError::not_found("Rate limiting is disabled").into());
    }

    let mut identity = RequestIdentity::anonymous(ip, "/api/rate-limit");
    if let Some(Extension(AuthUser(user_id))) = user {
        identity = identity.with_user(user_id);
    }

    let mut report = BTreeMap::new();
    for (name, policy) in &state.config.rate_limit.policies {
        let key = identity.key(name, policy.scope);
        let remaining = state
            .limiter
            .get_remaining(&key, policy.limit, policy.window())
            .await;
        report.insert(
            name.clone(),
            PolicyQuota {
                limit: policy.limit,
                remaining,
                window_seconds: policy.window_seconds,
            },
        );
    }
    Ok(Json(report))
}
