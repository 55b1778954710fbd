//! Authenticated user identity.

use axum::http::Extensions;

/// Id of the authenticated caller.
///
/// Inserted into request extensions by the authentication layer in front of
/// Pulse; absent for anonymous requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl AuthUser {
    /// The authenticated user of a request, if any.
    pub fn from_extensions(extensions: &Extensions) -> Option<&str> {
        extensions.get::<AuthUser>().map(|user| user.0.as_str())
    }
}
