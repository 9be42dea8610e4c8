use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::state::AppState;

/// Decides whether a bearer token grants admin access.
///
/// Swap the implementation in [`AppState`] to plug in a real identity provider.
pub trait AdminAuthorizer: Send + Sync {
    /// Returns the caller's identity when `token` is accepted.
    fn authorize(&self, token: &str) -> Option<String>;
}

/// Accepts exactly one static token.
pub struct BearerTokenAuthorizer {
    token: String,
}

impl BearerTokenAuthorizer {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AdminAuthorizer for BearerTokenAuthorizer {
    fn authorize(&self, token: &str) -> Option<String> {
        // An empty configured token never matches.
        (!self.token.is_empty() && token == self.token).then(|| "admin".to_string())
    }
}

/// Admin caller extracted from the `Authorization: Bearer <token>` header.
///
/// Add this as a handler parameter to require admin access.
pub struct AdminCaller {
    pub identity: String,
}

impl FromRequestParts<AppState> for AdminCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::TokenMissing)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AppError::TokenInvalid)?;

        let identity = state
            .authorizer
            .authorize(token)
            .ok_or(AppError::TokenInvalid)?;

        Ok(AdminCaller { identity })
    }
}
