//! Authentication middleware.
//!
//! Bearer token extraction. When `AUTH_SECRET` is configured the token must
//! match it; otherwise requests without a token are served anonymously.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated caller extracted from request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The bearer token, or `anonymous`
    pub token: String,
}

impl AuthUser {
    pub fn is_anonymous(&self) -> bool {
        self.token == "anonymous"
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        match (auth_header, state.config.auth_secret.as_deref()) {
            (Some(header), secret) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ").to_string();
                if token.is_empty() {
                    return Err(AppError::Unauthorized("Empty bearer token"));
                }
                match secret {
                    Some(secret) if secret != token => {
                        Err(AppError::Unauthorized("Invalid bearer token"))
                    }
                    _ => Ok(AuthUser { token }),
                }
            }
            (Some(_), _) => Err(AppError::Unauthorized(
                "Invalid authorization header format",
            )),
            // No auth configured, allow anonymous access
            (None, None) => Ok(AuthUser {
                token: "anonymous".to_string(),
            }),
            (None, Some(_)) => Err(AppError::Unauthorized("Missing authorization header")),
        }
    }
}
