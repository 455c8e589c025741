// src/extractors.rs

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};

use crate::{
    config::Config,
    error::AppError,
    utils::jwt::{Claims, bearer_token, verify_jwt},
};

/// Caller identity for routes that also serve anonymous visitors.
///
/// A missing, malformed or expired token yields `None` rather than a 401.
#[derive(Debug, Clone)]
pub struct MaybeClaims(pub Option<Claims>);

impl MaybeClaims {
    /// Caller's user id, when the token is present and well formed.
    pub fn user_id(&self) -> Option<i64> {
        self.0.as_ref().and_then(|c| c.user_id().ok())
    }
}

impl<S> FromRequestParts<S> for MaybeClaims
where
    S: Send + Sync,
    Config: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Config::from_ref(state);
        let claims = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .and_then(|token| verify_jwt(token, &config.jwt_secret).ok());

        Ok(MaybeClaims(claims))
    }
}
