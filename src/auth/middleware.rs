use axum::{
    extract::{FromRequestParts, Request},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use super::jwt::{Claims, JwtManager};
use crate::utils::error::ApiError;

/// Bearer-token middleware for the REST surface. Validated claims are stashed
/// in request extensions for the `AuthUser` extractor.
pub async fn require_auth(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let jwt = request
        .extensions()
        .get::<Arc<JwtManager>>()
        .ok_or_else(|| ApiError::InternalError("JWT manager not configured".to_string()))?
        .clone();

    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;

    let claims = jwt
        .validate_token(token)
        .map_err(|e| ApiError::Unauthorized(format!("Invalid token: {}", e)))?;

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Authenticated principal extracted from validated claims.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: crate::models::chat::UserId,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Claims>()
            .map(|claims| AuthUser {
                user_id: claims.user_id,
            })
            .ok_or_else(|| ApiError::Unauthorized("Missing authentication".to_string()))
    }
}
