//! Authentication middleware: Bearer token extraction and JWT verification.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use mercato_core::auth::jwt::verify_access_token;
use mercato_core::models::auth::Role;

use crate::AppState;
use crate::error::AppError;

/// Caller identity resolved from a verified access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub role: Role,
}

impl AuthenticatedUser {
    /// Whether this caller may act on a resource owned by `owner_id`.
    pub fn can_act_for(&self, owner_id: i64) -> bool {
        self.role.can_act_for(self.user_id, owner_id)
    }
}

/// Axum middleware: extracts `Authorization: Bearer <token>`, verifies the JWT,
/// and injects [`AuthenticatedUser`] into request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?;

    let claims = verify_access_token(token, state.config.jwt_secret.as_bytes())
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;
    let user_id = claims.user_id()?;

    request.extensions_mut().insert(AuthenticatedUser {
        user_id,
        role: claims.role,
    });

    Ok(next.run(request).await)
}
