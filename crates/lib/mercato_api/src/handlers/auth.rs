//! Authentication request handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::AppJson;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{LoginRequest, LogoutAllRequest, RefreshRequest, RegisterRequest, TokenResponse};
use crate::services::auth;

/// `POST /auth/register`: create an account and its store, then sign in.
pub async fn register_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<RegisterRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::register(state.users.as_ref(), &state.tokens, body).await?;
    Ok(Json(resp))
}

/// `POST /auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::login(state.users.as_ref(), &state.tokens, body).await?;
    Ok(Json(resp))
}

/// `POST /auth/refresh`: exchange a refresh token for a new token pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let resp = auth::refresh(&state.tokens, &body.refresh_token).await?;
    Ok(Json(resp))
}

/// `POST /auth/logout`: revoke one refresh token.
pub async fn logout_handler(
    State(state): State<AppState>,
    AppJson(body): AppJson<RefreshRequest>,
) -> AppResult<StatusCode> {
    auth::logout(&state.tokens, &body.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /auth/logout/all`: revoke every session of the caller, or of
/// `user_id` when the caller is an admin. The body is optional.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    Extension(caller): Extension<AuthenticatedUser>,
    body: Bytes,
) -> AppResult<StatusCode> {
    let req: LogoutAllRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutAllRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid body: {e}")))?
    };
    auth::logout_all(&state.tokens, &caller, req.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
