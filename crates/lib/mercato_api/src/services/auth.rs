//! Authentication service: register, login and session flows delegating to
//! `mercato_core::auth`.

use chrono::{DateTime, Utc};
use mercato_core::auth::AuthError;
use mercato_core::auth::password::{hash_password, verify_password};
use mercato_core::auth::refresh::RefreshTokenService;
use mercato_core::models::auth::{NewUser, Role, User};
use mercato_core::store::AuthStore;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::{LoginRequest, RegisterRequest, TokenResponse};

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 8;

fn build_token_response(
    tokens: &RefreshTokenService,
    access_token: String,
    expires_at: DateTime<Utc>,
    refresh_token: String,
    refresh_expires_at: DateTime<Utc>,
    user_id: Option<i64>,
) -> TokenResponse {
    TokenResponse {
        token: access_token,
        token_type: "Bearer".to_string(),
        expires_in: tokens.settings().access_ttl.num_seconds(),
        expires_at,
        refresh_token,
        refresh_expires_at,
        user_id,
    }
}

/// Mint an access token and issue a refresh token for `user`.
async fn issue_pair(tokens: &RefreshTokenService, user: &User) -> AppResult<TokenResponse> {
    let (access, expires_at) = tokens.access_token(user.id, user.role)?;
    let refresh = tokens.issue(user.id).await?;
    Ok(build_token_response(
        tokens,
        access,
        expires_at,
        refresh.token,
        refresh.expires_at,
        Some(user.id),
    ))
}

/// Register a new user together with their default store.
pub async fn register(
    users: &dyn AuthStore,
    tokens: &RefreshTokenService,
    req: RegisterRequest,
) -> AppResult<TokenResponse> {
    let name = req.name.trim();
    let email = req.email.trim().to_ascii_lowercase();
    if name.is_empty() || email.is_empty() || req.password.is_empty() {
        return Err(AppError::Validation(
            "name, email and password are required".into(),
        ));
    }
    if !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    let new_user = NewUser {
        name: name.to_string(),
        email,
        phone: req.phone.filter(|p| !p.trim().is_empty()),
        password_hash: hash_password(&req.password)?,
        role: Role::User,
    };
    let user = users
        .create_user_with_store(&new_user, &format!("{name}'s Store"))
        .await?;
    info!(user_id = user.id, "user registered");

    issue_pair(tokens, &user).await
}

/// Authenticate with email + password. Unknown email and wrong password
/// produce the same error.
pub async fn login(
    users: &dyn AuthStore,
    tokens: &RefreshTokenService,
    req: LoginRequest,
) -> AppResult<TokenResponse> {
    let email = req.email.trim().to_ascii_lowercase();
    let record = users
        .find_user_by_email(&email)
        .await?
        .ok_or(AuthError::CredentialError)?;

    let matches = verify_password(&req.password, &record.password_hash).unwrap_or_else(|e| {
        warn!(user_id = record.user.id, error = %e, "stored password hash is unusable");
        false
    });
    if !matches {
        return Err(AuthError::CredentialError.into());
    }

    issue_pair(tokens, &record.user).await
}

/// Exchange a refresh token for a new token pair.
pub async fn refresh(tokens: &RefreshTokenService, refresh_token: &str) -> AppResult<TokenResponse> {
    let rotated = tokens.rotate(refresh_token).await?;
    Ok(build_token_response(
        tokens,
        rotated.access_token,
        rotated.access_expires_at,
        rotated.refresh.token,
        rotated.refresh.expires_at,
        None,
    ))
}

/// Revoke one refresh token. Revoking an unknown token succeeds.
pub async fn logout(tokens: &RefreshTokenService, refresh_token: &str) -> AppResult<()> {
    match tokens.revoke(refresh_token).await {
        Ok(()) | Err(AuthError::InvalidToken) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Revoke every refresh token of `target` (defaults to the caller).
pub async fn logout_all(
    tokens: &RefreshTokenService,
    caller: &AuthenticatedUser,
    target: Option<i64>,
) -> AppResult<u64> {
    let user_id = target.unwrap_or(caller.user_id);
    if !caller.can_act_for(user_id) {
        return Err(AppError::Forbidden(
            "Only admins may log out other users".into(),
        ));
    }
    Ok(tokens.revoke_all(user_id).await?)
}
