//! JWT access token generation and verification.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use tracing::warn;

use super::AuthError;
use crate::models::auth::{Role, TokenClaims};

/// Default access token lifetime: 24 hours.
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Generate a signed JWT access token (HS256). Returns the token and its expiry.
pub fn generate_access_token(
    user_id: i64,
    role: Role,
    secret: &[u8],
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<(String, DateTime<Utc>), AuthError> {
    let expires_at = now + ttl;
    let claims = TokenClaims {
        sub: user_id.to_string(),
        role,
        exp: expires_at.timestamp(),
        iat: now.timestamp(),
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| AuthError::TokenError(format!("jwt encode: {e}")))?;
    Ok((token, expires_at))
}

/// Verify a JWT access token, returning the claims on success.
pub fn verify_access_token(token: &str, secret: &[u8]) -> Option<TokenClaims> {
    let key = DecodingKey::from_secret(secret);
    let mut validation = Validation::default();
    validation.validate_exp = true;
    decode::<TokenClaims>(token, &key, &validation)
        .ok()
        .map(|data| data.claims)
}

/// Resolve the JWT secret from `JWT_SECRET`, generating an ephemeral one if unset.
///
/// An ephemeral secret invalidates every issued access token on restart.
pub fn resolve_jwt_secret() -> String {
    if let Ok(secret) = std::env::var("JWT_SECRET")
        && !secret.is_empty()
    {
        return secret;
    }
    warn!("JWT_SECRET not set, generating an ephemeral signing secret");
    rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn generated_token_verifies() {
        let now = Utc::now();
        let (token, exp) =
            generate_access_token(7, Role::Admin, SECRET, now, Duration::minutes(5)).unwrap();
        assert_eq!(exp, now + Duration::minutes(5));

        let claims = verify_access_token(&token, SECRET).expect("valid token");
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp, exp.timestamp());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let (token, _) =
            generate_access_token(7, Role::User, SECRET, Utc::now(), Duration::minutes(5))
                .unwrap();
        assert!(verify_access_token(&token, b"other-secret").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let issued = Utc::now() - Duration::hours(2);
        let (token, _) =
            generate_access_token(7, Role::User, SECRET, issued, Duration::hours(1)).unwrap();
        assert!(verify_access_token(&token, SECRET).is_none());
    }
}
