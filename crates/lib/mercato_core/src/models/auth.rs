//! Authentication domain models.
//!
//! These are internal domain models, distinct from the request/response
//! shapes in `mercato_api::models`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;

/// Closed set of roles a user can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Whether an actor holding this role may act on a resource owned by `owner_id`.
    ///
    /// Admins may act for anyone; everyone else only for themselves.
    pub fn can_act_for(&self, actor_id: i64, owner_id: i64) -> bool {
        self.is_admin() || actor_id == owner_id
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(AuthError::ValidationError(format!("unknown role: {other}"))),
        }
    }
}

/// Domain user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// User with password hash (for internal auth flows).
#[derive(Debug, Clone)]
pub struct UserWithPassword {
    pub user: User,
    pub password_hash: String,
}

/// Fields required to create a user account.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub role: Role,
}

/// Refresh token record stored in the database. Only the hash is persisted.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: i64,
    pub user_id: i64,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A freshly issued refresh token. The plaintext is only ever available here.
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Result of a successful refresh-token rotation.
#[derive(Debug, Clone)]
pub struct RotatedTokens {
    pub user_id: i64,
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh: IssuedRefreshToken,
}

/// JWT claims embedded in access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: user ID (standard JWT `sub` claim).
    pub sub: String,
    /// User role.
    pub role: Role,
    /// Expiry (unix timestamp).
    pub exp: i64,
    /// Issued at (unix timestamp).
    pub iat: i64,
}

impl TokenClaims {
    /// Numeric user id carried in `sub`.
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub
            .parse()
            .map_err(|_| AuthError::TokenError("malformed subject claim".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn only_admin_or_owner_can_act() {
        assert!(Role::User.can_act_for(7, 7));
        assert!(!Role::User.can_act_for(7, 8));
        assert!(Role::Admin.can_act_for(1, 8));
    }

    #[test]
    fn claims_user_id_parses_subject() {
        let claims = TokenClaims {
            sub: "42".into(),
            role: Role::User,
            exp: 0,
            iat: 0,
        };
        assert_eq!(claims.user_id().unwrap(), 42);

        let bad = TokenClaims {
            sub: "abc".into(),
            ..claims
        };
        assert!(bad.user_id().is_err());
    }
}
