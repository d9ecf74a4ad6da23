//! Refresh token store: issue, rotate and revoke opaque session tokens.
//!
//! Only a SHA-256 hash of each token is persisted. A plaintext token is
//! good for exactly one successful [`RefreshTokenService::rotate`] or
//! [`RefreshTokenService::revoke`]; any later use is `InvalidToken`.

use std::sync::Arc;

use chrono::Duration;
use rand::distr::Alphanumeric;
use rand::{Rng, rng};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::AuthError;
use super::jwt::generate_access_token;
use crate::clock::Clock;
use crate::models::auth::{IssuedRefreshToken, Role, RotatedTokens};
use crate::store::AuthStore;

/// Default refresh token lifetime: 30 days.
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Generate a cryptographically random refresh token (64 alphanumeric chars).
fn generate_refresh_token() -> String {
    rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

/// SHA-256 hash a refresh token for storage.
pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lifetimes and signing material for issued tokens.
#[derive(Clone, Debug)]
pub struct TokenSettings {
    pub jwt_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// Issues and rotates refresh tokens, minting access tokens alongside.
#[derive(Clone)]
pub struct RefreshTokenService {
    store: Arc<dyn AuthStore>,
    settings: TokenSettings,
    clock: Arc<dyn Clock>,
}

impl RefreshTokenService {
    pub fn new(store: Arc<dyn AuthStore>, settings: TokenSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Mint an access token for `user_id` at the current clock time.
    pub fn access_token(
        &self,
        user_id: i64,
        role: Role,
    ) -> Result<(String, chrono::DateTime<chrono::Utc>), AuthError> {
        generate_access_token(
            user_id,
            role,
            self.settings.jwt_secret.as_bytes(),
            self.clock.now(),
            self.settings.access_ttl,
        )
    }

    /// Create a new refresh token for a user. The plaintext is returned once.
    pub async fn issue(&self, user_id: i64) -> Result<IssuedRefreshToken, AuthError> {
        let token = generate_refresh_token();
        let expires_at = self.clock.now() + self.settings.refresh_ttl;
        self.store
            .insert_refresh_token(user_id, &hash_refresh_token(&token), expires_at)
            .await?;
        debug!(user_id, %expires_at, "issued refresh token");
        Ok(IssuedRefreshToken { token, expires_at })
    }

    /// Exchange a refresh token for a new access token and a new refresh token.
    ///
    /// An expired token is deleted as a side effect.
    pub async fn rotate(&self, refresh_token: &str) -> Result<RotatedTokens, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::ValidationError("missing refresh token".into()));
        }
        let token_hash = hash_refresh_token(refresh_token);

        let record = self
            .store
            .find_refresh_token(&token_hash)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let now = self.clock.now();
        if now >= record.expires_at {
            self.store.delete_refresh_token(&token_hash).await?;
            info!(user_id = record.user_id, "expired refresh token removed");
            return Err(AuthError::Expired);
        }

        let user = self
            .store
            .find_user(record.user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let new_token = generate_refresh_token();
        let new_expires_at = now + self.settings.refresh_ttl;
        let rotated = self
            .store
            .rotate_refresh_token(
                &token_hash,
                &hash_refresh_token(&new_token),
                user.id,
                new_expires_at,
            )
            .await?;
        if !rotated {
            // Lost a race with another rotation or revocation of the same token.
            return Err(AuthError::InvalidToken);
        }

        let (access_token, access_expires_at) = self.access_token(user.id, user.role)?;
        debug!(user_id = user.id, "rotated refresh token");

        Ok(RotatedTokens {
            user_id: user.id,
            access_token,
            access_expires_at,
            refresh: IssuedRefreshToken {
                token: new_token,
                expires_at: new_expires_at,
            },
        })
    }

    /// Revoke a single refresh token.
    ///
    /// Fails with `InvalidToken` when nothing was revoked; callers that want
    /// idempotent logout treat that as success.
    pub async fn revoke(&self, refresh_token: &str) -> Result<(), AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::ValidationError("missing refresh token".into()));
        }
        let removed = self
            .store
            .delete_refresh_token(&hash_refresh_token(refresh_token))
            .await?;
        if removed {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    /// Revoke every refresh token for a user (global logout).
    pub async fn revoke_all(&self, user_id: i64) -> Result<u64, AuthError> {
        let removed = self.store.delete_user_refresh_tokens(user_id).await?;
        info!(user_id, removed, "revoked all refresh tokens");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::verify_access_token;
    use crate::clock::ManualClock;
    use crate::store::memory::MemoryStore;

    fn settings() -> TokenSettings {
        TokenSettings {
            jwt_secret: "test-secret".into(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
        }
    }

    async fn fixture() -> (Arc<MemoryStore>, Arc<ManualClock>, RefreshTokenService, i64) {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("Ada", "ada@example.com", Role::User);
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let service = RefreshTokenService::new(store.clone(), settings(), clock.clone());
        (store, clock, service, user.id)
    }

    #[test]
    fn hash_is_hex_sha256() {
        let h = hash_refresh_token("abc");
        assert_eq!(
            h,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn issue_stores_only_the_hash() {
        let (store, clock, service, user_id) = fixture().await;
        let issued = service.issue(user_id).await.unwrap();

        assert_eq!(issued.token.len(), 64);
        assert_eq!(issued.expires_at, clock.now() + Duration::days(30));
        assert!(store.find_refresh_token(&issued.token).await.unwrap().is_none());
        let record = store
            .find_refresh_token(&hash_refresh_token(&issued.token))
            .await
            .unwrap()
            .expect("stored by hash");
        assert_eq!(record.user_id, user_id);
    }

    #[tokio::test]
    async fn rotate_replaces_token_and_rejects_reuse() {
        let (store, _clock, service, user_id) = fixture().await;
        let t1 = service.issue(user_id).await.unwrap();

        let rotated = service.rotate(&t1.token).await.unwrap();
        assert_eq!(rotated.user_id, user_id);
        assert_ne!(rotated.refresh.token, t1.token);
        let claims = verify_access_token(&rotated.access_token, b"test-secret").unwrap();
        assert_eq!(claims.sub, user_id.to_string());

        assert!(
            store
                .find_refresh_token(&hash_refresh_token(&t1.token))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .find_refresh_token(&hash_refresh_token(&rotated.refresh.token))
                .await
                .unwrap()
                .is_some()
        );

        assert!(matches!(
            service.rotate(&t1.token).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            service.revoke(&t1.token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn expired_token_is_deleted_on_rotate() {
        let (store, clock, service, user_id) = fixture().await;
        let t1 = service.issue(user_id).await.unwrap();
        clock.advance(Duration::days(31));

        assert!(matches!(service.rotate(&t1.token).await, Err(AuthError::Expired)));
        assert!(
            store
                .find_refresh_token(&hash_refresh_token(&t1.token))
                .await
                .unwrap()
                .is_none()
        );
        assert!(matches!(
            service.rotate(&t1.token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn revoke_is_single_use() {
        let (_store, _clock, service, user_id) = fixture().await;
        let t1 = service.issue(user_id).await.unwrap();
        service.revoke(&t1.token).await.unwrap();
        assert!(matches!(
            service.revoke(&t1.token).await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            service.rotate(&t1.token).await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn revoke_all_removes_every_session() {
        let (_store, _clock, service, user_id) = fixture().await;
        let a = service.issue(user_id).await.unwrap();
        let b = service.issue(user_id).await.unwrap();

        assert_eq!(service.revoke_all(user_id).await.unwrap(), 2);
        assert!(service.rotate(&a.token).await.is_err());
        assert!(service.rotate(&b.token).await.is_err());
    }

    #[tokio::test]
    async fn empty_token_is_a_validation_error() {
        let (_store, _clock, service, _user_id) = fixture().await;
        assert!(matches!(
            service.rotate("").await,
            Err(AuthError::ValidationError(_))
        ));
    }
}
