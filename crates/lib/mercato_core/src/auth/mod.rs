//! Authentication and session logic.
//!
//! Provides password hashing, JWT management, and the refresh token store
//! shared by every HTTP surface.

pub mod jwt;
pub mod password;
pub mod refresh;

use thiserror::Error;

use crate::store::StoreError;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    CredentialError,

    #[error("Token error: {0}")]
    TokenError(String),

    #[error("Invalid refresh token")]
    InvalidToken,

    #[error("Refresh token expired")]
    Expired,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}
