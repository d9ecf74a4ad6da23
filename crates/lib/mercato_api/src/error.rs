//! Application error types.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mercato_core::auth::AuthError;
use mercato_core::checkout::CheckoutError;
use mercato_core::store::StoreError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The order was created and is now `failed`; its id is returned to the caller.
    #[error("Payment failed for transaction {order_id}: {message}")]
    PaymentFailed { order_id: i64, message: String },

    #[error("Too many requests")]
    TooManyRequests,

    #[error("Database unavailable: {0}")]
    DbUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message, id) = match &self {
            AppError::Validation(m) => {
                (StatusCode::BAD_REQUEST, "validation_error", m.as_str(), None)
            }
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m.as_str(), None),
            AppError::Unauthorized(m) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", m.as_str(), None)
            }
            AppError::Forbidden(m) => (StatusCode::FORBIDDEN, "forbidden", m.as_str(), None),
            AppError::PaymentFailed { order_id, message } => (
                StatusCode::PAYMENT_REQUIRED,
                "payment_failed",
                message.as_str(),
                Some(*order_id),
            ),
            AppError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                "Rate limit exceeded",
                None,
            ),
            AppError::DbUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "db_unavailable",
                "Database unavailable",
                None,
            ),
            AppError::Internal(detail) => {
                error!(%detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "Internal server error",
                    None,
                )
            }
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
            id,
        });
        (status, body).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => AppError::NotFound("row not found".into()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::DbUnavailable(e.to_string())
            }
            _ => AppError::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Db(e) => AppError::from(e),
            StoreError::InsufficientStock(id) => {
                AppError::Validation(format!("Insufficient stock for product {id}"))
            }
            StoreError::Conflict(msg) => AppError::Validation(msg),
            StoreError::Corrupt(msg) => AppError::Internal(msg),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::CredentialError => AppError::Unauthorized("Invalid credentials".into()),
            AuthError::TokenError(msg) => AppError::Unauthorized(msg),
            AuthError::InvalidToken => AppError::Unauthorized("Invalid refresh token".into()),
            AuthError::Expired => AppError::Unauthorized("Refresh token expired".into()),
            AuthError::ValidationError(msg) => AppError::Validation(msg),
            AuthError::Store(e) => AppError::from(e),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}

impl From<CheckoutError> for AppError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::EmptyCart
            | CheckoutError::InvalidQuantity(_)
            | CheckoutError::InsufficientStock(_)
            | CheckoutError::CrossStoreCart => AppError::Validation(e.to_string()),
            CheckoutError::ProductNotFound(_)
            | CheckoutError::AddressNotFound
            | CheckoutError::OrderNotFound => AppError::NotFound(e.to_string()),
            CheckoutError::AddressOwnershipMismatch | CheckoutError::Forbidden => {
                AppError::Forbidden(e.to_string())
            }
            CheckoutError::PaymentFailed { order_id, reason } => AppError::PaymentFailed {
                order_id,
                message: reason,
            },
            CheckoutError::Store(e) => AppError::from(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn payment_failure_carries_order_id() {
        let resp = AppError::from(CheckoutError::PaymentFailed {
            order_id: 42,
            reason: "card declined".into(),
        })
        .into_response();
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "payment_failed");
        assert_eq!(json["id"], 42);
    }

    #[tokio::test]
    async fn internal_detail_is_redacted() {
        let resp = AppError::Internal("connection string leaked".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(resp).await;
        assert_eq!(json["message"], "Internal server error");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn checkout_errors_map_to_statuses() {
        let status = |e: CheckoutError| AppError::from(e).into_response().status();
        assert_eq!(status(CheckoutError::CrossStoreCart), StatusCode::BAD_REQUEST);
        assert_eq!(status(CheckoutError::InsufficientStock(1)), StatusCode::BAD_REQUEST);
        assert_eq!(status(CheckoutError::OrderNotFound), StatusCode::NOT_FOUND);
        assert_eq!(status(CheckoutError::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(
            status(CheckoutError::Store(StoreError::Db(sqlx::Error::PoolTimedOut))),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn refresh_failures_are_unauthorized() {
        let status = |e: AuthError| AppError::from(e).into_response().status();
        assert_eq!(status(AuthError::InvalidToken), StatusCode::UNAUTHORIZED);
        assert_eq!(status(AuthError::Expired), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status(AuthError::ValidationError("x".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
