//! Request and response bodies.

use chrono::{DateTime, Utc};
use mercato_core::models::commerce::{CartItem, Order, OrderLine, OrderStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Error body returned for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    /// Order id, present only for payment failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Body of `/auth/refresh` and `/auth/logout`.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogoutAllRequest {
    /// Target user. Defaults to the caller; only admins may name someone else.
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// Access + refresh token pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: String,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateTransactionRequest {
    #[serde(default)]
    pub address_id: i64,
    #[serde(default)]
    pub items: Vec<CartItem>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionResponse {
    pub id: i64,
    pub status: OrderStatus,
    pub total: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_txn_id: Option<String>,
}

/// Query string of `GET /transactions`. Values are parsed by the handler so
/// malformed filters surface as validation errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionQuery {
    pub status: Option<String>,
    pub store_id: Option<i64>,
    pub min_total: Option<String>,
    pub max_total: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pagination {
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionListResponse {
    pub data: Vec<Order>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDetailResponse {
    pub transaction: Order,
    pub logs: Vec<OrderLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
