//! Persistence seams.
//!
//! [`CommerceStore`] covers products, addresses and orders; [`AuthStore`]
//! covers users and refresh tokens. [`postgres::PgStore`] is the production
//! implementation; [`memory::MemoryStore`] keeps everything in process and
//! honours the same atomic-unit contracts.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{NewUser, RefreshTokenRecord, User, UserWithPassword};
use crate::models::commerce::{
    Address, LineSnapshot, Order, OrderDraft, OrderFilter, OrderLine, Page, PageRequest, Product,
};

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    /// A conditional stock decrement matched no row.
    #[error("Insufficient stock for product {0}")]
    InsufficientStock(i64),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored value could not be mapped back into the domain.
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Catalog, address and order persistence.
#[async_trait]
pub trait CommerceStore: Send + Sync {
    async fn find_product(&self, product_id: i64) -> Result<Option<Product>>;

    async fn find_address(&self, address_id: i64) -> Result<Option<Address>>;

    /// Write a pending order header, its line snapshots and the matching
    /// stock decrements as one atomic unit.
    ///
    /// Each decrement only applies while `stock >= quantity`. If any line
    /// cannot be reserved the whole unit is discarded and
    /// [`StoreError::InsufficientStock`] names the offending product.
    async fn commit_order(&self, draft: &OrderDraft, lines: &[LineSnapshot]) -> Result<i64>;

    async fn find_order(&self, order_id: i64) -> Result<Option<Order>>;

    async fn order_lines(&self, order_id: i64) -> Result<Vec<OrderLine>>;

    /// Move a pending order to `paid`. Returns `false` if the order was not pending.
    async fn mark_order_paid(
        &self,
        order_id: i64,
        provider_txn_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<bool>;

    /// Compensation unit: return every line's quantity to stock and move the
    /// pending order to `failed`, atomically. Returns `false` (and restores
    /// nothing) if the order was not pending.
    async fn fail_order_and_restock(
        &self,
        order_id: i64,
        lines: &[OrderLine],
        metadata: &serde_json::Value,
    ) -> Result<bool>;

    /// Move a pending order to `failed` without touching stock.
    async fn mark_order_failed(&self, order_id: i64, metadata: &serde_json::Value)
    -> Result<bool>;

    /// Newest-first page of orders matching `filter`.
    async fn list_orders(&self, filter: &OrderFilter, page: PageRequest) -> Result<Page<Order>>;
}

/// User and refresh-token persistence.
#[async_trait]
pub trait AuthStore: Send + Sync {
    /// Create a user and their default store in one atomic unit.
    ///
    /// Fails with [`StoreError::Conflict`] when the email is taken.
    async fn create_user_with_store(&self, user: &NewUser, store_name: &str) -> Result<User>;

    async fn find_user(&self, user_id: i64) -> Result<Option<User>>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserWithPassword>>;

    async fn insert_refresh_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()>;

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>>;

    /// Delete by hash. Returns whether a row was removed.
    async fn delete_refresh_token(&self, token_hash: &str) -> Result<bool>;

    /// Atomically delete `old_hash` and insert `new_hash` for the same user.
    ///
    /// Returns `false` and inserts nothing when `old_hash` was already gone,
    /// so two concurrent rotations of one token cannot both succeed.
    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Delete every refresh token for a user. Returns the number removed.
    async fn delete_user_refresh_tokens(&self, user_id: i64) -> Result<u64>;
}
