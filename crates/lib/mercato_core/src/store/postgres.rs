//! PostgreSQL-backed store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, warn};

use super::{AuthStore, CommerceStore, Result, StoreError};
use crate::inventory;
use crate::models::auth::{NewUser, RefreshTokenRecord, Role, User, UserWithPassword};
use crate::models::commerce::{
    Address, LineSnapshot, Order, OrderDraft, OrderFilter, OrderLine, OrderStatus, Page,
    PageRequest, Product,
};

const ORDER_COLUMNS: &str = "id, user_id, store_id, address_id, total, status, \
                             provider_txn_id, payment_metadata, created_at";

/// Row returned by order queries.
#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: i64,
    user_id: i64,
    store_id: i64,
    address_id: i64,
    total: Decimal,
    status: String,
    provider_txn_id: Option<String>,
    payment_metadata: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Order {
            id: row.id,
            user_id: row.user_id,
            store_id: row.store_id,
            address_id: row.address_id,
            total: row.total,
            status,
            provider_txn_id: row.provider_txn_id,
            payment_metadata: row.payment_metadata,
            created_at: row.created_at,
        })
    }
}

/// Row returned by user queries.
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    phone: Option<String>,
    role: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self) -> Result<UserWithPassword> {
        let role = self
            .role
            .parse::<Role>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(UserWithPassword {
            user: User {
                id: self.id,
                name: self.name,
                email: self.email,
                phone: self.phone,
                role,
                created_at: self.created_at,
            },
            password_hash: self.password_hash,
        })
    }
}

/// Map a unique-constraint violation to [`StoreError::Conflict`].
fn conflict_or(e: sqlx::Error, what: &str) -> StoreError {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => StoreError::Conflict(what.to_string()),
        _ => StoreError::Db(e),
    }
}

/// Append the `WHERE` clause for `filter` to `qb`.
fn push_order_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &OrderFilter) {
    qb.push(" WHERE TRUE");
    if let Some(user_id) = filter.user_id {
        qb.push(" AND user_id = ").push_bind(user_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(store_id) = filter.store_id {
        qb.push(" AND store_id = ").push_bind(store_id);
    }
    if let Some(min) = filter.min_total {
        qb.push(" AND total >= ").push_bind(min);
    }
    if let Some(max) = filter.max_total {
        qb.push(" AND total <= ").push_bind(max);
    }
}

/// Store over a shared PostgreSQL pool.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CommerceStore for PgStore {
    async fn find_product(&self, product_id: i64) -> Result<Option<Product>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i64,
                Option<i64>,
                String,
                String,
                Decimal,
                i32,
                String,
                DateTime<Utc>,
            ),
        >(
            "SELECT id, store_id, category_id, name, description, price, stock, image_url, created_at \
             FROM products WHERE id = $1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, store_id, category_id, name, description, price, stock, image_url, created_at)| {
                Product {
                    id,
                    store_id,
                    category_id,
                    name,
                    description,
                    price,
                    stock,
                    image_url,
                    created_at,
                }
            },
        ))
    }

    async fn find_address(&self, address_id: i64) -> Result<Option<Address>> {
        let row = sqlx::query_as::<_, (i64, i64, String, String, String)>(
            "SELECT id, user_id, label, street, city FROM addresses WHERE id = $1",
        )
        .bind(address_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, user_id, label, street, city)| Address {
            id,
            user_id,
            label,
            street,
            city,
        }))
    }

    async fn commit_order(&self, draft: &OrderDraft, lines: &[LineSnapshot]) -> Result<i64> {
        // Dropping `tx` without commit rolls back every statement below.
        let mut tx = self.pool.begin().await?;

        let order_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO transactions (user_id, store_id, address_id, total, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(draft.user_id)
        .bind(draft.store_id)
        .bind(draft.address_id)
        .bind(draft.total)
        .bind(OrderStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await?;

        for line in lines {
            sqlx::query(
                "INSERT INTO product_logs \
                 (transaction_id, product_id, product_name, product_price, quantity) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(order_id)
            .bind(line.product_id)
            .bind(&line.product_name)
            .bind(line.product_price)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await?;

            if !inventory::reserve_stock(&mut *tx, line.product_id, line.quantity).await? {
                tx.rollback().await?;
                debug!(order_id, product_id = line.product_id, "stock reservation lost, rolled back");
                return Err(StoreError::InsufficientStock(line.product_id));
            }
        }

        tx.commit().await?;
        Ok(order_id)
    }

    async fn find_order(&self, order_id: i64) -> Result<Option<Order>> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM transactions WHERE id = $1");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn order_lines(&self, order_id: i64) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query_as::<_, (i64, i64, i64, String, Decimal, i32, DateTime<Utc>)>(
            "SELECT id, transaction_id, product_id, product_name, product_price, quantity, created_at \
             FROM product_logs WHERE transaction_id = $1 ORDER BY id ASC",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, transaction_id, product_id, product_name, product_price, quantity, created_at)| {
                    OrderLine {
                        id,
                        transaction_id,
                        product_id,
                        product_name,
                        product_price,
                        quantity,
                        created_at,
                    }
                },
            )
            .collect())
    }

    async fn mark_order_paid(
        &self,
        order_id: i64,
        provider_txn_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'paid', provider_txn_id = $2, payment_metadata = $3 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .bind(provider_txn_id)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_order_and_restock(
        &self,
        order_id: i64,
        lines: &[OrderLine],
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Claim the order first so a second compensation cannot restock twice.
        let claimed = sqlx::query(
            "UPDATE transactions SET status = 'failed', payment_metadata = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .bind(metadata)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;
        if !claimed {
            tx.rollback().await?;
            return Ok(false);
        }

        for line in lines {
            if !inventory::release_stock(&mut *tx, line.product_id, line.quantity).await? {
                warn!(order_id, product_id = line.product_id, "product missing, stock not restored");
            }
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn mark_order_failed(
        &self,
        order_id: i64,
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE transactions SET status = 'failed', payment_metadata = $2 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_orders(&self, filter: &OrderFilter, page: PageRequest) -> Result<Page<Order>> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM transactions");
        push_order_filter(&mut count, filter);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut list = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ORDER_COLUMNS} FROM transactions"
        ));
        push_order_filter(&mut list, filter);
        list.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.limit)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows: Vec<OrderRow> = list.build_query_as::<OrderRow>().fetch_all(&self.pool).await?;

        let items = rows
            .into_iter()
            .map(Order::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(Page { items, total })
    }
}

#[async_trait]
impl AuthStore for PgStore {
    async fn create_user_with_store(&self, user: &NewUser, store_name: &str) -> Result<User> {
        let mut tx = self.pool.begin().await?;

        let (id, created_at) = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "INSERT INTO users (name, email, phone, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id, created_at",
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, "email already registered"))?;

        sqlx::query("INSERT INTO stores (user_id, name) VALUES ($1, $2)")
            .bind(id)
            .bind(store_name)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(User {
            id,
            name: user.name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            role: user.role,
            created_at,
        })
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, phone, role, password_hash, created_at \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.into_user().map(|u| u.user)).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserWithPassword>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, phone, role, password_hash, created_at \
             FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(UserRow::into_user).transpose()
    }

    async fn insert_refresh_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or(e, "refresh token collision"))?;
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        let row = sqlx::query_as::<_, (i64, i64, String, DateTime<Utc>, DateTime<Utc>)>(
            "SELECT id, user_id, token_hash, expires_at, created_at \
             FROM refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(id, user_id, token_hash, expires_at, created_at)| RefreshTokenRecord {
                id,
                user_id,
                token_hash,
                expires_at,
                created_at,
            },
        ))
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            "DELETE FROM refresh_tokens WHERE token_hash = $1 AND user_id = $2",
        )
        .bind(old_hash)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if deleted == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO refresh_tokens (user_id, token_hash, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(user_id)
        .bind(new_hash)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or(e, "refresh token collision"))?;

        tx.commit().await?;
        Ok(true)
    }

    async fn delete_user_refresh_tokens(&self, user_id: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
