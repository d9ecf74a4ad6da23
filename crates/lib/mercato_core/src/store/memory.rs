//! In-process store.
//!
//! Every trait method runs under a single mutex, so each call is one atomic
//! unit exactly as a database transaction would be. Used by tests and by
//! `--in-memory` server runs; nothing survives a restart.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::{AuthStore, CommerceStore, Result, StoreError};
use crate::inventory::try_reserve;
use crate::models::auth::{NewUser, RefreshTokenRecord, Role, User, UserWithPassword};
use crate::models::commerce::{
    Address, LineSnapshot, Order, OrderDraft, OrderFilter, OrderLine, OrderStatus, Page,
    PageRequest, Product,
};

#[derive(Debug, Default)]
struct State {
    next_id: i64,
    users: BTreeMap<i64, UserWithPassword>,
    stores: BTreeMap<i64, (i64, String)>,
    products: BTreeMap<i64, Product>,
    addresses: BTreeMap<i64, Address>,
    orders: BTreeMap<i64, Order>,
    lines: Vec<OrderLine>,
    refresh_tokens: BTreeMap<String, RefreshTokenRecord>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_refresh_token(&mut self, user_id: i64, token_hash: &str, expires_at: DateTime<Utc>) {
        let id = self.next_id();
        self.refresh_tokens.insert(
            token_hash.to_string(),
            RefreshTokenRecord {
                id,
                user_id,
                token_hash: token_hash.to_string(),
                expires_at,
                created_at: Utc::now(),
            },
        );
    }

    fn pending_order_mut(&mut self, order_id: i64) -> Option<&mut Order> {
        self.orders
            .get_mut(&order_id)
            .filter(|o| o.status == OrderStatus::Pending)
    }
}

/// Store that keeps every row in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert a user with an unusable password hash.
    pub fn seed_user(&self, name: &str, email: &str, role: Role) -> User {
        self.seed_user_with_password(name, email, role, "!")
    }

    /// Insert a user with the given password hash.
    pub fn seed_user_with_password(
        &self,
        name: &str,
        email: &str,
        role: Role,
        password_hash: &str,
    ) -> User {
        let mut state = self.lock();
        let id = state.next_id();
        let user = User {
            id,
            name: name.to_string(),
            email: email.to_string(),
            phone: None,
            role,
            created_at: Utc::now(),
        };
        state.users.insert(
            id,
            UserWithPassword {
                user: user.clone(),
                password_hash: password_hash.to_string(),
            },
        );
        user
    }

    /// Insert a store owned by `user_id`, returning its id.
    pub fn seed_store(&self, user_id: i64, name: &str) -> i64 {
        let mut state = self.lock();
        let id = state.next_id();
        state.stores.insert(id, (user_id, name.to_string()));
        id
    }

    /// Insert a catalog product.
    pub fn seed_product(&self, store_id: i64, name: &str, price: Decimal, stock: i32) -> Product {
        let mut state = self.lock();
        let id = state.next_id();
        let product = Product {
            id,
            store_id,
            category_id: None,
            name: name.to_string(),
            description: String::new(),
            price,
            stock,
            image_url: String::new(),
            created_at: Utc::now(),
        };
        state.products.insert(id, product.clone());
        product
    }

    /// Insert an address owned by `user_id`.
    pub fn seed_address(&self, user_id: i64) -> Address {
        let mut state = self.lock();
        let id = state.next_id();
        let address = Address {
            id,
            user_id,
            label: "home".into(),
            street: "1 Market St".into(),
            city: "Springfield".into(),
        };
        state.addresses.insert(id, address.clone());
        address
    }

    /// Change a product's price, as catalog management would.
    pub fn set_price(&self, product_id: i64, price: Decimal) {
        if let Some(p) = self.lock().products.get_mut(&product_id) {
            p.price = price;
        }
    }

    /// Current stock for a product.
    pub fn stock_of(&self, product_id: i64) -> Option<i32> {
        self.lock().products.get(&product_id).map(|p| p.stock)
    }

    /// Number of order headers ever committed.
    pub fn order_count(&self) -> usize {
        self.lock().orders.len()
    }

    /// Number of order line rows ever committed.
    pub fn line_count(&self) -> usize {
        self.lock().lines.len()
    }

    /// Stores owned by a user, as `(store_id, name)` pairs.
    pub fn stores_of(&self, user_id: i64) -> Vec<(i64, String)> {
        self.lock()
            .stores
            .iter()
            .filter(|(_, (owner, _))| *owner == user_id)
            .map(|(id, (_, name))| (*id, name.clone()))
            .collect()
    }
}

#[async_trait]
impl CommerceStore for MemoryStore {
    async fn find_product(&self, product_id: i64) -> Result<Option<Product>> {
        Ok(self.lock().products.get(&product_id).cloned())
    }

    async fn find_address(&self, address_id: i64) -> Result<Option<Address>> {
        Ok(self.lock().addresses.get(&address_id).cloned())
    }

    async fn commit_order(&self, draft: &OrderDraft, lines: &[LineSnapshot]) -> Result<i64> {
        let mut state = self.lock();

        // Stage every decrement first; nothing is written unless all succeed.
        let mut staged: BTreeMap<i64, i32> = BTreeMap::new();
        for line in lines {
            let current = match staged.get(&line.product_id) {
                Some(stock) => *stock,
                None => state
                    .products
                    .get(&line.product_id)
                    .map(|p| p.stock)
                    .ok_or(StoreError::InsufficientStock(line.product_id))?,
            };
            let remaining = try_reserve(current, line.quantity)
                .ok_or(StoreError::InsufficientStock(line.product_id))?;
            staged.insert(line.product_id, remaining);
        }

        let order_id = state.next_id();
        let now = Utc::now();
        state.orders.insert(
            order_id,
            Order {
                id: order_id,
                user_id: draft.user_id,
                store_id: draft.store_id,
                address_id: draft.address_id,
                total: draft.total,
                status: OrderStatus::Pending,
                provider_txn_id: None,
                payment_metadata: None,
                created_at: now,
            },
        );
        for line in lines {
            let id = state.next_id();
            state.lines.push(OrderLine {
                id,
                transaction_id: order_id,
                product_id: line.product_id,
                product_name: line.product_name.clone(),
                product_price: line.product_price,
                quantity: line.quantity,
                created_at: now,
            });
        }
        for (product_id, stock) in staged {
            if let Some(p) = state.products.get_mut(&product_id) {
                p.stock = stock;
            }
        }
        Ok(order_id)
    }

    async fn find_order(&self, order_id: i64) -> Result<Option<Order>> {
        Ok(self.lock().orders.get(&order_id).cloned())
    }

    async fn order_lines(&self, order_id: i64) -> Result<Vec<OrderLine>> {
        Ok(self
            .lock()
            .lines
            .iter()
            .filter(|l| l.transaction_id == order_id)
            .cloned()
            .collect())
    }

    async fn mark_order_paid(
        &self,
        order_id: i64,
        provider_txn_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let mut state = self.lock();
        let Some(order) = state.pending_order_mut(order_id) else {
            return Ok(false);
        };
        order.status = OrderStatus::Paid;
        order.provider_txn_id = Some(provider_txn_id.to_string());
        order.payment_metadata = Some(metadata.clone());
        Ok(true)
    }

    async fn fail_order_and_restock(
        &self,
        order_id: i64,
        lines: &[OrderLine],
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let mut state = self.lock();
        let Some(order) = state.pending_order_mut(order_id) else {
            return Ok(false);
        };
        order.status = OrderStatus::Failed;
        order.payment_metadata = Some(metadata.clone());
        for line in lines {
            if let Some(p) = state.products.get_mut(&line.product_id) {
                p.stock += line.quantity;
            }
        }
        Ok(true)
    }

    async fn mark_order_failed(
        &self,
        order_id: i64,
        metadata: &serde_json::Value,
    ) -> Result<bool> {
        let mut state = self.lock();
        let Some(order) = state.pending_order_mut(order_id) else {
            return Ok(false);
        };
        order.status = OrderStatus::Failed;
        order.payment_metadata = Some(metadata.clone());
        Ok(true)
    }

    async fn list_orders(&self, filter: &OrderFilter, page: PageRequest) -> Result<Page<Order>> {
        let state = self.lock();
        let mut matching: Vec<&Order> = state.orders.values().filter(|o| filter.matches(o)).collect();
        matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let total = i64::try_from(matching.len()).unwrap_or(i64::MAX);
        let offset = usize::try_from(page.offset()).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit).unwrap_or(usize::MAX);
        let items = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(Page { items, total })
    }
}

#[async_trait]
impl AuthStore for MemoryStore {
    async fn create_user_with_store(&self, user: &NewUser, store_name: &str) -> Result<User> {
        let mut state = self.lock();
        if state.users.values().any(|u| u.user.email == user.email) {
            return Err(StoreError::Conflict("email already registered".into()));
        }
        let id = state.next_id();
        let created = User {
            id,
            name: user.name.clone(),
            email: user.email.clone(),
            phone: user.phone.clone(),
            role: user.role,
            created_at: Utc::now(),
        };
        state.users.insert(
            id,
            UserWithPassword {
                user: created.clone(),
                password_hash: user.password_hash.clone(),
            },
        );
        let store_id = state.next_id();
        state.stores.insert(store_id, (id, store_name.to_string()));
        Ok(created)
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<User>> {
        Ok(self.lock().users.get(&user_id).map(|u| u.user.clone()))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserWithPassword>> {
        Ok(self
            .lock()
            .users
            .values()
            .find(|u| u.user.email == email)
            .cloned())
    }

    async fn insert_refresh_token(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.refresh_tokens.contains_key(token_hash) {
            return Err(StoreError::Conflict("refresh token collision".into()));
        }
        state.insert_refresh_token(user_id, token_hash, expires_at);
        Ok(())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>> {
        Ok(self.lock().refresh_tokens.get(token_hash).cloned())
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> Result<bool> {
        Ok(self.lock().refresh_tokens.remove(token_hash).is_some())
    }

    async fn rotate_refresh_token(
        &self,
        old_hash: &str,
        new_hash: &str,
        user_id: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.lock();
        let owned = state
            .refresh_tokens
            .get(old_hash)
            .is_some_and(|t| t.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        if state.refresh_tokens.contains_key(new_hash) {
            return Err(StoreError::Conflict("refresh token collision".into()));
        }
        state.refresh_tokens.remove(old_hash);
        state.insert_refresh_token(user_id, new_hash, expires_at);
        Ok(true)
    }

    async fn delete_user_refresh_tokens(&self, user_id: i64) -> Result<u64> {
        let mut state = self.lock();
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, t| t.user_id != user_id);
        Ok(u64::try_from(before - state.refresh_tokens.len()).unwrap_or(u64::MAX))
    }
}
