//! Checkout orchestration.
//!
//! A checkout runs in two phases. The first is one atomic store unit that
//! writes the pending order, its line snapshots and the stock decrements.
//! The second, only when a payment token is supplied, charges the payment
//! provider and settles the order as `paid`, or compensates by restoring
//! stock and marking it `failed`. The provider call sits outside any store
//! transaction, so compensation is a separate unit.

pub mod validator;

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use validator::{ValidatedCart, validate_cart};

use crate::models::auth::Role;
use crate::models::commerce::{
    CartItem, Order, OrderDraft, OrderFilter, OrderLine, OrderStatus, Page, PageRequest,
};
use crate::payment::{ChargeMetadata, PaymentProvider};
use crate::store::{CommerceStore, StoreError};

/// Payment method recorded when the caller names none.
pub const DEFAULT_PAYMENT_METHOD: &str = "card";

/// Checkout and order-access errors.
#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("Cart is empty")]
    EmptyCart,

    #[error("Quantity for product {0} must be positive")]
    InvalidQuantity(i64),

    #[error("Product {0} not found")]
    ProductNotFound(i64),

    #[error("Insufficient stock for product {0}")]
    InsufficientStock(i64),

    #[error("All items must belong to the same store")]
    CrossStoreCart,

    #[error("Address not found")]
    AddressNotFound,

    #[error("Address does not belong to this user")]
    AddressOwnershipMismatch,

    #[error("Transaction not found")]
    OrderNotFound,

    #[error("Forbidden")]
    Forbidden,

    /// The order exists and is now `failed`.
    #[error("Payment failed for transaction {order_id}: {reason}")]
    PaymentFailed { order_id: i64, reason: String },

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CheckoutError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientStock(product_id) => Self::InsufficientStock(product_id),
            other => Self::Store(other),
        }
    }
}

/// Input to [`CheckoutService::checkout`].
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: i64,
    pub address_id: i64,
    pub items: Vec<CartItem>,
    pub payment_method: String,
    /// Provider-side payment token. `None` or empty defers payment.
    pub payment_token: Option<String>,
}

/// Outcome of a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReceipt {
    pub order_id: i64,
    pub status: OrderStatus,
    pub total: Decimal,
    pub provider_txn_id: Option<String>,
}

/// Composes validation, the transaction writer and the payment provider.
#[derive(Clone)]
pub struct CheckoutService {
    store: Arc<dyn CommerceStore>,
    payments: Arc<dyn PaymentProvider>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        store: Arc<dyn CommerceStore>,
        payments: Arc<dyn PaymentProvider>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            store,
            payments,
            currency: currency.into(),
        }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Create an order for `request.user_id` and, if a token is given, pay for it.
    ///
    /// On a payment failure the order has already been compensated when
    /// [`CheckoutError::PaymentFailed`] is returned.
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt, CheckoutError> {
        let address = self
            .store
            .find_address(request.address_id)
            .await?
            .ok_or(CheckoutError::AddressNotFound)?;
        if address.user_id != request.user_id {
            return Err(CheckoutError::AddressOwnershipMismatch);
        }

        let cart = validate_cart(self.store.as_ref(), &request.items).await?;
        let draft = OrderDraft {
            user_id: request.user_id,
            store_id: cart.store_id,
            address_id: address.id,
            total: cart.total,
        };
        let order_id = self.store.commit_order(&draft, &cart.lines).await?;
        info!(
            order_id,
            user_id = request.user_id,
            store_id = cart.store_id,
            total = %cart.total,
            lines = cart.lines.len(),
            "order reserved"
        );

        let Some(token) = request.payment_token.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(CheckoutReceipt {
                order_id,
                status: OrderStatus::Pending,
                total: cart.total,
                provider_txn_id: None,
            });
        };

        let mut metadata = ChargeMetadata::new();
        metadata.insert("transaction_id".into(), order_id.to_string());
        metadata.insert("method".into(), request.payment_method.clone());

        match self
            .payments
            .charge(cart.total, &self.currency, token, &metadata)
            .await
        {
            Ok(reference) => {
                let stored = json!({
                    "transaction_id": order_id,
                    "method": request.payment_method,
                });
                match self
                    .store
                    .mark_order_paid(order_id, &reference, &stored)
                    .await
                {
                    Ok(true) => {
                        info!(order_id, provider = self.payments.name(), %reference, "order paid")
                    }
                    Ok(false) => {
                        warn!(order_id, %reference, "charged order was no longer pending")
                    }
                    // The charge is captured; the order must be settled by hand.
                    Err(e) => error!(
                        order_id,
                        provider = self.payments.name(),
                        %reference,
                        error = %e,
                        "payment captured but order could not be marked paid"
                    ),
                }
                Ok(CheckoutReceipt {
                    order_id,
                    status: OrderStatus::Paid,
                    total: cart.total,
                    provider_txn_id: Some(reference),
                })
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(order_id, provider = self.payments.name(), %reason, "payment failed");
                self.compensate(order_id, &reason).await;
                Err(CheckoutError::PaymentFailed { order_id, reason })
            }
        }
    }

    /// Restore reserved stock and mark the order failed.
    ///
    /// Never returns an error. If restocking cannot complete the order is
    /// still moved to `failed` and the drift is logged.
    async fn compensate(&self, order_id: i64, reason: &str) {
        let metadata = json!({ "error": reason });

        let lines = match self.store.order_lines(order_id).await {
            Ok(lines) => lines,
            Err(e) => {
                error!(order_id, error = %e, "could not load order lines for compensation");
                self.fail_without_restock(order_id, &metadata).await;
                return;
            }
        };
        let products: Vec<i64> = lines.iter().map(|l| l.product_id).collect();

        match self
            .store
            .fail_order_and_restock(order_id, &lines, &metadata)
            .await
        {
            Ok(true) => info!(order_id, ?products, "stock restored after failed payment"),
            Ok(false) => warn!(order_id, "order already settled, nothing to compensate"),
            Err(e) => {
                error!(order_id, ?products, error = %e, "stock could not be restored");
                self.fail_without_restock(order_id, &metadata).await;
            }
        }
    }

    async fn fail_without_restock(&self, order_id: i64, metadata: &serde_json::Value) {
        match self.store.mark_order_failed(order_id, metadata).await {
            Ok(_) => warn!(order_id, "order marked failed without restoring stock"),
            Err(e) => error!(order_id, error = %e, "order could not be marked failed"),
        }
    }

    /// Load an order and its lines on behalf of `actor_id`.
    pub async fn get_order(
        &self,
        actor_id: i64,
        role: Role,
        order_id: i64,
    ) -> Result<(Order, Vec<OrderLine>), CheckoutError> {
        let order = self
            .store
            .find_order(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound)?;
        if !role.can_act_for(actor_id, order.user_id) {
            debug!(actor_id, order_id, "order access denied");
            return Err(CheckoutError::Forbidden);
        }
        let lines = self.store.order_lines(order_id).await?;
        Ok((order, lines))
    }

    /// List orders visible to `actor_id`. Non-admins only ever see their own.
    pub async fn list_orders(
        &self,
        actor_id: i64,
        role: Role,
        mut filter: OrderFilter,
        page: PageRequest,
    ) -> Result<Page<Order>, CheckoutError> {
        if !role.is_admin() {
            filter.user_id = Some(actor_id);
        }
        Ok(self.store.list_orders(&filter, page).await?)
    }
}
