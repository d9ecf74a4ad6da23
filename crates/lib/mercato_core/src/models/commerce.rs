//! Catalog, cart and order models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Catalog product with its stock counter. `stock` never goes below zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub store_id: i64,
    pub category_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub stock: i32,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

/// Shipping address. Only ownership matters to checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    pub id: i64,
    pub user_id: i64,
    pub label: String,
    pub street: String,
    pub city: String,
}

/// One requested cart line. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: i64,
    pub quantity: i32,
}

/// Order lifecycle. `Paid` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for unrecognised order status strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "paid" => Ok(OrderStatus::Paid),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Order header (the `transactions` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub store_id: i64,
    pub address_id: i64,
    pub total: Decimal,
    pub status: OrderStatus,
    pub provider_txn_id: Option<String>,
    pub payment_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Immutable snapshot of one purchased product (the `product_logs` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: i64,
    pub transaction_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub product_price: Decimal,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
}

/// A line snapshot taken at validation time, before it has a row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSnapshot {
    pub product_id: i64,
    pub product_name: String,
    pub product_price: Decimal,
    pub quantity: i32,
}

impl LineSnapshot {
    pub fn subtotal(&self) -> Decimal {
        self.product_price * Decimal::from(self.quantity)
    }
}

/// Order header fields known before the order is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub user_id: i64,
    pub store_id: i64,
    pub address_id: i64,
    pub total: Decimal,
}

/// Listing filters. `user_id = None` lists every user's orders.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub user_id: Option<i64>,
    pub status: Option<OrderStatus>,
    pub store_id: Option<i64>,
    pub min_total: Option<Decimal>,
    pub max_total: Option<Decimal>,
}

impl OrderFilter {
    /// Whether `order` satisfies every set filter.
    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.is_none_or(|id| order.user_id == id)
            && self.status.is_none_or(|s| order.status == s)
            && self.store_id.is_none_or(|id| order.store_id == id)
            && self.min_total.is_none_or(|min| order.total >= min)
            && self.max_total.is_none_or(|max| order.total <= max)
    }
}

/// Default page size for listings.
pub const DEFAULT_PAGE_LIMIT: i64 = 10;

/// Largest page size a caller may request.
pub const MAX_PAGE_LIMIT: i64 = 100;

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub limit: i64,
}

impl PageRequest {
    /// Normalise raw query values: non-positive values fall back to defaults.
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        let page = page.filter(|p| *p > 0).unwrap_or(1);
        let limit = limit
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .min(MAX_PAGE_LIMIT);
        Self { page, limit }
    }

    /// Rows to skip, or `None` when the page lies beyond any addressable row.
    pub fn checked_offset(&self) -> Option<i64> {
        (self.page - 1).checked_mul(self.limit)
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results plus the total number of matching rows.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_request_normalises_bad_values() {
        assert_eq!(PageRequest::new(None, None), PageRequest { page: 1, limit: 10 });
        assert_eq!(
            PageRequest::new(Some(0), Some(-5)),
            PageRequest { page: 1, limit: 10 }
        );
        assert_eq!(PageRequest::new(Some(3), Some(500)).limit, MAX_PAGE_LIMIT);
        assert_eq!(PageRequest::new(Some(3), Some(20)).offset(), 40);
    }

    #[test]
    fn huge_page_offset_does_not_overflow() {
        let page = PageRequest::new(Some(i64::MAX), Some(100));
        assert_eq!(page.checked_offset(), None);
        assert_eq!(page.offset(), i64::MAX);
        assert_eq!(PageRequest::new(Some(2), Some(10)).checked_offset(), Some(10));
    }

    #[test]
    fn status_parses_and_knows_terminal_states() {
        assert_eq!("paid".parse::<OrderStatus>().unwrap(), OrderStatus::Paid);
        assert!("shipped".parse::<OrderStatus>().is_err());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }

    #[test]
    fn snapshot_subtotal_multiplies_price_by_quantity() {
        let line = LineSnapshot {
            product_id: 1,
            product_name: "Mug".into(),
            product_price: Decimal::new(999, 2),
            quantity: 2,
        };
        assert_eq!(line.subtotal(), Decimal::new(1998, 2));
    }
}
