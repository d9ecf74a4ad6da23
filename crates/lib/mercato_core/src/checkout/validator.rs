//! Read-only cart validation.

use rust_decimal::Decimal;

use super::CheckoutError;
use crate::models::commerce::{CartItem, LineSnapshot};
use crate::store::CommerceStore;

/// A cart that passed validation, ready to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCart {
    pub store_id: i64,
    pub lines: Vec<LineSnapshot>,
    pub total: Decimal,
}

/// Check that every line resolves to an in-stock product of one store and
/// snapshot name and price as they are now.
///
/// Stock is checked against the current row only; the writer's conditional
/// decrement is what actually prevents overselling.
pub async fn validate_cart(
    store: &dyn CommerceStore,
    items: &[CartItem],
) -> Result<ValidatedCart, CheckoutError> {
    if items.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }
    if let Some(bad) = items.iter().find(|i| i.quantity <= 0) {
        return Err(CheckoutError::InvalidQuantity(bad.product_id));
    }

    let mut store_id = None;
    let mut lines = Vec::with_capacity(items.len());
    let mut total = Decimal::ZERO;

    for item in items {
        let product = store
            .find_product(item.product_id)
            .await?
            .ok_or(CheckoutError::ProductNotFound(item.product_id))?;

        if product.stock < item.quantity {
            return Err(CheckoutError::InsufficientStock(product.id));
        }
        match store_id {
            None => store_id = Some(product.store_id),
            Some(id) if id != product.store_id => return Err(CheckoutError::CrossStoreCart),
            Some(_) => {}
        }

        let line = LineSnapshot {
            product_id: product.id,
            product_name: product.name,
            product_price: product.price,
            quantity: item.quantity,
        };
        total += line.subtotal();
        lines.push(line);
    }

    let store_id = store_id.ok_or(CheckoutError::EmptyCart)?;
    Ok(ValidatedCart {
        store_id,
        lines,
        total,
    })
}
