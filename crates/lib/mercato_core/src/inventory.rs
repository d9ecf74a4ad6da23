//! Inventory ledger: atomic conditional stock moves.
//!
//! The conditional decrement is the only guard against overselling: the
//! checkout validator reads stock without a lock, so the write must re-check.

use sqlx::PgConnection;

/// Decrement `product_id` by `quantity` only while `stock >= quantity`.
///
/// Returns `false` when no row matched (product absent or stock too low).
pub async fn reserve_stock(
    conn: &mut PgConnection,
    product_id: i64,
    quantity: i32,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE products SET stock = stock - $1 \
         WHERE id = $2 AND stock >= $1",
    )
    .bind(quantity)
    .bind(product_id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Return `quantity` units to `product_id`. Returns `false` if the product is gone.
pub async fn release_stock(
    conn: &mut PgConnection,
    product_id: i64,
    quantity: i32,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE products SET stock = stock + $1 WHERE id = $2")
        .bind(quantity)
        .bind(product_id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// In-process form of the conditional decrement: the new stock level, or
/// `None` if `quantity` is not available.
pub fn try_reserve(stock: i32, quantity: i32) -> Option<i32> {
    if quantity > 0 && stock >= quantity {
        Some(stock - quantity)
    } else {
        None
    }
}
