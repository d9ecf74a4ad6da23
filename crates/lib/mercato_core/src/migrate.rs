//! Database migration support.
//!
//! Embeds the schema for products, orders, order lines, users and refresh
//! tokens from `mercato_core/migrations/`.

use sqlx::PgPool;

/// Apply every pending embedded migration.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
