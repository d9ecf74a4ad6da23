//! # mercato_core
//!
//! Core domain logic for Mercato: cart validation, the atomic transaction
//! writer, the inventory ledger, payment providers, checkout orchestration
//! and the refresh token store.

pub mod auth;
pub mod checkout;
pub mod clock;
pub mod inventory;
pub mod migrate;
pub mod models;
pub mod payment;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
