//! Mock payment provider for development and tests.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::debug;

use super::{ChargeMetadata, PaymentError, PaymentProvider, to_minor_units};

/// Accepts every charge and returns `mock_txn_<minor units>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockGateway;

#[async_trait]
impl PaymentProvider for MockGateway {
    async fn charge(
        &self,
        amount: Decimal,
        currency: &str,
        _token: &str,
        metadata: &ChargeMetadata,
    ) -> Result<String, PaymentError> {
        let minor = to_minor_units(amount)?;
        debug!(minor, currency, ?metadata, "mock charge accepted");
        Ok(format!("mock_txn_{minor}"))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reference_is_deterministic() {
        let meta = ChargeMetadata::new();
        let a = MockGateway
            .charge(Decimal::new(1998, 2), "USD", "tok", &meta)
            .await
            .unwrap();
        let b = MockGateway
            .charge(Decimal::new(1998, 2), "USD", "other", &meta)
            .await
            .unwrap();
        assert_eq!(a, "mock_txn_1998");
        assert_eq!(a, b);
    }
}
