//! Payment gateway adapter.
//!
//! [`PaymentProvider`] is the charge capability the checkout depends on.
//! [`PaymentGateway`] is the concrete variant chosen once at startup from
//! [`PaymentConfig`]:
//!
//! - `Mock`: always succeeds, reference derived from the amount
//! - `External`: Stripe-compatible PaymentIntents (authorize + capture)

pub mod mock;
pub mod stripe;

use std::collections::BTreeMap;
use std::env;

use async_trait::async_trait;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;
use tracing::{info, warn};

pub use mock::MockGateway;
pub use stripe::StripeGateway;

/// Default API base for the external provider.
pub const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Free-form key/value pairs forwarded to the provider for reconciliation.
pub type ChargeMetadata = BTreeMap<String, String>;

/// Errors returned by a payment provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("payment declined: {0}")]
    Declined(String),

    #[error("payment provider unavailable: {0}")]
    Provider(String),

    #[error("invalid charge: {0}")]
    InvalidCharge(String),

    #[error("payment misconfigured: {0}")]
    Config(String),
}

/// Charge capability consumed by the checkout orchestrator.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Charge `amount` (major units) and return the provider's reference.
    async fn charge(
        &self,
        amount: Decimal,
        currency: &str,
        token: &str,
        metadata: &ChargeMetadata,
    ) -> Result<String, PaymentError>;

    /// Short provider name for logs.
    fn name(&self) -> &'static str;
}

/// Convert a major-unit amount to integer minor units (cents), rounding half away from zero.
pub fn to_minor_units(amount: Decimal) -> Result<i64, PaymentError> {
    if amount.is_sign_negative() {
        return Err(PaymentError::InvalidCharge(format!(
            "negative amount {amount}"
        )));
    }
    (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| PaymentError::InvalidCharge(format!("amount {amount} out of range")))
}

/// Static payment configuration read at process start.
#[derive(Clone, Debug, Default)]
pub struct PaymentConfig {
    /// Provider name: `"mock"` or `"stripe"`.
    pub provider: String,
    /// Secret API key for the external provider.
    pub stripe_api_key: Option<String>,
    /// Base URL for the external provider API.
    pub stripe_api_base: String,
}

impl PaymentConfig {
    /// Read `PAYMENT_PROVIDER`, `STRIPE_API_KEY` and `STRIPE_API_BASE`.
    pub fn from_env() -> Self {
        Self {
            provider: env::var("PAYMENT_PROVIDER").unwrap_or_else(|_| "mock".to_string()),
            stripe_api_key: env::var("STRIPE_API_KEY").ok(),
            stripe_api_base: env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| DEFAULT_STRIPE_API_BASE.to_string()),
        }
    }
}

/// The payment provider selected for this process.
#[derive(Debug, Clone)]
pub enum PaymentGateway {
    Mock(MockGateway),
    External(StripeGateway),
}

impl PaymentGateway {
    /// Resolve the gateway once from configuration.
    ///
    /// Falls back to [`MockGateway`] unless the provider is `stripe` and a
    /// non-blank key is configured.
    pub fn from_config(config: &PaymentConfig) -> Result<Self, PaymentError> {
        match config.provider.trim().to_ascii_lowercase().as_str() {
            "stripe" => match config
                .stripe_api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty())
            {
                Some(key) => {
                    info!(base = %config.stripe_api_base, "using external payment provider");
                    Ok(Self::External(StripeGateway::new(
                        key,
                        &config.stripe_api_base,
                    )?))
                }
                None => {
                    warn!("PAYMENT_PROVIDER=stripe but STRIPE_API_KEY is empty, using mock payments");
                    Ok(Self::Mock(MockGateway))
                }
            },
            "" | "mock" => Ok(Self::Mock(MockGateway)),
            other => {
                warn!(provider = other, "unknown payment provider, using mock payments");
                Ok(Self::Mock(MockGateway))
            }
        }
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, Self::Mock(_))
    }
}

#[async_trait]
impl PaymentProvider for PaymentGateway {
    async fn charge(
        &self,
        amount: Decimal,
        currency: &str,
        token: &str,
        metadata: &ChargeMetadata,
    ) -> Result<String, PaymentError> {
        match self {
            Self::Mock(g) => g.charge(amount, currency, token, metadata).await,
            Self::External(g) => g.charge(amount, currency, token, metadata).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Mock(g) => g.name(),
            Self::External(g) => g.name(),
        }
    }
}
