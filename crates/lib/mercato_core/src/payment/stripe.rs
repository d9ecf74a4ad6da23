//! Stripe-compatible payment provider.
//!
//! Creates a confirmed PaymentIntent (`/v1/payment_intents`), which
//! authorizes and captures in one call. Amounts are sent in minor units.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use super::{ChargeMetadata, PaymentError, PaymentProvider, to_minor_units};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// PaymentIntent statuses that mean the money was taken (or will be, asynchronously).
const ACCEPTED_STATUSES: &[&str] = &["succeeded", "processing"];

#[derive(Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ProviderError,
}

#[derive(Deserialize)]
struct ProviderError {
    message: Option<String>,
    code: Option<String>,
}

/// External provider adapter keyed by a secret API key.
#[derive(Clone)]
pub struct StripeGateway {
    client: Client,
    api_key: String,
    endpoint: Url,
}

impl fmt::Debug for StripeGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StripeGateway")
            .field("endpoint", &self.endpoint.as_str())
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl StripeGateway {
    /// Build an adapter against `api_base` (e.g. `https://api.stripe.com`).
    pub fn new(api_key: &str, api_base: &str) -> Result<Self, PaymentError> {
        Self::with_timeout(api_key, api_base, REQUEST_TIMEOUT)
    }

    /// Like [`StripeGateway::new`] with an explicit per-request timeout.
    pub fn with_timeout(
        api_key: &str,
        api_base: &str,
        timeout: Duration,
    ) -> Result<Self, PaymentError> {
        let endpoint = Url::parse(api_base)
            .and_then(|base| base.join("/v1/payment_intents"))
            .map_err(|e| PaymentError::Config(format!("invalid provider base url: {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.to_string(),
            endpoint,
        })
    }

    fn form(
        minor: i64,
        currency: &str,
        token: &str,
        metadata: &ChargeMetadata,
    ) -> Vec<(String, String)> {
        let mut params = vec![
            ("amount".to_string(), minor.to_string()),
            ("currency".to_string(), currency.to_ascii_lowercase()),
            ("confirm".to_string(), "true".to_string()),
        ];
        if !token.is_empty() {
            params.push(("payment_method".to_string(), token.to_string()));
        }
        for (key, value) in metadata {
            params.push((format!("metadata[{key}]"), value.clone()));
        }
        params
    }
}

/// No usable answer came back, but the provider may still have captured the
/// charge. Logged so the order can be reconciled by its `transaction_id` metadata.
fn outcome_unknown(metadata: &ChargeMetadata, reason: String) -> PaymentError {
    let transaction_id = metadata
        .get("transaction_id")
        .map(String::as_str)
        .unwrap_or("-");
    warn!(
        %transaction_id,
        %reason,
        "payment outcome unknown, reconcile with the provider by transaction_id"
    );
    PaymentError::Provider(reason)
}

#[async_trait]
impl PaymentProvider for StripeGateway {
    async fn charge(
        &self,
        amount: Decimal,
        currency: &str,
        token: &str,
        metadata: &ChargeMetadata,
    ) -> Result<String, PaymentError> {
        let minor = to_minor_units(amount)?;
        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(&self.api_key, Some(""))
            .form(&Self::form(minor, currency, token, metadata))
            .send()
            .await
            .map_err(|e| outcome_unknown(metadata, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<ErrorEnvelope>(&body)
                .ok()
                .and_then(|env| env.error.message.or(env.error.code))
                .unwrap_or_else(|| format!("provider returned {status}"));
            warn!(%status, %reason, "payment intent rejected");
            return if status.is_server_error() {
                Err(PaymentError::Provider(reason))
            } else {
                Err(PaymentError::Declined(reason))
            };
        }

        let intent: PaymentIntent = response
            .json()
            .await
            .map_err(|e| outcome_unknown(metadata, format!("response parse error: {e}")))?;

        if !ACCEPTED_STATUSES.contains(&intent.status.as_str()) {
            return Err(PaymentError::Declined(format!(
                "payment intent {} ended in status {}",
                intent.id, intent.status
            )));
        }

        info!(intent = %intent.id, status = %intent.status, minor, "payment captured");
        Ok(intent.id)
    }

    fn name(&self) -> &'static str {
        "stripe"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn metadata() -> ChargeMetadata {
        let mut m = ChargeMetadata::new();
        m.insert("transaction_id".into(), "42".into());
        m.insert("method".into(), "card".into());
        m
    }

    #[tokio::test]
    async fn successful_intent_returns_its_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .and(header_exists("authorization"))
            .and(body_string_contains("amount=1998"))
            .and(body_string_contains("currency=usd"))
            .and(body_string_contains("confirm=true"))
            .and(body_string_contains("payment_method=pm_card_visa"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "pi_123", "status": "succeeded"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test", &server.uri()).unwrap();
        let reference = gateway
            .charge(Decimal::new(1998, 2), "USD", "pm_card_visa", &metadata())
            .await
            .unwrap();
        assert_eq!(reference, "pi_123");
    }

    #[tokio::test]
    async fn card_error_is_a_decline_with_provider_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(402).set_body_json(serde_json::json!({
                "error": {"message": "Your card was declined.", "code": "card_declined"}
            })))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test", &server.uri()).unwrap();
        let err = gateway
            .charge(Decimal::new(500, 2), "USD", "pm_card_chargeDeclined", &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Declined(ref m) if m == "Your card was declined."));
    }

    #[tokio::test]
    async fn unfinished_intent_is_declined() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"id": "pi_9", "status": "requires_action"}),
            ))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test", &server.uri()).unwrap();
        let err = gateway
            .charge(Decimal::ONE, "USD", "pm_3ds", &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Declined(_)));
    }

    #[tokio::test]
    async fn provider_outage_is_not_a_decline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test", &server.uri()).unwrap();
        let err = gateway
            .charge(Decimal::ONE, "USD", "pm", &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Provider(_)));
    }

    #[tokio::test]
    async fn timeout_after_send_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": "pi_late", "status": "succeeded"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let gateway =
            StripeGateway::with_timeout("sk_test", &server.uri(), Duration::from_millis(100))
                .unwrap();
        let err = gateway
            .charge(Decimal::ONE, "USD", "pm", &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Provider(ref m) if m.starts_with("request failed")));
    }

    #[tokio::test]
    async fn unreadable_success_body_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let gateway = StripeGateway::new("sk_test", &server.uri()).unwrap();
        let err = gateway
            .charge(Decimal::ONE, "USD", "pm", &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::Provider(ref m) if m.starts_with("response parse error")));
    }

    #[test]
    fn bad_base_url_is_a_config_error() {
        assert!(matches!(
            StripeGateway::new("sk", "not a url"),
            Err(PaymentError::Config(_))
        ));
    }

    #[test]
    fn debug_redacts_the_key() {
        let gateway = StripeGateway::new("sk_live_secret", "https://api.stripe.com").unwrap();
        let shown = format!("{gateway:?}");
        assert!(!shown.contains("sk_live_secret"));
    }
}
