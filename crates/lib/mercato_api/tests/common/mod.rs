//! Shared fixtures for router tests: an in-memory store behind the real router.

#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use mercato_api::config::ApiConfig;
use mercato_api::middleware::rate_limit::RateLimitConfig;
use mercato_api::{AppState, router};
use mercato_core::models::auth::Role;
use mercato_core::payment::{MockGateway, PaymentConfig, PaymentProvider};
use mercato_core::store::memory::MemoryStore;
use serde_json::Value;
use tower::ServiceExt;

pub fn test_config() -> ApiConfig {
    ApiConfig {
        bind_addr: "127.0.0.1:0".into(),
        pg_connection_url: "postgres://unused".into(),
        jwt_secret: "test-secret".into(),
        access_token_ttl_secs: 900,
        refresh_token_ttl_secs: 3600,
        currency: "USD".into(),
        rate_limit: RateLimitConfig {
            per_second: 1000.0,
            burst: 1000,
            trust_forwarded_for: false,
        },
        payment: PaymentConfig::default(),
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub state: AppState,
    pub app: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(test_config(), Arc::new(MockGateway))
    }

    pub fn with(config: ApiConfig, payments: Arc<dyn PaymentProvider>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(config, store.clone(), store.clone(), payments);
        let app = router(state.clone());
        Self { store, state, app }
    }

    /// Bearer token for a seeded user.
    pub fn bearer(&self, user_id: i64, role: Role) -> String {
        let (token, _) = self.state.tokens.access_token(user_id, role).unwrap();
        format!("Bearer {token}")
    }

    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        auth: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        let req = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.send_request(req).await
    }

    /// Send a prebuilt request, returning the status and the JSON body
    /// (`Value::Null` when empty or not JSON).
    pub async fn send_request(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.expect("request");
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
