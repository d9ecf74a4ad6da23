//! # mercato_api
//!
//! HTTP API library for Mercato.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use mercato_core::auth::refresh::RefreshTokenService;
use mercato_core::checkout::CheckoutService;
use mercato_core::clock::{Clock, SystemClock};
use mercato_core::payment::PaymentProvider;
use mercato_core::store::{AuthStore, CommerceStore};
use sqlx::PgPool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::ApiConfig;
use crate::handlers::{auth, health, transactions};
use crate::middleware::rate_limit::RateLimiter;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// API configuration.
    pub config: ApiConfig,
    /// User persistence for register and login.
    pub users: Arc<dyn AuthStore>,
    pub checkout: CheckoutService,
    pub tokens: RefreshTokenService,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wire services over the given stores and the payment provider chosen at startup.
    pub fn new(
        config: ApiConfig,
        commerce: Arc<dyn CommerceStore>,
        users: Arc<dyn AuthStore>,
        payments: Arc<dyn PaymentProvider>,
    ) -> Self {
        Self::with_clock(config, commerce, users, payments, Arc::new(SystemClock))
    }

    /// Like [`AppState::new`] with an explicit clock for token expiry.
    pub fn with_clock(
        config: ApiConfig,
        commerce: Arc<dyn CommerceStore>,
        users: Arc<dyn AuthStore>,
        payments: Arc<dyn PaymentProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let checkout = CheckoutService::new(commerce, payments, config.currency.clone());
        let tokens = RefreshTokenService::new(users.clone(), config.token_settings(), clock);
        let rate_limiter = RateLimiter::new(config.rate_limit);
        Self {
            config,
            users,
            checkout,
            tokens,
            rate_limiter,
        }
    }
}

/// Run embedded database migrations.
///
/// Delegates to `mercato_core::migrate::migrate()` which owns the migration files.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    mercato_core::migrate::migrate(pool).await
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Public routes (no auth required)
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/auth/register", post(auth::register_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/auth/refresh", post(auth::refresh_handler))
        .route("/auth/logout", post(auth::logout_handler));

    // Protected routes (require auth)
    let protected = Router::new()
        .route("/auth/logout/all", post(auth::logout_all_handler))
        .route(
            "/transactions",
            get(transactions::list_transactions_handler)
                .post(transactions::create_transaction_handler),
        )
        .route(
            "/transactions/{id}",
            get(transactions::get_transaction_handler),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::enforce,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
