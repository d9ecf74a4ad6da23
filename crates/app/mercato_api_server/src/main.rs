//! Mercato API server binary.
//!
//! Serves the checkout, transaction and session endpoints over PostgreSQL,
//! or over an in-process store with `--in-memory`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mercato_api::config::ApiConfig;
use mercato_api::middleware::rate_limit;
use mercato_core::payment::{PaymentGateway, PaymentProvider};
use mercato_core::store::memory::MemoryStore;
use mercato_core::store::postgres::PgStore;
use mercato_core::store::{AuthStore, CommerceStore};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "mercato_api_server", about = "Mercato API server")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3100")]
    bind_addr: String,

    /// PostgreSQL connection URL.
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/mercato"
    )]
    database_url: String,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Keep every row in process memory instead of PostgreSQL. Nothing survives a restart.
    #[arg(long, default_value_t = false)]
    in_memory: bool,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,mercato_api=debug,mercato_core=debug")
            }),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    config.bind_addr = args.bind_addr;
    config.pg_connection_url = args.database_url;

    // Resolved once; every request shares this gateway.
    let gateway = PaymentGateway::from_config(&config.payment)?;
    info!(provider = gateway.name(), currency = %config.currency, "payment gateway ready");
    let payments = Arc::new(gateway);

    let (commerce, users): (Arc<dyn CommerceStore>, Arc<dyn AuthStore>) = if args.in_memory {
        warn!("running with the in-memory store");
        let store = Arc::new(MemoryStore::new());
        let commerce: Arc<dyn CommerceStore> = store.clone();
        let users: Arc<dyn AuthStore> = store;
        (commerce, users)
    } else {
        info!(
            max_connections = args.max_connections,
            "connecting to PostgreSQL"
        );
        let pool = PgPoolOptions::new()
            .max_connections(args.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.pg_connection_url)
            .await?;

        info!("running database migrations");
        mercato_api::migrate(&pool).await?;

        let store = Arc::new(PgStore::new(pool));
        let commerce: Arc<dyn CommerceStore> = store.clone();
        let users: Arc<dyn AuthStore> = store;
        (commerce, users)
    };

    let bind_addr = config.bind_addr.clone();
    let state = mercato_api::AppState::new(config, commerce, users, payments);
    tokio::spawn(rate_limit::start_cleanup_task(
        state.rate_limiter.clone(),
        Duration::from_secs(60),
    ));
    let app = mercato_api::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}
