//! # Depot Node
//!
//! Warehouse fulfilment node: checkout, order history and robot delivery
//! planning over HTTP.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    routing::{get, patch, post},
    Router,
};
use depot_core::Product;
use depot_store::{InMemoryStore, OrderStore, SqliteStore};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod state;

use config::{Config, StorageConfig};
use state::AppState;

/// Run the Depot node server over `store`.
pub async fn run_server<S: OrderStore>(store: S, config: Config) -> anyhow::Result<()> {
    let state = AppState::new(Arc::new(store), config.service.clone());

    if let Some(path) = &config.seed_file {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading seed file {}", path.display()))?;
        let products: Vec<Product> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing seed file {}", path.display()))?;
        state.catalog.seed(&products).await?;
    }

    let app = create_router(state);

    let addr = config.server_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Depot node stopped");
    Ok(())
}

/// Create the API router.
fn create_router<S: OrderStore>(state: AppState<S>) -> Router {
    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))

        // Catalog
        .route("/api/v1/products", get(api::products::list_products::<S>))

        // Checkout and history
        .route("/api/v1/orders", post(api::orders::create_orders::<S>))
        .route("/api/v1/orders/:order_id", get(api::orders::get_order::<S>))
        .route("/api/v1/users/:user_id/orders", get(api::orders::list_user_orders::<S>))

        // Robots
        .route("/api/v1/robot/delivery-plan", post(api::robot::generate_delivery_plan::<S>))
        .route("/api/v1/robot/orders/status", patch(api::robot::update_order_status::<S>))

        // Add middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Config::from_env();
    info!("Depot node starting with {:?} storage", config.storage);

    match config.storage.clone() {
        StorageConfig::Memory => run_server(InMemoryStore::new(), config).await,
        StorageConfig::Sqlite(path) => {
            let store = SqliteStore::open(&path)
                .with_context(|| format!("opening database {}", path))?;
            run_server(store, config).await
        }
    }
}
