use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;
use crate::forge::LogForge;
use crate::pipeline::FileBuilder;
use crate::queue::MemoryQueue;
use crate::repository::{MemoryStore, PgStore, Store};
use crate::state::AppState;

pub mod api;
pub mod config;
pub mod db;
pub mod forge;
pub mod logging;
pub mod pipeline;
pub mod pubsub;
pub mod queue;
pub mod repository;
pub mod service;
pub mod state;
pub mod stream;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perch_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Perch server...");

    let config = ServerConfig::from_env();

    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(database_url)
                .await
                .expect("Failed to create database pool");

            db::run_migrations(&pool)
                .await
                .expect("Failed to run database migrations");

            Arc::new(PgStore::new(pool))
        }
        None => {
            let store = match &config.seed_file {
                Some(path) => MemoryStore::from_seed_file(path)
                    .await
                    .expect("Failed to load seed file"),
                None => MemoryStore::new(),
            };
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(store)
        }
    };

    let addr = config.bind_addr.clone();
    let state = AppState::new(
        store,
        Arc::new(MemoryQueue::new()),
        Arc::new(FileBuilder),
        Arc::new(LogForge),
        config,
    );
    let shutdown = state.shutdown.clone();

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down, closing streams");
            shutdown.cancel();
        })
        .await
        .expect("Failed to start server");
}
