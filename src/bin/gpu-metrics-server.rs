// GPU Metrics Server - central ingestion service
//
// Accepts telemetry from provisioned hosts on POST /metrics and stores it in
// MongoDB. Settings come from the environment:
//   PORT              listen port (default 8080)
//   MONGODB_URI       connection string (default mongodb://localhost:27017)
//   MONGODB_DATABASE  database name (default vlgpus)
//
// # Usage
// gpu-metrics-server [--create-indexes]

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info};

use gpu_metrics::config::ServerConfig;
use gpu_metrics::logging::{init_logging, mask_credentials};
use gpu_metrics::server::{router, AppState};
use gpu_metrics::storage::MongoStore;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("=== GPU Metrics Server Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env().context("Invalid server configuration")?;
    let create_indexes = env::args().any(|arg| arg == "--create-indexes");

    info!(
        "MongoDB connection: {}/{}",
        mask_credentials(&config.mongodb_uri),
        config.database_name
    );

    let store = MongoStore::connect(&config.mongodb_uri, &config.database_name)
        .await
        .context("Failed to connect to MongoDB")?;

    if create_indexes {
        info!("Creating database indexes...");
        if let Err(e) = store.create_indexes().await {
            error!("Failed to create indexes: {}", e);
        }
    }

    let app = router(AppState::new(Arc::new(store)));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Starting metrics server on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
