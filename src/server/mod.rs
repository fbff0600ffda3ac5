// Ingestion service - HTTP surface of the central aggregation server
//
// Routes:
//   POST /metrics  - authenticated telemetry ingestion
//   GET  /health   - store reachability probe
//
// Every request is handled independently. The store handle is shared by all
// requests and must be safe for concurrent use; no ordering or
// de-duplication is imposed between requests from the same instance.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::storage::TelemetryStore;

pub mod auth;
pub mod handlers;
pub mod writer;

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn TelemetryStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        AppState { store }
    }
}

/// Builds the ingestion router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", post(handlers::ingest_metrics))
        .route("/health", get(handlers::health))
        .with_state(state)
}
