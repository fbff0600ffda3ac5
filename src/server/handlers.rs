// HTTP handlers for the ingestion service
//
// POST /metrics walks one request through:
//   credential -> authenticate -> decode -> identity check -> timestamp -> write
// and stops at the first failing step. Later steps never run after a
// rejection, so a rejected request leaves nothing behind in the store.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use super::auth::{authenticate, bearer_token, AuthError};
use super::writer::write_batch;
use super::AppState;
use crate::metrics::MetricsPayload;
use crate::storage::StorageError;

/// Request-scoped rejections, each mapped to one status code
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Unauthorized(#[from] AuthError),

    #[error("invalid JSON payload: {0}")]
    BadPayload(#[from] serde_json::Error),

    #[error("instance ID mismatch")]
    InstanceMismatch,

    #[error("failed to store metrics")]
    Persistence(#[source] StorageError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::BadPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::InstanceMismatch => StatusCode::FORBIDDEN,
            ApiError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            // lookup failures are not reported to the caller in detail
            ApiError::Unauthorized(AuthError::UnknownCredential | AuthError::Lookup(_)) => {
                "unauthorized".to_string()
            }
            other => other.to_string(),
        };

        (self.status(), Json(json!({ "error": message }))).into_response()
    }
}

/// Handler for `POST /metrics`
///
/// # Responses
/// - 200 `{"status":"success"}`
/// - 401 missing/malformed header, unknown or unprovisioned key
/// - 400 body is not a valid payload
/// - 403 payload `instance_id` differs from the authenticated instance
/// - 500 the batch could not be committed
pub async fn ingest_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = bearer_token(&headers)?;

    let instance_id = match authenticate(state.store.as_ref(), token).await {
        Ok(instance_id) => instance_id,
        Err(e) => {
            warn!("Authentication failed: {}", e);
            return Err(e.into());
        }
    };

    let payload: MetricsPayload = serde_json::from_slice(&body)?;

    if payload.instance_id != instance_id {
        warn!(
            "Instance ID mismatch: authenticated={}, payload={}",
            instance_id, payload.instance_id
        );
        return Err(ApiError::InstanceMismatch);
    }

    let timestamp = payload.timestamp_or(Utc::now());

    let stored = write_batch(state.store.as_ref(), &instance_id, timestamp, &payload.gpus)
        .await
        .map_err(|e| {
            error!("Failed to insert metrics for {}: {}", instance_id, e);
            ApiError::Persistence(e)
        })?;

    info!("Stored {} GPU metrics for instance {}", stored, instance_id);

    Ok(Json(json!({ "status": "success" })))
}

/// Handler for `GET /health`
pub async fn health(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "healthy" }))).into_response(),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "error": "database connection failed"
                })),
            )
                .into_response()
        }
    }
}
