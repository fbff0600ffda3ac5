// Transport module - delivers payloads to the ingestion server
//
// One POST per collection cycle, bearer-authenticated, bounded by a 30 second
// timeout. There is no retry and no local buffering: a failed delivery is
// reported to the caller and that cycle's data is gone.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::metrics::MetricsPayload;

/// Upper bound for one delivery attempt
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur while delivering a payload
#[derive(Error, Debug)]
pub enum SendError {
    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to send metrics: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metrics server returned status {0}")]
    Rejected(u16),
}

/// Anything that can take a payload off the collector's hands
#[async_trait]
pub trait PayloadSender: Send + Sync {
    /// Makes a single delivery attempt
    async fn send(&self, payload: &MetricsPayload) -> Result<(), SendError>;
}

/// HTTP client for `POST /metrics`
pub struct MetricsClient {
    client: Client,
    metrics_url: String,
    api_key: String,
}

impl MetricsClient {
    /// Creates a client for the given endpoint and bearer credential
    ///
    /// # Errors
    /// Fails only if the underlying HTTP client cannot be built (TLS backend
    /// initialisation).
    pub fn new(metrics_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, SendError> {
        Self::with_timeout(metrics_url, api_key, SEND_TIMEOUT)
    }

    pub fn with_timeout(
        metrics_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SendError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(MetricsClient {
            client,
            metrics_url: metrics_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn metrics_url(&self) -> &str {
        &self.metrics_url
    }
}

#[async_trait]
impl PayloadSender for MetricsClient {
    /// Serializes and POSTs the payload.
    ///
    /// Only a 2xx status counts as delivered; the response body is ignored.
    async fn send(&self, payload: &MetricsPayload) -> Result<(), SendError> {
        let body = serde_json::to_vec(payload)?;

        debug!(
            "Sending {} bytes ({} GPUs) to {}",
            body.len(),
            payload.gpus.len(),
            self.metrics_url
        );

        let response = self
            .client
            .post(&self.metrics_url)
            .header(CONTENT_TYPE, "application/json")
            .bearer_auth(&self.api_key)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SendError::Rejected(status.as_u16()));
        }

        Ok(())
    }
}
