// Scheduler module - runs collection cycles on a fixed interval
//
// A cycle is: query the GPU source -> parse -> build payload -> send.
// Cycles run strictly one after another on a single task. A slow cycle delays
// the next tick instead of overlapping with it, and missed ticks are skipped
// rather than replayed in a burst.
//
// # Failure Handling
// - Source failure: logged, nothing is sent, wait for the next tick
// - Send failure: logged, the payload is dropped (no retry, no spill)

use std::time::Duration;

use thiserror::Error;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::metrics::parser::parse_output;
use crate::metrics::{CollectError, GpuSource, MetricsPayload};
use crate::transport::{PayloadSender, SendError};

/// Why a cycle produced no delivery
#[derive(Error, Debug)]
pub enum CycleError {
    #[error("error collecting GPU metrics: {0}")]
    Collect(#[from] CollectError),

    #[error("error sending metrics: {0}")]
    Send(#[from] SendError),
}

/// One host's collect-then-send pipeline
pub struct CollectionCycle<S, T> {
    source: S,
    sender: T,
    instance_id: String,
}

impl<S, T> CollectionCycle<S, T>
where
    S: GpuSource,
    T: PayloadSender,
{
    /// # Arguments
    /// * `source` - Where raw telemetry comes from (normally `nvidia-smi`)
    /// * `sender` - Where payloads go (normally the HTTP client)
    /// * `instance_id` - Identity stamped on every payload
    pub fn new(source: S, sender: T, instance_id: impl Into<String>) -> Self {
        CollectionCycle {
            source,
            sender,
            instance_id: instance_id.into(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Queries the source once and assembles a payload stamped with now.
    ///
    /// Lines the parser cannot use are skipped with a warning; only a failed
    /// tool invocation makes this return an error.
    pub async fn collect(&self) -> Result<MetricsPayload, CollectError> {
        let output = self.source.query().await?;
        let parsed = parse_output(&output);

        if !parsed.warnings.is_empty() {
            warn!(
                "{} line(s) of {} output were skipped",
                parsed.warnings.len(),
                self.source.name()
            );
        }

        Ok(MetricsPayload::new(self.instance_id.clone(), parsed.gpus))
    }

    /// Runs one full cycle.
    ///
    /// # Returns
    /// Number of GPUs delivered
    pub async fn run_once(&self) -> Result<usize, CycleError> {
        let payload = self.collect().await?;
        let count = payload.gpus.len();
        info!("Collected metrics for {} GPUs", count);

        self.sender.send(&payload).await?;
        info!("Successfully sent metrics for {} GPUs", count);

        Ok(count)
    }

    /// Runs cycles forever, one per tick. The first cycle starts immediately.
    pub async fn run_forever(&self, period: Duration) {
        info!(
            "Starting GPU metrics collector for instance {} (every {}s)",
            self.instance_id,
            period.as_secs()
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            // Errors end this cycle only
            if let Err(e) = self.run_once().await {
                error!("{}", e);
            }
        }
    }
}
