// GPU Metrics Collector - edge agent
//
// Queries nvidia-smi on a fixed interval and delivers each snapshot to the
// ingestion server. One cycle at a time; a failed cycle is logged and the
// next tick starts fresh.
//
// # Usage
// gpu-metrics-collector [--config <path>] [--once]
//
// Example:
// GPU_METRICS_CONFIG=./config.json gpu-metrics-collector --once

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{error, info};

use gpu_metrics::config::CollectorConfig;
use gpu_metrics::logging::init_logging;
use gpu_metrics::metrics::nvidia_smi::NvidiaSmi;
use gpu_metrics::scheduler::CollectionCycle;
use gpu_metrics::transport::MetricsClient;

/// Command-line options
struct Args {
    /// Config file overriding $GPU_METRICS_CONFIG and the default path
    config_path: Option<PathBuf>,

    /// Run a single cycle and exit
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("=== GPU Metrics Collector Starting ===");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = parse_arguments()?;

    let config = CollectorConfig::load(args.config_path.as_deref())
        .context("Failed to load collector configuration")?;
    let period = config.collect_interval();

    let client = MetricsClient::new(&config.metrics_url, &config.api_key)
        .context("Failed to build HTTP client")?;
    info!("Sending to: {}", client.metrics_url());

    let cycle = CollectionCycle::new(NvidiaSmi::new(), client, &config.instance_id);
    info!("Instance: {}", cycle.instance_id());
    info!("Collecting metrics every {}s", period.as_secs());

    if args.once {
        let count = cycle.run_once().await.context("Collection cycle failed")?;
        info!("Single cycle delivered {} GPU record(s)", count);
        return Ok(());
    }

    tokio::select! {
        _ = cycle.run_forever(period) => {
            error!("Collector loop stopped unexpectedly");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received, stopping collector");
        }
    }

    Ok(())
}

/// Parses command-line arguments
///
/// # Arguments
/// 1. --config <path> - Config file (optional)
/// 2. --once - Collect and send once, then exit (optional)
fn parse_arguments() -> Result<Args> {
    let args: Vec<String> = env::args().collect();

    let config_path = match args.iter().position(|arg| arg == "--config") {
        Some(pos) => Some(
            args.get(pos + 1)
                .map(PathBuf::from)
                .context("Missing value for --config <path>")?,
        ),
        None => None,
    };

    Ok(Args {
        config_path,
        once: args.iter().any(|arg| arg == "--once"),
    })
}
