// Metrics module - the telemetry contract shared by the collector and the server
//
// This module defines:
// 1. The wire types exchanged between edge and center (`GpuMetric`, `MetricsPayload`)
// 2. The trait every GPU telemetry source implements
//
// Both binaries depend on these definitions, so the JSON shape only lives here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod nvidia_smi;
pub mod parser;

/// Unix seconds of `0001-01-01T00:00:00Z`, the instant written by collectors
/// that never set the timestamp.
const ZERO_INSTANT_UNIX_SECS: i64 = -62_135_596_800;

/// Errors that abort a collection cycle
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} produced non UTF-8 output")]
    InvalidOutput { program: String },
}

/// Snapshot of one accelerator.
///
/// Numeric ranges are not validated: values are carried exactly as the
/// monitoring tool reported them and are only narrowed when written to the
/// store.
///
/// # Wire Format
/// ```json
/// {
///   "gpu_index": 0,
///   "gpu_utilization_percent": 45,
///   "gpu_memory_used_mb": 2048,
///   "gpu_memory_total_mb": 8192,
///   "temperature_celsius": 65,
///   "power_draw_watts": 120
/// }
/// ```
/// The two optional readings are omitted when the tool did not report them.
/// On decode, a missing counter reads as `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuMetric {
    /// Device position in the tool's enumeration order
    #[serde(default, rename = "gpu_index")]
    pub index: i64,

    #[serde(default, rename = "gpu_utilization_percent")]
    pub utilization_percent: i64,

    #[serde(default, rename = "gpu_memory_used_mb")]
    pub memory_used_mb: i64,

    #[serde(default, rename = "gpu_memory_total_mb")]
    pub memory_total_mb: i64,

    /// `None` when the tool printed `N/A` or nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_celsius: Option<i64>,

    /// Whole watts, truncated toward zero from the tool's decimal reading
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_draw_watts: Option<i64>,
}

/// One collection cycle's result, as sent to `POST /metrics`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsPayload {
    /// Host identity assigned at provisioning time. Missing decodes as empty,
    /// which never matches an authenticated instance.
    #[serde(default)]
    pub instance_id: String,

    /// Send time; `None` or the zero instant means "let the server decide"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Devices in tool order. May be empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub gpus: Vec<GpuMetric>,
}

impl MetricsPayload {
    /// Creates a payload stamped with the current UTC time
    pub fn new(instance_id: impl Into<String>, gpus: Vec<GpuMetric>) -> Self {
        MetricsPayload {
            instance_id: instance_id.into(),
            timestamp: Some(Utc::now()),
            gpus,
        }
    }

    /// Returns the timestamp to persist, substituting `now` for a zero value
    pub fn timestamp_or(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.timestamp {
            Some(ts) if !is_zero_instant(&ts) => ts,
            _ => now,
        }
    }
}

fn is_zero_instant(ts: &DateTime<Utc>) -> bool {
    ts.timestamp() == ZERO_INSTANT_UNIX_SECS && ts.timestamp_subsec_nanos() == 0
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<GpuMetric>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<GpuMetric>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Source of raw GPU telemetry.
///
/// Implementations run the external monitoring tool once per call and hand
/// back its complete text output. Parsing is done by [`parser::parse_output`],
/// so a source never needs to understand the table format.
#[async_trait]
pub trait GpuSource: Send + Sync {
    /// Human-readable name used in log lines
    fn name(&self) -> &str;

    /// Invokes the tool and returns its stdout
    ///
    /// # Errors
    /// Any failure here (tool missing, nonzero exit, unreadable output) is
    /// fatal for the current cycle only.
    async fn query(&self) -> Result<String, CollectError>;
}
