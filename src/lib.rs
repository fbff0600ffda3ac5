// GPU Metrics - accelerator telemetry pipeline
//
// Two roles share this crate:
// - the collector, which runs on every GPU host, parses `nvidia-smi` output
//   and POSTs one payload per interval to the central service
// - the ingestion server, which authenticates hosts by bearer token and
//   writes each payload to MongoDB as one atomic batch
//
// The wire contract (`metrics::MetricsPayload`) is defined once here and used
// by both sides.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod transport;
