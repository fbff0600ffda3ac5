// Batch persistence writer
//
// Turns a validated payload into `gpu_metrics` rows and hands them to the
// store as one atomic batch.
//
// # Narrowing
// Values are narrowed with plain `as` casts, which wrap on overflow
// (utilization 300 is stored as 44, index -1 as 255). Nothing upstream
// range-checks the tool's numbers, and rows are never rejected for range.
// Absent optional readings are stored as 0.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::metrics::GpuMetric;
use crate::storage::{GpuMetricRow, StorageError, TelemetryStore};

/// Builds one row per record, in payload order
pub fn to_rows(instance_id: &str, timestamp: DateTime<Utc>, gpus: &[GpuMetric]) -> Vec<GpuMetricRow> {
    gpus.iter()
        .map(|gpu| GpuMetricRow {
            timestamp,
            instance_id: instance_id.to_string(),
            gpu_index: gpu.index as u8,
            gpu_utilization_percent: gpu.utilization_percent as u8,
            gpu_memory_used_mb: gpu.memory_used_mb as u32,
            gpu_memory_total_mb: gpu.memory_total_mb as u32,
            temperature_celsius: gpu.temperature_celsius.unwrap_or_default() as u8,
            power_draw_watts: gpu.power_draw_watts.unwrap_or_default() as u16,
        })
        .collect()
}

/// Persists all records of one payload atomically.
///
/// # Returns
/// Number of rows committed (0 for an empty payload)
///
/// # Errors
/// Any store error aborts the whole batch; no partial rows are left behind.
pub async fn write_batch(
    store: &dyn TelemetryStore,
    instance_id: &str,
    timestamp: DateTime<Utc>,
    gpus: &[GpuMetric],
) -> Result<usize, StorageError> {
    let rows = to_rows(instance_id, timestamp, gpus);
    debug!("Writing batch of {} row(s) for {}", rows.len(), instance_id);
    store.insert_batch(rows).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::MemoryStore;
    use chrono::TimeZone;

    fn gpu(index: i64) -> GpuMetric {
        GpuMetric {
            index,
            utilization_percent: 45,
            memory_used_mb: 2048,
            memory_total_mb: 8192,
            temperature_celsius: Some(65),
            power_draw_watts: Some(120),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
    }

    #[test]
    fn test_rows_follow_payload_order() {
        let rows = to_rows("gpu-host-1", at(), &[gpu(2), gpu(0), gpu(1)]);

        let indexes: Vec<u8> = rows.iter().map(|r| r.gpu_index).collect();
        assert_eq!(indexes, vec![2, 0, 1]);
        assert!(rows.iter().all(|r| r.instance_id == "gpu-host-1" && r.timestamp == at()));
    }

    #[test]
    fn test_absent_readings_store_zero() {
        let mut record = gpu(0);
        record.temperature_celsius = None;
        record.power_draw_watts = None;

        let row = &to_rows("h", at(), &[record])[0];
        assert_eq!(row.temperature_celsius, 0);
        assert_eq!(row.power_draw_watts, 0);
    }

    #[test]
    fn test_out_of_range_values_wrap() {
        let record = GpuMetric {
            index: -1,
            utilization_percent: 300,
            memory_used_mb: 4_294_967_296 + 5,
            memory_total_mb: 8192,
            temperature_celsius: Some(256),
            power_draw_watts: Some(65_537),
        };

        let row = &to_rows("h", at(), &[record])[0];
        assert_eq!(row.gpu_index, 255);
        assert_eq!(row.gpu_utilization_percent, 44);
        assert_eq!(row.gpu_memory_used_mb, 5);
        assert_eq!(row.temperature_celsius, 0);
        assert_eq!(row.power_draw_watts, 1);
    }

    #[tokio::test]
    async fn test_write_commits_every_row() {
        let store = MemoryStore::new();

        let written = write_batch(&store, "h", at(), &[gpu(0), gpu(1), gpu(2)])
            .await
            .unwrap();

        assert_eq!(written, 3);
        assert_eq!(store.rows().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let store = MemoryStore::new();

        let written = write_batch(&store, "h", at(), &[]).await.unwrap();

        assert_eq!(written, 0);
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_failure_mid_batch_leaves_no_rows() {
        let store = MemoryStore::new();
        store.fail_at_row(2);

        let result = write_batch(&store, "h", at(), &[gpu(0), gpu(1), gpu(2), gpu(3)]).await;

        assert!(matches!(result, Err(StorageError::BatchAborted { .. })));
        assert!(store.rows().is_empty());
    }
}
