// Storage module - the server's view of the time-series store
//
// This module is responsible for:
// 1. Resolving a bearer credential to a provisioned instance (keyed lookup)
// 2. Committing a batch of GPU metric rows atomically
// 3. Answering health probes
//
// The ingestion path only talks to the `TelemetryStore` trait. `MongoStore`
// is the production implementation.

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Collection holding one document per provisioned host
pub const INSTANCES_COLLECTION: &str = "instances";

/// Collection holding one document per GPU per payload
pub const METRICS_COLLECTION: &str = "gpu_metrics";

/// Errors that can occur while talking to the store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("MongoDB operation failed: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("batch of {rows} row(s) aborted: {reason}")]
    BatchAborted { rows: usize, reason: String },

    #[error("store unreachable: {0}")]
    Unreachable(String),
}

/// One persisted row of the `gpu_metrics` collection.
///
/// Field widths mirror the analytical schema the rows feed:
/// `u8` for index/utilization/temperature, `u32` for memory, `u16` for power.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpuMetricRow {
    pub timestamp: DateTime<Utc>,
    pub instance_id: String,
    pub gpu_index: u8,
    pub gpu_utilization_percent: u8,
    pub gpu_memory_used_mb: u32,
    pub gpu_memory_total_mb: u32,
    pub temperature_celsius: u8,
    pub power_draw_watts: u16,
}

impl GpuMetricRow {
    /// Converts the row into the BSON document that is inserted
    ///
    /// # Document Structure
    /// ```json
    /// {
    ///   "timestamp": ISODate("2024-01-15T10:30:00Z"),
    ///   "instance_id": "gpu-host-1",
    ///   "gpu_index": 0,
    ///   "gpu_utilization_percent": 45,
    ///   "gpu_memory_used_mb": 2048,
    ///   "gpu_memory_total_mb": 8192,
    ///   "temperature_celsius": 65,
    ///   "power_draw_watts": 120
    /// }
    /// ```
    pub fn to_document(&self) -> Document {
        doc! {
            "timestamp": bson::DateTime::from_chrono(self.timestamp),
            "instance_id": self.instance_id.as_str(),
            "gpu_index": i32::from(self.gpu_index),
            "gpu_utilization_percent": i32::from(self.gpu_utilization_percent),
            "gpu_memory_used_mb": i64::from(self.gpu_memory_used_mb),
            "gpu_memory_total_mb": i64::from(self.gpu_memory_total_mb),
            "temperature_celsius": i32::from(self.temperature_celsius),
            "power_draw_watts": i32::from(self.power_draw_watts),
        }
    }
}

/// Capabilities the ingestion path needs from the store.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Keyed lookup: resolves an API key to the instance it belongs to.
    ///
    /// Only instances flagged as provisioned match. `Ok(None)` means the key
    /// is unknown or the instance is not provisioned.
    async fn find_provisioned_instance(&self, api_key: &str) -> Result<Option<String>, StorageError>;

    /// Commits all rows in one atomic batch.
    ///
    /// Either every row is stored or none is. An empty batch is a successful
    /// no-op.
    ///
    /// # Returns
    /// Number of rows committed
    async fn insert_batch(&self, rows: Vec<GpuMetricRow>) -> Result<usize, StorageError>;

    /// Checks that the store is reachable
    async fn ping(&self) -> Result<(), StorageError>;
}

/// Provisioning record as stored in the `instances` collection
#[derive(Debug, Deserialize)]
struct InstanceRecord {
    instance_id: String,
}

/// MongoDB-backed store
///
/// Atomic batches use a multi-document transaction, so the deployment must be
/// a replica set (a single-node replica set is enough).
pub struct MongoStore {
    client: Client,
    database_name: String,
}

impl MongoStore {
    /// Connects to MongoDB and verifies the connection with a ping
    ///
    /// # Arguments
    /// * `connection_string` - MongoDB connection URI (e.g., "mongodb://localhost:27017")
    /// * `database_name` - Database holding the `instances` and `gpu_metrics` collections
    pub async fn connect(connection_string: &str, database_name: &str) -> Result<Self, StorageError> {
        let client = Client::with_uri_str(connection_string).await?;
        let store = Self::new(&client, database_name);

        if let Err(e) = store.ping().await {
            warn!("MongoDB connection verification failed: {}", e);
            return Err(e);
        }
        info!("Successfully connected to MongoDB");

        Ok(store)
    }

    /// Wraps an existing client
    pub fn new(client: &Client, database_name: &str) -> Self {
        MongoStore {
            client: client.clone(),
            database_name: database_name.to_string(),
        }
    }

    fn database(&self) -> Database {
        self.client.database(&self.database_name)
    }

    fn metrics(&self) -> Collection<Document> {
        self.database().collection(METRICS_COLLECTION)
    }

    /// Creates the indexes the ingestion path relies on
    ///
    /// # Indexes
    /// - `instances.api_key` - backs the keyed lookup
    /// - `gpu_metrics.instance_id + timestamp` - time-series queries per host
    ///
    /// The metrics index is not unique: resends of the same payload are
    /// stored twice.
    pub async fn create_indexes(&self) -> Result<(), StorageError> {
        let instances: Collection<Document> = self.database().collection(INSTANCES_COLLECTION);
        let api_key_index = IndexModel::builder()
            .keys(doc! { "api_key": 1 })
            .options(IndexOptions::builder().name("api_key_idx".to_string()).build())
            .build();
        instances.create_index(api_key_index, None).await?;

        let series_index = IndexModel::builder()
            .keys(doc! {
                "instance_id": 1,
                "timestamp": -1
            })
            .options(
                IndexOptions::builder()
                    .name("instance_timestamp_idx".to_string())
                    .build(),
            )
            .build();
        self.metrics().create_index(series_index, None).await?;

        info!(
            "Created indexes on '{}' and '{}'",
            INSTANCES_COLLECTION, METRICS_COLLECTION
        );
        Ok(())
    }
}

#[async_trait]
impl TelemetryStore for MongoStore {
    async fn find_provisioned_instance(&self, api_key: &str) -> Result<Option<String>, StorageError> {
        let instances: Collection<InstanceRecord> = self.database().collection(INSTANCES_COLLECTION);

        // db.instances.findOne({ api_key: "<key>", is_provisioned: true })
        let filter = doc! { "api_key": api_key, "is_provisioned": true };
        let record = instances.find_one(filter, None).await?;

        Ok(record.map(|r| r.instance_id))
    }

    async fn insert_batch(&self, rows: Vec<GpuMetricRow>) -> Result<usize, StorageError> {
        let count = rows.len();
        if count == 0 {
            return Ok(0);
        }

        let documents: Vec<Document> = rows.iter().map(GpuMetricRow::to_document).collect();

        let mut session = self.client.start_session(None).await?;
        session.start_transaction(None).await?;

        let inserted = self
            .metrics()
            .insert_many_with_session(documents, None, &mut session)
            .await;

        let outcome = match inserted {
            Ok(_) => session.commit_transaction().await,
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            error!("Aborting batch of {} row(s): {}", count, e);
            if let Err(abort_err) = session.abort_transaction().await {
                debug!("Abort after failed batch also failed: {}", abort_err);
            }
            return Err(StorageError::BatchAborted {
                rows: count,
                reason: e.to_string(),
            });
        }

        debug!("Committed {} row(s) to '{}'", count, METRICS_COLLECTION);
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.database()
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Unreachable(e.to_string()))
    }
}
