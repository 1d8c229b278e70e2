//! Storage abstraction for plants, logger configurations and measurement partitions.
//!
//! The services only talk to these traits, so the backing mechanism can be
//! swapped without touching the authorizer or the statistics engine:
//!
//! - [`MemoryStore`] - in-process fake used by tests and local development
//! - [`PostgresStore`] - one table per plant partition
//! - [`TimedStore`] - decorator bounding every call with a deadline
//!
//! # Atomicity
//!
//! [`PlantStore::provision`] and [`PlantStore::decommission`] are the only
//! multi-record writes. Implementations must apply them as a single unit:
//! either the plant, its logger configuration and its partition all exist
//! afterwards, or none of them do. Index maintenance is kept
//! out of that unit and may be retried on its own.

mod memory;
mod postgres;
mod timed;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use timed::{TimedStore, bounded};

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{LoggerConfig, Measurement, PartitionName, Plant};

/// Errors raised by storage backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{op} exceeded its deadline of {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("duplicate value for unique field {field}")]
    Duplicate { field: &'static str },

    #[error("partition {0} does not exist")]
    PartitionMissing(String),

    /// `filter` describes the rows the statement addressed, with credentials redacted.
    #[error("{op} failed on {target} ({filter}): {source}")]
    Database {
        op: &'static str,
        target: String,
        filter: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("corrupt record in {target}: {detail}")]
    Corrupt { target: String, detail: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Plant and logger configuration records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Whether any plant already uses this display name.
    async fn plant_name_exists(&self, name: &str) -> StoreResult<bool>;

    async fn find_plant(&self, public_plant_id: &str) -> StoreResult<Option<Plant>>;

    async fn find_config(&self, public_plant_id: &str) -> StoreResult<Option<LoggerConfig>>;

    /// Look up a logger configuration by its ingestion key.
    async fn find_config_by_key(&self, key: &str) -> StoreResult<Option<LoggerConfig>>;

    /// Overwrite the key and secret hash. Returns `false` if the plant is unknown.
    async fn set_credentials(
        &self,
        public_plant_id: &str,
        key: &str,
        secret_hash: &str,
    ) -> StoreResult<bool>;

    /// Overwrite interval and allow-list. Returns `false` if the plant is unknown.
    async fn set_logger_settings(
        &self,
        public_plant_id: &str,
        interval_sec: u32,
        ip_allow_list: &[String],
    ) -> StoreResult<bool>;
}

/// Per-plant measurement partitions.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    async fn partition_exists(&self, partition: &PartitionName) -> StoreResult<bool>;

    async fn append(&self, partition: &PartitionName, measurement: &Measurement)
    -> StoreResult<()>;

    /// The most recently created measurement, if any.
    async fn latest(&self, partition: &PartitionName) -> StoreResult<Option<Measurement>>;

    /// Measurements with `start <= created_at < end`, oldest first.
    async fn range(
        &self,
        partition: &PartitionName,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Measurement>>;
}

/// Full storage backend including the transactional lifecycle operations.
#[async_trait]
pub trait PlantStore: CredentialStore + PartitionStore {
    /// Short backend name for health output.
    fn backend(&self) -> &'static str;

    /// Cheap liveness probe.
    async fn ping(&self) -> StoreResult<()>;

    /// Insert the plant, its configuration and create its partition atomically.
    async fn provision(&self, plant: &Plant, config: &LoggerConfig) -> StoreResult<()>;

    /// Delete the configuration, the plant and drop its partition atomically.
    ///
    /// Returns `false` when no plant with this public id exists.
    async fn decommission(&self, public_plant_id: &str) -> StoreResult<bool>;

    /// Unique constraints on plant name and partition name.
    async fn ensure_base_indexes(&self) -> StoreResult<()>;

    /// Unique constraint on the public id and the partition's time index.
    async fn ensure_plant_indexes(&self, config: &LoggerConfig) -> StoreResult<()>;
}
