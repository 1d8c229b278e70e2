use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::metrics;
use crate::models::{LoggerConfig, Measurement, PartitionName, Plant};

use super::{CredentialStore, PartitionStore, PlantStore, StoreError, StoreResult};

/// Run a store operation with a deadline.
///
/// Elapsed time is recorded per operation. When the deadline passes the
/// inner future is dropped (cancelling the call) and `StoreError::Timeout`
/// is returned.
pub async fn bounded<T, F>(op: &'static str, timeout: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    let started = Instant::now();
    let outcome = tokio::time::timeout(timeout, fut).await;
    metrics::record_store_duration(op, started.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => result,
        Err(_) => {
            warn!(op, timeout_ms = timeout.as_millis() as u64, "Store operation exceeded deadline");
            metrics::record_store_timeout(op);
            Err(StoreError::Timeout { op, timeout })
        }
    }
}

/// Store decorator that puts a deadline on every call.
#[derive(Debug, Clone)]
pub struct TimedStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimedStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl<S: PlantStore> CredentialStore for TimedStore<S> {
    async fn plant_name_exists(&self, name: &str) -> StoreResult<bool> {
        bounded("plant_name_exists", self.timeout, self.inner.plant_name_exists(name)).await
    }

    async fn find_plant(&self, public_plant_id: &str) -> StoreResult<Option<Plant>> {
        bounded("find_plant", self.timeout, self.inner.find_plant(public_plant_id)).await
    }

    async fn find_config(&self, public_plant_id: &str) -> StoreResult<Option<LoggerConfig>> {
        bounded("find_config", self.timeout, self.inner.find_config(public_plant_id)).await
    }

    async fn find_config_by_key(&self, key: &str) -> StoreResult<Option<LoggerConfig>> {
        bounded("find_config_by_key", self.timeout, self.inner.find_config_by_key(key)).await
    }

    async fn set_credentials(
        &self,
        public_plant_id: &str,
        key: &str,
        secret_hash: &str,
    ) -> StoreResult<bool> {
        bounded(
            "set_credentials",
            self.timeout,
            self.inner.set_credentials(public_plant_id, key, secret_hash),
        )
        .await
    }

    async fn set_logger_settings(
        &self,
        public_plant_id: &str,
        interval_sec: u32,
        ip_allow_list: &[String],
    ) -> StoreResult<bool> {
        bounded(
            "set_logger_settings",
            self.timeout,
            self.inner
                .set_logger_settings(public_plant_id, interval_sec, ip_allow_list),
        )
        .await
    }
}

#[async_trait]
impl<S: PlantStore> PartitionStore for TimedStore<S> {
    async fn partition_exists(&self, partition: &PartitionName) -> StoreResult<bool> {
        bounded("partition_exists", self.timeout, self.inner.partition_exists(partition)).await
    }

    async fn append(
        &self,
        partition: &PartitionName,
        measurement: &Measurement,
    ) -> StoreResult<()> {
        bounded("append", self.timeout, self.inner.append(partition, measurement)).await
    }

    async fn latest(&self, partition: &PartitionName) -> StoreResult<Option<Measurement>> {
        bounded("latest", self.timeout, self.inner.latest(partition)).await
    }

    async fn range(
        &self,
        partition: &PartitionName,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Measurement>> {
        bounded("range", self.timeout, self.inner.range(partition, start, end)).await
    }
}

#[async_trait]
impl<S: PlantStore> PlantStore for TimedStore<S> {
    fn backend(&self) -> &'static str {
        self.inner.backend()
    }

    async fn ping(&self) -> StoreResult<()> {
        bounded("ping", self.timeout, self.inner.ping()).await
    }

    async fn provision(&self, plant: &Plant, config: &LoggerConfig) -> StoreResult<()> {
        bounded("provision", self.timeout, self.inner.provision(plant, config)).await
    }

    async fn decommission(&self, public_plant_id: &str) -> StoreResult<bool> {
        bounded("decommission", self.timeout, self.inner.decommission(public_plant_id)).await
    }

    async fn ensure_base_indexes(&self) -> StoreResult<()> {
        bounded("ensure_base_indexes", self.timeout, self.inner.ensure_base_indexes()).await
    }

    async fn ensure_plant_indexes(&self, config: &LoggerConfig) -> StoreResult<()> {
        bounded(
            "ensure_plant_indexes",
            self.timeout,
            self.inner.ensure_plant_indexes(config),
        )
        .await
    }
}
