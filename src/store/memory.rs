use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::models::{LoggerConfig, Measurement, PartitionName, Plant};

use super::{CredentialStore, PartitionStore, PlantStore, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by public plant id
    plants: HashMap<String, Plant>,
    /// Keyed by public plant id
    configs: HashMap<String, LoggerConfig>,
    partitions: HashMap<PartitionName, Vec<Measurement>>,
}

/// In-memory store used by tests and local development.
///
/// A single `RwLock` guards all collections, so every multi-record write
/// happens inside one critical section and is trivially atomic. Uniqueness is
/// always enforced; the index methods are no-ops.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of plants currently stored.
    pub async fn plant_count(&self) -> usize {
        self.inner.read().await.plants.len()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn plant_name_exists(&self, name: &str) -> StoreResult<bool> {
        let inner = self.inner.read().await;
        Ok(inner.plants.values().any(|p| p.name == name))
    }

    async fn find_plant(&self, public_plant_id: &str) -> StoreResult<Option<Plant>> {
        let inner = self.inner.read().await;
        Ok(inner.plants.get(public_plant_id).cloned())
    }

    async fn find_config(&self, public_plant_id: &str) -> StoreResult<Option<LoggerConfig>> {
        let inner = self.inner.read().await;
        Ok(inner.configs.get(public_plant_id).cloned())
    }

    async fn find_config_by_key(&self, key: &str) -> StoreResult<Option<LoggerConfig>> {
        let inner = self.inner.read().await;
        Ok(inner
            .configs
            .values()
            .find(|c| c.key.as_deref() == Some(key))
            .cloned())
    }

    async fn set_credentials(
        &self,
        public_plant_id: &str,
        key: &str,
        secret_hash: &str,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let key_taken = inner
            .configs
            .values()
            .any(|c| c.public_plant_id != public_plant_id && c.key.as_deref() == Some(key));
        if key_taken {
            return Err(StoreError::Duplicate { field: "key" });
        }

        match inner.configs.get_mut(public_plant_id) {
            Some(config) => {
                config.key = Some(key.to_string());
                config.secret_hash = Some(secret_hash.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_logger_settings(
        &self,
        public_plant_id: &str,
        interval_sec: u32,
        ip_allow_list: &[String],
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.configs.get_mut(public_plant_id) {
            Some(config) => {
                config.interval_sec = interval_sec;
                config.ip_allow_list = ip_allow_list.to_vec();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl PartitionStore for MemoryStore {
    async fn partition_exists(&self, partition: &PartitionName) -> StoreResult<bool> {
        Ok(self.inner.read().await.partitions.contains_key(partition))
    }

    async fn append(
        &self,
        partition: &PartitionName,
        measurement: &Measurement,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let records = inner
            .partitions
            .get_mut(partition)
            .ok_or_else(|| StoreError::PartitionMissing(partition.to_string()))?;
        records.push(measurement.clone());
        Ok(())
    }

    async fn latest(&self, partition: &PartitionName) -> StoreResult<Option<Measurement>> {
        let inner = self.inner.read().await;
        let records = inner
            .partitions
            .get(partition)
            .ok_or_else(|| StoreError::PartitionMissing(partition.to_string()))?;
        Ok(records.iter().max_by_key(|m| m.created_at).cloned())
    }

    async fn range(
        &self,
        partition: &PartitionName,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Measurement>> {
        let inner = self.inner.read().await;
        let records = inner
            .partitions
            .get(partition)
            .ok_or_else(|| StoreError::PartitionMissing(partition.to_string()))?;

        let mut selected: Vec<Measurement> = records
            .iter()
            .filter(|m| m.created_at >= start && m.created_at < end)
            .cloned()
            .collect();
        selected.sort_by_key(|m| m.created_at);
        Ok(selected)
    }
}

#[async_trait]
impl PlantStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn provision(&self, plant: &Plant, config: &LoggerConfig) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        // Check every constraint before touching anything.
        if inner.plants.values().any(|p| p.name == plant.name) {
            return Err(StoreError::Duplicate { field: "name" });
        }
        if inner.plants.contains_key(&plant.public_plant_id) {
            return Err(StoreError::Duplicate {
                field: "public_plant_id",
            });
        }
        if inner.partitions.contains_key(&config.partition) {
            return Err(StoreError::Duplicate {
                field: "partition",
            });
        }

        inner
            .plants
            .insert(plant.public_plant_id.clone(), plant.clone());
        inner
            .configs
            .insert(config.public_plant_id.clone(), config.clone());
        inner.partitions.insert(config.partition.clone(), Vec::new());
        Ok(())
    }

    async fn decommission(&self, public_plant_id: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(config) = inner.configs.remove(public_plant_id) else {
            return Ok(false);
        };
        inner.plants.remove(public_plant_id);
        inner.partitions.remove(&config.partition);
        Ok(true)
    }

    async fn ensure_base_indexes(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn ensure_plant_indexes(&self, _config: &LoggerConfig) -> StoreResult<()> {
        Ok(())
    }
}
