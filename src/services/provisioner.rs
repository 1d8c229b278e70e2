//! Plant lifecycle: creation, credential issuance, logger settings, deletion.
//!
//! Creation and deletion are single store transactions. Index maintenance
//! runs after the commit on a tracked background task, retried with
//! exponential backoff, and never fails the request that triggered it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::{KeySecretResponse, LoggerConfig, Plant};
use crate::services::credentials;
use crate::store::{PlantStore, StoreError};
use crate::validation::{validate_interval, validate_ip_allow_list, validate_plant_name};

/// Interval applied to freshly created plants (15 minutes).
pub const DEFAULT_LOG_INTERVAL_SECS: u32 = 15 * 60;

/// Attempts made to create per-plant indexes after a plant was committed.
pub const INDEX_RETRY_ATTEMPTS: u32 = 3;

/// Attempts made when a randomly generated identifier collides.
const IDENTIFIER_ATTEMPTS: u32 = 3;

const INDEX_RETRY_BASE_DELAY: Duration = Duration::from_millis(200);
const INDEX_RETRY_JITTER_PERCENT: f64 = 0.2;

pub const NAME_TAKEN: &str = "Plant name already taken.";

/// Owner-facing plant operations.
#[derive(Clone)]
pub struct Provisioner {
    store: Arc<dyn PlantStore>,
    default_interval_sec: u32,
    task_tracker: TaskTracker,
    cancel: CancellationToken,
}

impl Provisioner {
    pub fn new(
        store: Arc<dyn PlantStore>,
        default_interval_sec: u32,
        task_tracker: TaskTracker,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            default_interval_sec,
            task_tracker,
            cancel,
        }
    }

    /// Ensure the system-wide unique indexes. Called once at startup.
    pub async fn bootstrap_indexes(&self) -> AppResult<()> {
        self.store.ensure_base_indexes().await?;
        info!(backend = self.store.backend(), "Base indexes ensured");
        Ok(())
    }

    /// Register a plant for `owner` together with its logger configuration
    /// and an empty partition.
    #[instrument(skip(self))]
    pub async fn create_plant(&self, owner: &str, name: &str) -> AppResult<Plant> {
        let name = validate_plant_name(name)?;

        if self.store.plant_name_exists(&name).await? {
            return Err(AppError::Conflict(NAME_TAKEN.to_string()));
        }

        let mut attempt = 0;
        let (plant, config) = loop {
            attempt += 1;
            let (plant, config) = self.new_records(owner, &name);

            match self.store.provision(&plant, &config).await {
                Ok(()) => break (plant, config),
                Err(StoreError::Duplicate { field: "name" }) => {
                    return Err(AppError::Conflict(NAME_TAKEN.to_string()));
                }
                // A generated identifier collided; draw new ones.
                Err(StoreError::Duplicate { field }) if attempt < IDENTIFIER_ATTEMPTS => {
                    warn!(field, attempt, "Generated identifier collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };

        metrics::record_plant_created();
        info!(plant = %plant.public_plant_id, partition = %config.partition, "Plant created");

        self.spawn_index_maintenance(config);
        Ok(plant)
    }

    /// Issue a fresh key/secret pair, replacing any previous one.
    ///
    /// The plaintext secret exists only in the returned value.
    #[instrument(skip(self))]
    pub async fn issue_credentials(
        &self,
        owner: &str,
        public_plant_id: &str,
    ) -> AppResult<KeySecretResponse> {
        let config = self.owned_config(owner, public_plant_id).await?;

        let secret = credentials::generate_secret();
        let secret_hash = credentials::hash_secret(&secret);

        let mut attempt = 0;
        let key = loop {
            attempt += 1;
            let key = credentials::generate_key();
            match self
                .store
                .set_credentials(public_plant_id, &key, &secret_hash)
                .await
            {
                Ok(true) => break key,
                Ok(false) => return Err(AppError::PlantNotFound(public_plant_id.to_string())),
                Err(StoreError::Duplicate { .. }) if attempt < IDENTIFIER_ATTEMPTS => {
                    warn!(attempt, "Generated key collided, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        };

        metrics::record_credentials_issued();
        info!(plant = public_plant_id, "Ingestion credentials issued");
        Ok(KeySecretResponse {
            key,
            secret,
            api_id: config.url_id,
        })
    }

    /// Update the logging interval and the source address allow-list.
    #[instrument(skip(self, ip_allow_list))]
    pub async fn set_logger_config(
        &self,
        owner: &str,
        public_plant_id: &str,
        interval_sec: i64,
        ip_allow_list: &[String],
    ) -> AppResult<()> {
        let interval_sec = validate_interval(interval_sec)?;
        let allow_list = validate_ip_allow_list(ip_allow_list)?;

        self.owned_config(owner, public_plant_id).await?;

        if !self
            .store
            .set_logger_settings(public_plant_id, interval_sec, &allow_list)
            .await?
        {
            return Err(AppError::PlantNotFound(public_plant_id.to_string()));
        }

        info!(
            plant = public_plant_id,
            interval_sec,
            allowed = allow_list.len(),
            "Logger configuration updated"
        );
        Ok(())
    }

    /// Remove the plant, its configuration and all of its measurements.
    #[instrument(skip(self))]
    pub async fn delete_plant(&self, owner: &str, public_plant_id: &str) -> AppResult<()> {
        self.owned_config(owner, public_plant_id).await?;

        if !self.store.decommission(public_plant_id).await? {
            return Err(AppError::PlantNotFound(public_plant_id.to_string()));
        }

        metrics::record_plant_deleted();
        info!(plant = public_plant_id, "Plant deleted");
        Ok(())
    }

    /// Resolve a plant's logger configuration, checking that `owner` owns it.
    ///
    /// An unknown plant is reported as not found; a plant owned by someone
    /// else is reported as forbidden.
    pub async fn owned_config(&self, owner: &str, public_plant_id: &str) -> AppResult<LoggerConfig> {
        let plant = self
            .store
            .find_plant(public_plant_id)
            .await?
            .ok_or_else(|| AppError::PlantNotFound(public_plant_id.to_string()))?;

        if plant.owner != owner {
            return Err(AppError::NotOwner(public_plant_id.to_string()));
        }

        self.store
            .find_config(public_plant_id)
            .await?
            .ok_or_else(|| AppError::PlantNotFound(public_plant_id.to_string()))
    }

    fn new_records(&self, owner: &str, name: &str) -> (Plant, LoggerConfig) {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let public_plant_id = credentials::generate_public_plant_id();

        let plant = Plant {
            id,
            public_plant_id: public_plant_id.clone(),
            name: name.to_string(),
            owner: owner.to_string(),
            created_at,
        };
        let config = LoggerConfig {
            id,
            public_plant_id,
            interval_sec: self.default_interval_sec,
            key: None,
            secret_hash: None,
            url_id: credentials::generate_url_id(),
            ip_allow_list: Vec::new(),
            partition: credentials::generate_partition_name(),
            created_at,
        };
        (plant, config)
    }

    fn spawn_index_maintenance(&self, config: LoggerConfig) {
        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();

        self.task_tracker.spawn(async move {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(partition = %config.partition, "Index maintenance cancelled");
                }
                _ = ensure_plant_indexes_with_retry(store.as_ref(), &config) => {}
            }
        });
    }
}

/// Create the per-plant indexes, retrying with exponential backoff.
///
/// Returns whether the indexes exist afterwards.
pub async fn ensure_plant_indexes_with_retry(store: &dyn PlantStore, config: &LoggerConfig) -> bool {
    for attempt in 1..=INDEX_RETRY_ATTEMPTS {
        match store.ensure_plant_indexes(config).await {
            Ok(()) => {
                debug!(partition = %config.partition, attempt, "Plant indexes ensured");
                return true;
            }
            Err(e) if attempt < INDEX_RETRY_ATTEMPTS => {
                let delay = backoff_delay(attempt);
                warn!(
                    partition = %config.partition,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Index creation failed, retrying"
                );
                metrics::record_index_retry();
                sleep(delay).await;
            }
            Err(e) => {
                error!(
                    partition = %config.partition,
                    attempts = INDEX_RETRY_ATTEMPTS,
                    error = %e,
                    "Index creation failed; plant remains usable without them"
                );
            }
        }
    }
    false
}

/// Exponential backoff with ±20% jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let base = INDEX_RETRY_BASE_DELAY.as_millis() as f64 * 2f64.powi(attempt.saturating_sub(1) as i32);
    let jitter = base * INDEX_RETRY_JITTER_PERCENT * (rand::random::<f64>() * 2.0 - 1.0);
    Duration::from_millis((base + jitter).max(0.0) as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::models::{Measurement, PartitionName};
    use crate::store::{CredentialStore, MemoryStore, PartitionStore, StoreResult};

    fn provisioner(store: MemoryStore) -> Provisioner {
        Provisioner::new(
            Arc::new(store),
            DEFAULT_LOG_INTERVAL_SECS,
            TaskTracker::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_create_plant_yields_matching_records() {
        let store = MemoryStore::new();
        let service = provisioner(store.clone());

        let plant = service.create_plant("alice", "  Roof array ").await.unwrap();
        assert_eq!(plant.name, "Roof array");
        assert_eq!(plant.public_plant_id.len(), credentials::PUBLIC_PLANT_ID_DIGITS);

        let config = store.find_config(&plant.public_plant_id).await.unwrap().unwrap();
        assert_eq!(config.id, plant.id);
        assert_eq!(config.interval_sec, DEFAULT_LOG_INTERVAL_SECS);
        assert!(config.key.is_none());
        assert!(config.secret_hash.is_none());
        assert!(config.ip_allow_list.is_empty());
        assert_eq!(config.url_id.len(), credentials::URL_ID_DIGITS);

        assert!(store.partition_exists(&config.partition).await.unwrap());
        let now = Utc::now();
        assert!(
            store
                .range(&config.partition, now - chrono::Duration::days(1), now)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let service = provisioner(MemoryStore::new());
        service.create_plant("alice", "Roof").await.unwrap();

        let err = service.create_plant("bob", "Roof").await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(msg) if msg == NAME_TAKEN));
    }

    #[tokio::test]
    async fn test_invalid_name_rejected() {
        let service = provisioner(MemoryStore::new());
        assert!(matches!(
            service.create_plant("alice", "   ").await.unwrap_err(),
            AppError::BadRequest(_)
        ));
        assert!(matches!(
            service.create_plant("alice", &"x".repeat(51)).await.unwrap_err(),
            AppError::BadRequest(_)
        ));
    }

    #[tokio::test]
    async fn test_ownership_checks() {
        let service = provisioner(MemoryStore::new());
        let plant = service.create_plant("alice", "Roof").await.unwrap();

        let err = service
            .issue_credentials("mallory", &plant.public_plant_id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotOwner(_)));

        let err = service
            .issue_credentials("alice", "000000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PlantNotFound(_)));
    }

    #[tokio::test]
    async fn test_issue_credentials_replaces_previous_pair() {
        let store = MemoryStore::new();
        let service = provisioner(store.clone());
        let plant = service.create_plant("alice", "Roof").await.unwrap();

        let first = service
            .issue_credentials("alice", &plant.public_plant_id)
            .await
            .unwrap();
        let second = service
            .issue_credentials("alice", &plant.public_plant_id)
            .await
            .unwrap();

        assert_eq!(first.key.len(), credentials::KEY_DIGITS);
        assert_eq!(second.secret.len(), credentials::SECRET_BYTES * 2);
        assert!(store.find_config_by_key(&first.key).await.unwrap().is_none());

        let config = store.find_config_by_key(&second.key).await.unwrap().unwrap();
        let stored_hash = config.secret_hash.unwrap();
        assert!(credentials::verify_secret(&second.secret, &stored_hash));
        assert!(!stored_hash.contains(&second.secret));
        assert_eq!(second.api_id, config.url_id);
    }

    #[tokio::test]
    async fn test_set_logger_config_canonicalizes_allow_list() {
        let store = MemoryStore::new();
        let service = provisioner(store.clone());
        let plant = service.create_plant("alice", "Roof").await.unwrap();

        service
            .set_logger_config(
                "alice",
                &plant.public_plant_id,
                600,
                &["2001:db8::1".into(), "10.0.0.1".into(), "2001:0DB8:0:0:0:0:0:1".into()],
            )
            .await
            .unwrap();

        let config = store.find_config(&plant.public_plant_id).await.unwrap().unwrap();
        assert_eq!(config.interval_sec, 600);
        assert_eq!(
            config.ip_allow_list,
            vec!["2001:0db8:0000:0000:0000:0000:0000:0001", "10.0.0.1"]
        );
    }

    #[tokio::test]
    async fn test_set_logger_config_rejects_invalid_input() {
        let service = provisioner(MemoryStore::new());
        let plant = service.create_plant("alice", "Roof").await.unwrap();
        let id = &plant.public_plant_id;

        for interval in [0, -5, 86_401] {
            let err = service.set_logger_config("alice", id, interval, &[]).await.unwrap_err();
            assert!(matches!(err, AppError::BadRequest(_)), "interval {interval}");
        }

        let err = service
            .set_logger_config("alice", id, 600, &["not-an-ip".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_delete_plant_removes_everything() {
        let store = MemoryStore::new();
        let service = provisioner(store.clone());
        let plant = service.create_plant("alice", "Roof").await.unwrap();
        let config = store.find_config(&plant.public_plant_id).await.unwrap().unwrap();

        assert!(matches!(
            service.delete_plant("bob", &plant.public_plant_id).await.unwrap_err(),
            AppError::NotOwner(_)
        ));
        service.delete_plant("alice", &plant.public_plant_id).await.unwrap();

        assert!(store.find_plant(&plant.public_plant_id).await.unwrap().is_none());
        assert!(!store.partition_exists(&config.partition).await.unwrap());
        assert!(matches!(
            service.owned_config("alice", &plant.public_plant_id).await.unwrap_err(),
            AppError::PlantNotFound(_)
        ));

        // The name becomes available again.
        service.create_plant("alice", "Roof").await.unwrap();
    }

    /// Memory store whose per-plant index creation fails a fixed number of times.
    struct FlakyIndexes {
        inner: MemoryStore,
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CredentialStore for FlakyIndexes {
        async fn plant_name_exists(&self, name: &str) -> StoreResult<bool> {
            self.inner.plant_name_exists(name).await
        }
        async fn find_plant(&self, id: &str) -> StoreResult<Option<Plant>> {
            self.inner.find_plant(id).await
        }
        async fn find_config(&self, id: &str) -> StoreResult<Option<LoggerConfig>> {
            self.inner.find_config(id).await
        }
        async fn find_config_by_key(&self, key: &str) -> StoreResult<Option<LoggerConfig>> {
            self.inner.find_config_by_key(key).await
        }
        async fn set_credentials(&self, id: &str, key: &str, hash: &str) -> StoreResult<bool> {
            self.inner.set_credentials(id, key, hash).await
        }
        async fn set_logger_settings(&self, id: &str, i: u32, ips: &[String]) -> StoreResult<bool> {
            self.inner.set_logger_settings(id, i, ips).await
        }
    }

    #[async_trait]
    impl PartitionStore for FlakyIndexes {
        async fn partition_exists(&self, p: &PartitionName) -> StoreResult<bool> {
            self.inner.partition_exists(p).await
        }
        async fn append(&self, p: &PartitionName, m: &Measurement) -> StoreResult<()> {
            self.inner.append(p, m).await
        }
        async fn latest(&self, p: &PartitionName) -> StoreResult<Option<Measurement>> {
            self.inner.latest(p).await
        }
        async fn range(
            &self,
            p: &PartitionName,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> StoreResult<Vec<Measurement>> {
            self.inner.range(p, start, end).await
        }
    }

    #[async_trait]
    impl PlantStore for FlakyIndexes {
        fn backend(&self) -> &'static str {
            "flaky"
        }
        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }
        async fn provision(&self, plant: &Plant, config: &LoggerConfig) -> StoreResult<()> {
            self.inner.provision(plant, config).await
        }
        async fn decommission(&self, id: &str) -> StoreResult<bool> {
            self.inner.decommission(id).await
        }
        async fn ensure_base_indexes(&self) -> StoreResult<()> {
            Ok(())
        }
        async fn ensure_plant_indexes(&self, config: &LoggerConfig) -> StoreResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(StoreError::PartitionMissing(config.partition.to_string()));
            }
            Ok(())
        }
    }

    fn flaky(failures: u32) -> FlakyIndexes {
        FlakyIndexes {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
        }
    }

    #[tokio::test]
    async fn test_index_creation_retries_until_success() {
        let store = flaky(2);
        let service = provisioner(MemoryStore::new());
        let (_, config) = service.new_records("alice", "Roof");

        assert!(ensure_plant_indexes_with_retry(&store, &config).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_index_creation_gives_up_after_limit() {
        let store = flaky(10);
        let service = provisioner(MemoryStore::new());
        let (_, config) = service.new_records("alice", "Roof");

        assert!(!ensure_plant_indexes_with_retry(&store, &config).await);
        assert_eq!(store.calls.load(Ordering::SeqCst), INDEX_RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_index_failure_does_not_fail_creation() {
        let store = Arc::new(flaky(10));
        let tracker = TaskTracker::new();
        let service = Provisioner::new(
            store.clone(),
            DEFAULT_LOG_INTERVAL_SECS,
            tracker.clone(),
            CancellationToken::new(),
        );

        let plant = service.create_plant("alice", "Roof").await.unwrap();
        tracker.close();
        tracker.wait().await;

        assert!(store.find_plant(&plant.public_plant_id).await.unwrap().is_some());
        assert_eq!(store.calls.load(Ordering::SeqCst), INDEX_RETRY_ATTEMPTS);
    }

    #[test]
    fn test_backoff_grows() {
        let first = backoff_delay(1).as_millis();
        let third = backoff_delay(3).as_millis();
        assert!((160..=240).contains(&first));
        assert!((640..=960).contains(&third));
    }
}
