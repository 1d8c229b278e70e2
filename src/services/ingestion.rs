use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::metrics::{self, outcome};
use crate::models::{LogEntryRequest, Measurement};
use crate::services::authorizer::{self, Submission};
use crate::services::rate_limiter::{self, RateLimitPolicy};
use crate::store::PlantStore;

/// Telemetry ingestion: authorize, rate-limit, append.
#[derive(Clone)]
pub struct IngestionService {
    store: Arc<dyn PlantStore>,
    policy: RateLimitPolicy,
}

impl IngestionService {
    pub fn new(store: Arc<dyn PlantStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Accept one log entry submitted to `url_id` from `source_ip`.
    pub async fn ingest(
        &self,
        url_id: &str,
        source_ip: &str,
        entry: &LogEntryRequest,
    ) -> AppResult<()> {
        self.ingest_at(url_id, source_ip, entry, Utc::now()).await
    }

    /// Same as [`ingest`](Self::ingest) with an explicit clock reading.
    #[instrument(skip(self, url_id, entry))]
    pub async fn ingest_at(
        &self,
        url_id: &str,
        source_ip: &str,
        entry: &LogEntryRequest,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let result = self.run(url_id, source_ip, entry, now).await;
        metrics::record_ingestion(match &result {
            Ok(()) => outcome::ACCEPTED,
            Err(AppError::NotFoundOrNoPermission(_) | AppError::Unauthorized(_)) => {
                outcome::REJECTED_AUTH
            }
            Err(AppError::RateLimited { .. }) => outcome::REJECTED_RATE,
            Err(_) => outcome::ERROR,
        });
        result
    }

    async fn run(
        &self,
        url_id: &str,
        source_ip: &str,
        entry: &LogEntryRequest,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        let submission = Submission {
            key: &entry.key,
            secret: &entry.secret,
            url_id,
            source_ip,
        };

        let authorized = authorizer::authorize(self.store.as_ref(), submission)
            .await
            .inspect_err(|e| {
                if let AppError::NotFoundOrNoPermission(reason) = e {
                    warn!(reason, "Ingestion denied");
                }
            })?;

        rate_limiter::check(
            self.store.as_ref(),
            &authorized.partition,
            authorized.interval_sec,
            self.policy,
            now,
        )
        .await?;

        self.store
            .append(&authorized.partition, &Measurement::from_entry(entry, now))
            .await?;

        info!(plant = %authorized.public_plant_id, "New log added");
        Ok(())
    }
}
