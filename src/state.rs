//! Shared application state for Axum handlers.
//!
//! - **Store**: the storage backend behind `Arc<dyn PlantStore>`
//! - **Services**: provisioner (owner operations) and ingestion pipeline
//! - **Security**: owner token verifier and trusted proxy ranges
//! - **Store health**: result of the last background ping
//!
//! # Structured Concurrency
//!
//! Background tasks (store pings, per-plant index maintenance, rate limiter
//! pruning) are tracked by
//! a `TaskTracker` and stopped through a `CancellationToken`. Call
//! `shutdown()` to stop them before application exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::metrics;
use crate::middleware::{OwnerAuth, RateLimitLayer, TrustedProxies};
use crate::services::{IngestionService, Provisioner};
use crate::store::PlantStore;

/// Shared application state for Axum handlers.
///
/// Cloned per request; everything inside is behind an `Arc` or is a cheap handle.
///
/// ```rust,ignore
/// let state = AppState::new(store, config);
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PlantStore>,
    pub provisioner: Provisioner,
    pub ingestion: IngestionService,
    pub owner_auth: Arc<OwnerAuth>,
    pub trusted_proxies: Arc<TrustedProxies>,
    pub config: Arc<Config>,
    /// Timestamp when the application started
    pub started_at: Instant,
    store_reachable: Arc<AtomicBool>,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build the state and start the store health check task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(store: Arc<dyn PlantStore>, config: Config) -> Self {
        let task_tracker = TaskTracker::new();
        let cancellation_token = CancellationToken::new();

        let provisioner = Provisioner::new(
            Arc::clone(&store),
            config.default_log_interval_secs,
            task_tracker.clone(),
            cancellation_token.clone(),
        );
        let ingestion = IngestionService::new(Arc::clone(&store), config.rate_limit_policy());

        let state = Self {
            store,
            provisioner,
            ingestion,
            owner_auth: Arc::new(OwnerAuth::new(&config.auth)),
            trusted_proxies: Arc::new(TrustedProxies::from_config(&config.trusted_proxies)),
            config: Arc::new(config),
            started_at: Instant::now(),
            store_reachable: Arc::new(AtomicBool::new(false)),
            task_tracker,
            cancellation_token,
        };

        state.spawn_health_check_task();

        state
    }

    /// Result of the most recent store ping.
    pub fn store_reachable(&self) -> bool {
        self.store_reachable.load(Ordering::Relaxed)
    }

    /// Ping the store now and record the result.
    pub async fn probe_store(&self) -> bool {
        probe(self.store.as_ref(), &self.store_reachable).await
    }

    /// Periodically ping the store so `/health` and the gauge reflect
    /// outages before user requests fail. The first ping runs immediately.
    fn spawn_health_check_task(&self) {
        let store = Arc::clone(&self.store);
        let reachable = Arc::clone(&self.store_reachable);
        let period = self.config.health_check_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Health check task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        probe(store.as_ref(), &reachable).await;
                    }
                }
            }

            debug!("Health check task shutting down");
        });
    }

    /// Periodically drop idle client buckets from the HTTP rate limiter.
    /// The first pass runs one `period` after startup.
    pub fn spawn_rate_limit_pruning(&self, limiter: RateLimitLayer, period: Duration) {
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limiter pruning task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let before = limiter.tracked_clients();
                        limiter.prune();
                        trace!(before, after = limiter.tracked_clients(), "Pruned rate limiter buckets");
                    }
                }
            }

            debug!("Rate limiter pruning task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

async fn probe(store: &dyn PlantStore, reachable: &AtomicBool) -> bool {
    let ok = match store.ping().await {
        Ok(()) => {
            trace!(backend = store.backend(), "Health check: store OK");
            true
        }
        Err(e) => {
            warn!(backend = store.backend(), error = %e, "Health check: store unreachable");
            false
        }
    };

    let was = reachable.swap(ok, Ordering::Relaxed);
    if was != ok && ok {
        info!(backend = store.backend(), "Store reachable");
    }
    metrics::set_store_reachable(ok);
    ok
}
