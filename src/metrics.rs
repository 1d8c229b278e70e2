//! Prometheus metrics for the telemetry backend.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//!
//! # Available Metrics
//!
//! ## Counters
//! - `plant_telemetry_ingestion_total` - Log submissions by outcome
//!   (`accepted`, `rejected_auth`, `rejected_rate`, `malformed`, `error`)
//! - `plant_telemetry_plants_created_total` - Plants provisioned
//! - `plant_telemetry_plants_deleted_total` - Plants decommissioned
//! - `plant_telemetry_credentials_issued_total` - Key/secret pairs issued
//! - `plant_telemetry_index_retries_total` - Index creation retries after commit
//! - `plant_telemetry_store_timeouts_total` - Store calls that hit their deadline (label: op)
//!
//! ## Histograms
//! - `plant_telemetry_store_duration_seconds` - Store call latency (label: op)
//! - `plant_telemetry_statistics_duration_seconds` - Statistics computation time
//! - `plant_telemetry_statistics_sample_size` - Measurements per statistics request
//!
//! ## Gauges
//! - `plant_telemetry_store_reachable` - Last store ping result (1 = ok, 0 = failing)

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const INGESTION_TOTAL: &str = "plant_telemetry_ingestion_total";
    pub const PLANTS_CREATED_TOTAL: &str = "plant_telemetry_plants_created_total";
    pub const PLANTS_DELETED_TOTAL: &str = "plant_telemetry_plants_deleted_total";
    pub const CREDENTIALS_ISSUED_TOTAL: &str = "plant_telemetry_credentials_issued_total";
    pub const INDEX_RETRIES_TOTAL: &str = "plant_telemetry_index_retries_total";
    pub const STORE_TIMEOUTS_TOTAL: &str = "plant_telemetry_store_timeouts_total";
    pub const STORE_DURATION_SECONDS: &str = "plant_telemetry_store_duration_seconds";
    pub const STATISTICS_DURATION_SECONDS: &str = "plant_telemetry_statistics_duration_seconds";
    pub const STATISTICS_SAMPLE_SIZE: &str = "plant_telemetry_statistics_sample_size";
    pub const STORE_REACHABLE: &str = "plant_telemetry_store_reachable";
}

/// Outcome labels for [`record_ingestion`].
pub mod outcome {
    pub const ACCEPTED: &str = "accepted";
    pub const REJECTED_AUTH: &str = "rejected_auth";
    pub const REJECTED_RATE: &str = "rejected_rate";
    pub const MALFORMED: &str = "malformed";
    pub const ERROR: &str = "error";
}

/// Install the Prometheus exporter and describe every metric.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::INGESTION_TOTAL,
        "Telemetry submissions by outcome"
    );
    describe_counter!(names::PLANTS_CREATED_TOTAL, "Plants provisioned");
    describe_counter!(names::PLANTS_DELETED_TOTAL, "Plants decommissioned");
    describe_counter!(
        names::CREDENTIALS_ISSUED_TOTAL,
        "Ingestion key/secret pairs issued"
    );
    describe_counter!(
        names::INDEX_RETRIES_TOTAL,
        "Index creation attempts retried after a plant was committed"
    );
    describe_counter!(
        names::STORE_TIMEOUTS_TOTAL,
        "Store operations that exceeded their deadline"
    );

    describe_histogram!(
        names::STORE_DURATION_SECONDS,
        "Store operation duration in seconds"
    );
    describe_histogram!(
        names::STATISTICS_DURATION_SECONDS,
        "Statistics computation duration in seconds"
    );
    describe_histogram!(
        names::STATISTICS_SAMPLE_SIZE,
        "Number of measurements summarized per statistics request"
    );

    describe_gauge!(
        names::STORE_REACHABLE,
        "Store reachability (1 = reachable, 0 = unreachable)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

/// Record the outcome of one log submission.
pub fn record_ingestion(outcome: &'static str) {
    counter!(names::INGESTION_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_plant_created() {
    counter!(names::PLANTS_CREATED_TOTAL).increment(1);
}

pub fn record_plant_deleted() {
    counter!(names::PLANTS_DELETED_TOTAL).increment(1);
}

pub fn record_credentials_issued() {
    counter!(names::CREDENTIALS_ISSUED_TOTAL).increment(1);
}

pub fn record_index_retry() {
    counter!(names::INDEX_RETRIES_TOTAL).increment(1);
}

/// Record a store call that hit its deadline.
pub fn record_store_timeout(op: &'static str) {
    counter!(names::STORE_TIMEOUTS_TOTAL, "op" => op).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record the latency of one store call.
pub fn record_store_duration(op: &'static str, duration_secs: f64) {
    histogram!(names::STORE_DURATION_SECONDS, "op" => op).record(duration_secs);
}

/// Record how long a statistics request took and how many samples it covered.
pub fn record_statistics(duration_secs: f64, sample_size: usize) {
    histogram!(names::STATISTICS_DURATION_SECONDS).record(duration_secs);
    histogram!(names::STATISTICS_SAMPLE_SIZE).record(sample_size as f64);
}

// =============================================================================
// Gauge Recording Functions
// =============================================================================

pub fn set_store_reachable(reachable: bool) {
    gauge!(names::STORE_REACHABLE).set(if reachable { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    // Recording without an installed exporter must be a no-op.

    #[test]
    fn test_record_ingestion_outcomes() {
        for label in [
            outcome::ACCEPTED,
            outcome::REJECTED_AUTH,
            outcome::REJECTED_RATE,
            outcome::MALFORMED,
            outcome::ERROR,
        ] {
            record_ingestion(label);
        }
    }

    #[test]
    fn test_record_store_metrics() {
        record_store_duration("latest", 0.002);
        record_store_timeout("latest");
    }

    #[test]
    fn test_record_statistics() {
        record_statistics(0.01, 0);
        record_statistics(0.2, 1440);
    }

    #[test]
    fn test_set_store_reachable() {
        set_store_reachable(true);
        set_store_reachable(false);
    }
}
