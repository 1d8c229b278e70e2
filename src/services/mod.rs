//! Business logic behind the HTTP handlers.
//!
//! - [`authorizer`] - multi-factor check of a log submission
//! - [`rate_limiter`] - per-plant minimum interval between measurements
//! - [`ingestion`] - authorize, rate-limit and append in one pipeline
//! - [`provisioner`] - plant lifecycle and credential issuance
//! - [`statistics`] - descriptive statistics over a partition slice
//! - [`credentials`] - identifier generation and secret hashing

pub mod authorizer;
pub mod credentials;
pub mod ingestion;
pub mod provisioner;
pub mod rate_limiter;
pub mod statistics;

pub use ingestion::IngestionService;
pub use provisioner::Provisioner;
pub use rate_limiter::{FirstMeasurementPolicy, RateLimitPolicy};
pub use statistics::StatisticsReport;
