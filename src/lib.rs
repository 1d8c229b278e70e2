//! # Plant Telemetry Backend
//!
//! HTTP backend for solar power plants: owners register plants and manage
//! logger credentials, field loggers submit measurements, and owners query
//! descriptive statistics over a date range.
//!
//! - **Ingestion**: key, secret, URL id and source address checked together,
//!   with a single uniform failure response
//! - **Rate limiting**: one measurement per configured interval, less a safety buffer
//! - **Partitions**: every plant owns one measurement partition, created and
//!   dropped in the same transaction as the plant record
//! - **Statistics**: mean, median, spread, skewness, quantiles, outliers and
//!   power/radiation correlation
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Middleware (Rate Limit → Request ID → Trace → CORS)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (plants, health) + OwnerIdentity / ClientIp       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Services (Provisioner, IngestionService, statistics)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TimedStore (per-call deadline)                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PostgresStore (table per plant) │ MemoryStore              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use plant_telemetry::store::{MemoryStore, TimedStore};
//! use plant_telemetry::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = TimedStore::new(MemoryStore::new(), config.operation_timeout);
//!
//!     let state = AppState::new(Arc::new(store), config);
//!     let app = build_router(state)?;
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```bash
//! AUTH_JWT_SECRET=... DATABASE_URL=postgres://localhost/plants cargo run
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
