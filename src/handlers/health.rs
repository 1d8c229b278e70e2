//! Health and readiness endpoints.
//!
//! - **Health** (`/health`): always 200, reports the last background store ping
//! - **Readiness** (`/ready`): pings the store now, 503 if it does not answer

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "store_backend": "postgres",
///   "store_reachable": true,
///   "version": "0.1.0",
///   "uptime_seconds": 3600,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_reachable = state.store_reachable();

    Json(HealthResponse {
        status: if store_reachable { "healthy" } else { "degraded" }.to_string(),
        store_backend: state.store.backend().to_string(),
        store_reachable,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

/// Readiness check for load balancers and Kubernetes probes.
///
/// ```yaml
/// readinessProbe:
///   httpGet:
///     path: /ready
///     port: 3000
///   periodSeconds: 10
/// ```
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if state.probe_store().await {
        Ok(StatusCode::OK)
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
