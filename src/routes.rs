//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← X-Request-Id on request and response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │      CORS        │
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Catch Panic     │ ← generic 500 JSON
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Body Limit     │
//! └────────┬─────────┘
//!          ▼
//!      Handler (OwnerIdentity → 401 / ClientIp)
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/ready` - monitoring, no authentication
//! - `/plants/*` - owner endpoints (bearer token)
//! - `/plants/log/{apiID}` - logger ingestion (key, secret, URL id, source IP)

use std::any::Any;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::AppError;
use crate::handlers;
use crate::middleware::{RATE_LIMIT_PRUNE_INTERVAL, RateLimitError, RateLimitLayer, RequestIdLayer};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// - **Rate Limiting**: Enabled if `rate_limit_rps > 0`
/// - **CORS**: Configured from `cors_allowed_origins`
///
/// The server must be started with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the peer address
/// is available for ingestion and the rate limiter.
///
/// # Errors
///
/// Returns `RateLimitError` if rate limiting configuration is invalid.
pub fn build_router(state: AppState) -> Result<Router, RateLimitError> {
    let config = &state.config;

    let cors = build_cors_layer(&config.cors_allowed_origins);

    let mut router = Router::new()
        // Health and readiness
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        // Owner endpoints
        .route("/plants/add", post(handlers::add_plant))
        .route("/plants/keysecret", put(handlers::set_key_secret))
        .route("/plants/setconfig", put(handlers::set_config))
        .route("/plants/delete", delete(handlers::delete_plant))
        .route("/plants/statistics", get(handlers::get_statistics))
        // Logger ingestion
        .route("/plants/log/{api_id}", post(handlers::add_log_entry));

    // =========================================================================
    // Middleware (applied bottom to top)
    // =========================================================================
    router = router
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(RequestIdLayer::new());

    info!(
        max_body_bytes = config.max_request_body_size,
        "Request body size limit configured"
    );

    if config.rate_limiting_enabled() {
        info!(
            rps = config.rate_limit_rps,
            burst = config.rate_limit_burst,
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        let limiter = RateLimitLayer::new(
            config.rate_limit_rps,
            config.rate_limit_burst,
            Arc::clone(&state.trusted_proxies),
        )?;
        state.spawn_rate_limit_pruning(limiter.clone(), RATE_LIMIT_PRUNE_INTERVAL);
        router = router.layer(limiter);
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_RPS=0)");
    }

    if !config.proxy_validation_enabled() {
        warn!("TRUSTED_PROXIES not set; forwarding headers are accepted from every peer");
    }

    Ok(router.with_state(state))
}

/// Response for a panicking handler. The payload is logged, never returned.
fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("non-string panic payload");

    AppError::Internal(format!("handler panicked: {detail}")).into_response()
}

/// Build CORS layer from configuration.
///
/// `*` allows any origin; otherwise only the listed origins that parse as
/// header values are allowed.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    if allowed_origins.iter().any(|o| o == "*") {
        return layer.allow_origin(AnyOrigin);
    }

    let origins: Vec<_> = allowed_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();
    layer.allow_origin(origins)
}
