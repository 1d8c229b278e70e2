use axum::extract::rejection::JsonRejection;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Message shared by every ingestion authorization failure.
///
/// Unknown key, wrong URL id, wrong secret, a source IP outside the
/// allow-list and a missing first measurement all surface with exactly this
/// text and status so that callers cannot tell which factor was wrong.
pub const NOT_FOUND_OR_NO_PERMISSION: &str = "Requested plant not found or no permission.";

/// Message returned when a plant id does not resolve to any plant.
pub const PLANT_NOT_FOUND: &str = "Requested plant not found.";

/// Message returned when an authenticated caller does not own the plant.
pub const NOT_OWNER: &str = "You don't own any plant with your provided ID.";

/// Generic body for malformed input and internal failures.
pub const INTERNAL_MESSAGE: &str =
    "Access currently not possible due to an internal update. Please try again later.";

/// Application-wide error types with appropriate HTTP status codes.
///
/// # Taxonomy
///
/// - `MalformedInput` - missing, extra or mistyped fields; always a generic 500
/// - `NotFoundOrNoPermission` - uniform ingestion authorization failure (400)
/// - `NotOwner` - authenticated caller is not the plant owner (403)
/// - `RateLimited` - measurement arrived before the configured interval elapsed
/// - `TooManyRequests` - HTTP request quota for the client address exhausted (429)
/// - `Store` / `OperationTimeout` - storage trouble, reported as 503 "retry later"
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// The payload is the internal reason, which is logged but never returned.
    #[error("Ingestion denied: {0}")]
    NotFoundOrNoPermission(&'static str),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Caller does not own plant {0}")]
    NotOwner(String),

    #[error("Plant not found: {0}")]
    PlantNotFound(String),

    #[error("Minimum logging interval of {interval_sec}s has not elapsed")]
    RateLimited { interval_sec: u32 },

    /// HTTP-level throttling, independent of the logging interval.
    #[error("Request quota exceeded; retry in {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store operation failed: {0}")]
    Store(StoreError),

    #[error("Operation timed out: {0}")]
    OperationTimeout(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Rejected owner request bodies become a 400 with a sanitized message.
///
/// The ingestion endpoint does not use this conversion; it reports
/// malformed bodies as [`AppError::MalformedInput`].
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match &rejection {
            JsonRejection::MissingJsonContentType(_) => {
                "Expected request with `Content-Type: application/json`".to_string()
            }
            JsonRejection::JsonSyntaxError(_) => "Malformed JSON in request body".to_string(),
            JsonRejection::JsonDataError(_) => sanitize_serde_message(&rejection.body_text()),
            _ => "Invalid request format".to_string(),
        };
        AppError::BadRequest(message)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Timeout { op, timeout } => {
                AppError::OperationTimeout(format!("{op} exceeded {timeout:?}"))
            }
            other => AppError::Store(other),
        }
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Full detail stays in the logs; clients only get the sanitized message.
        let (status, error_type, message): (StatusCode, &str, String) = match &self {
            AppError::MalformedInput(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                INTERNAL_MESSAGE.to_string(),
            ),
            AppError::NotFoundOrNoPermission(_) => (
                StatusCode::BAD_REQUEST,
                "bad_request",
                NOT_FOUND_OR_NO_PERMISSION.to_string(),
            ),
            AppError::Unauthorized(_) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication required.".to_string(),
            ),
            AppError::NotOwner(_) => (StatusCode::FORBIDDEN, "forbidden", NOT_OWNER.to_string()),
            AppError::PlantNotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found", PLANT_NOT_FOUND.to_string())
            }
            AppError::RateLimited { interval_sec } => (
                StatusCode::BAD_REQUEST,
                "rate_limited",
                format!(
                    "No permission to save new log. Minimum time difference between logs in seconds: {interval_sec}"
                ),
            ),
            AppError::TooManyRequests { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                "Rate limit exceeded. Please retry later.".to_string(),
            ),
            AppError::BadRequest(msg) | AppError::Conflict(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", msg.clone())
            }

            // Storage availability - the caller may retry
            AppError::Store(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "Service temporarily unavailable. Please try again later.".to_string(),
            ),
            AppError::OperationTimeout(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "timeout",
                "Operation timed out. Please try again.".to_string(),
            ),

            AppError::SerializationError(e) => (
                StatusCode::BAD_REQUEST,
                "serialization_error",
                sanitize_serde_error(e),
            ),
            AppError::Internal(_) | AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                INTERNAL_MESSAGE.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            details: None, // Never expose internal details to clients
        };

        let mut response = (status, axum::Json(body)).into_response();
        if let AppError::TooManyRequests { retry_after_secs } = self {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Sanitize serde error messages to avoid leaking internal type information.
///
/// Serde errors can contain internal struct/field names which shouldn't be
/// exposed to external clients. This function extracts the useful parts.
pub(crate) fn sanitize_serde_error(e: &serde_json::Error) -> String {
    sanitize_serde_message(&e.to_string())
}

fn sanitize_serde_message(msg: &str) -> String {
    if msg.contains("missing field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Missing required field: {field}");
    }

    if msg.contains("unknown field")
        && let Some(start) = msg.find('`')
        && let Some(end) = msg[start + 1..].find('`')
    {
        let field = &msg[start + 1..start + 1 + end];
        return format!("Unknown field: {field}");
    }

    if msg.contains("invalid type") {
        return "Invalid data type in request body".to_string();
    }

    if msg.contains("EOF while parsing") || msg.contains("expected") {
        return "Malformed JSON in request body".to_string();
    }

    "Invalid request format".to_string()
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
