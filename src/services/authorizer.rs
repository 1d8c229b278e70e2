//! Ingestion authorization.
//!
//! A submission passes only if every factor matches, checked in this order:
//!
//! ```text
//! source IP parses ──► key known ──► url id equal ──► secret verifies ──► IP allowed
//!        │                 │               │                 │                │
//!     401 Unauthorized     └───────────────┴──── uniform 400 ┴────────────────┘
//! ```
//!
//! Every denial after the IP parse collapses into the same
//! [`AppError::NotFoundOrNoPermission`]; the concrete [`Denial`] only reaches
//! the logs.

use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};
use crate::models::PartitionName;
use crate::services::credentials::verify_secret;
use crate::store::CredentialStore;
use crate::validation::normalize_ip;

/// The credential factors of one log submission.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub key: &'a str,
    pub secret: &'a str,
    /// Identifier taken from the request path
    pub url_id: &'a str,
    /// Source address as observed by the HTTP layer
    pub source_ip: &'a str,
}

/// What the rate limiter needs to know about an authorized submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorized {
    pub public_plant_id: String,
    pub partition: PartitionName,
    pub interval_sec: u32,
}

/// Internal reason a submission was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    UnknownKey,
    UrlIdMismatch,
    SecretMismatch,
    IpNotAllowed,
}

impl Denial {
    pub fn as_str(&self) -> &'static str {
        match self {
            Denial::UnknownKey => "unknown key",
            Denial::UrlIdMismatch => "url id mismatch",
            Denial::SecretMismatch => "secret mismatch",
            Denial::IpNotAllowed => "source ip not allowed",
        }
    }
}

impl From<Denial> for AppError {
    fn from(denial: Denial) -> Self {
        AppError::NotFoundOrNoPermission(denial.as_str())
    }
}

/// Authorize a submission against the stored logger configuration.
#[instrument(skip_all)]
pub async fn authorize<S>(store: &S, submission: Submission<'_>) -> AppResult<Authorized>
where
    S: CredentialStore + ?Sized,
{
    let source_ip = normalize_ip(submission.source_ip).ok_or_else(|| {
        AppError::Unauthorized(format!("unparseable source address {}", submission.source_ip))
    })?;

    // Store failures propagate as availability errors, not as denials.
    let config = store
        .find_config_by_key(submission.key)
        .await?
        .ok_or(Denial::UnknownKey)?;

    if config.url_id != submission.url_id {
        return Err(Denial::UrlIdMismatch.into());
    }

    let secret_ok = config
        .secret_hash
        .as_deref()
        .is_some_and(|stored| verify_secret(submission.secret, stored));
    if !secret_ok {
        return Err(Denial::SecretMismatch.into());
    }

    if !config.ip_allow_list.iter().any(|allowed| *allowed == source_ip) {
        return Err(Denial::IpNotAllowed.into());
    }

    debug!(plant = %config.public_plant_id, "Submission authorized");
    Ok(Authorized {
        public_plant_id: config.public_plant_id,
        partition: config.partition,
        interval_sec: config.interval_sec,
    })
}
