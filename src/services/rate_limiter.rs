//! Per-plant logging interval enforcement.
//!
//! Each plant declares a minimum number of seconds between two accepted
//! measurements. A submission is accepted when
//! `now >= latest.created_at + (interval - buffer)`; the buffer absorbs clock
//! skew and scheduling jitter on the logger side.
//!
//! The check reads the newest record and the caller writes afterwards. Two
//! concurrent submissions for the same plant can therefore both pass.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument};

use crate::error::{AppError, AppResult};
use crate::models::PartitionName;
use crate::store::PartitionStore;

/// Seconds subtracted from the configured interval.
pub const DEFAULT_RATE_LIMIT_SAFETY_BUFFER_SECS: u32 = 60;

/// What to do when a partition holds no measurement yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirstMeasurementPolicy {
    /// Refuse with the uniform not-found-or-no-permission failure.
    #[default]
    Reject,
    /// Accept the submission and start the series.
    Accept,
}

/// Operator-tunable rate limiter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub safety_buffer_secs: u32,
    pub first_measurement: FirstMeasurementPolicy,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            safety_buffer_secs: DEFAULT_RATE_LIMIT_SAFETY_BUFFER_SECS,
            first_measurement: FirstMeasurementPolicy::default(),
        }
    }
}

/// Whether a new measurement is due, given the newest stored timestamp.
///
/// A buffer larger than the interval makes every submission due.
pub fn is_due(
    latest: DateTime<Utc>,
    now: DateTime<Utc>,
    interval_sec: u32,
    safety_buffer_secs: u32,
) -> bool {
    let effective = i64::from(interval_sec) - i64::from(safety_buffer_secs);
    now >= latest + Duration::seconds(effective)
}

/// Decide whether `partition` may accept a measurement at `now`.
#[instrument(skip_all, fields(partition = %partition))]
pub async fn check<S>(
    store: &S,
    partition: &PartitionName,
    interval_sec: u32,
    policy: RateLimitPolicy,
    now: DateTime<Utc>,
) -> AppResult<()>
where
    S: PartitionStore + ?Sized,
{
    let Some(latest) = store.latest(partition).await? else {
        return match policy.first_measurement {
            FirstMeasurementPolicy::Accept => Ok(()),
            FirstMeasurementPolicy::Reject => {
                debug!("No previous measurement");
                Err(AppError::NotFoundOrNoPermission("no previous measurement"))
            }
        };
    };

    if is_due(latest.created_at, now, interval_sec, policy.safety_buffer_secs) {
        Ok(())
    } else {
        debug!(latest = %latest.created_at, "Submission arrived too early");
        Err(AppError::RateLimited { interval_sec })
    }
}
