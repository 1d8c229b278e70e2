use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::error::{AppError, AppResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Maximum length of a plant display name, in characters.
pub const MAX_PLANT_NAME_LENGTH: usize = 50;

/// Smallest accepted logging interval in seconds.
pub const MIN_INTERVAL_SECS: i64 = 1;

/// Largest accepted logging interval in seconds (one day).
pub const MAX_INTERVAL_SECS: i64 = 24 * 60 * 60;

/// Maximum number of entries in a plant's source address allow-list.
pub const MAX_ALLOW_LIST_ENTRIES: usize = 20;

pub const INVALID_DATE_RANGE: &str = "Invalid date range.";

/// Canonical text form of an IP address.
///
/// IPv4 is returned in dotted-quad form. IPv6 is fully expanded to eight
/// groups of four lower-case hex digits, so `2001:db8::1` and
/// `2001:0DB8:0:0:0:0:0:1` normalize to the same string. IPv4-mapped IPv6
/// (`::ffff:a.b.c.d`, as seen on a dual-stack listener) becomes plain IPv4.
pub fn normalize_ip(raw: &str) -> Option<String> {
    match raw.trim().parse::<IpAddr>().ok()?.to_canonical() {
        IpAddr::V4(v4) => Some(v4.to_string()),
        IpAddr::V6(v6) => Some(
            v6.segments()
                .iter()
                .map(|segment| format!("{segment:04x}"))
                .collect::<Vec<_>>()
                .join(":"),
        ),
    }
}

/// Validate a plant display name and return it trimmed.
///
/// Rules:
/// - Must not be empty after trimming
/// - At most 50 characters
/// - No control characters
pub fn validate_plant_name(name: &str) -> AppResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(AppError::BadRequest(
            "Plant name cannot be empty.".to_string(),
        ));
    }

    let length = name.chars().count();
    if length > MAX_PLANT_NAME_LENGTH {
        return Err(AppError::BadRequest(format!(
            "Plant name cannot exceed {MAX_PLANT_NAME_LENGTH} characters (got {length})."
        )));
    }

    if let Some(pos) = name.chars().position(|c| c.is_control()) {
        return Err(AppError::BadRequest(format!(
            "Plant name contains invalid control character at position {pos}."
        )));
    }

    Ok(name.to_string())
}

/// Validate a logging interval.
pub fn validate_interval(interval_sec: i64) -> AppResult<u32> {
    if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_sec) {
        return Err(AppError::BadRequest(format!(
            "Interval must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS} seconds."
        )));
    }

    u32::try_from(interval_sec)
        .map_err(|_| AppError::BadRequest("Interval out of range.".to_string()))
}

/// Validate and canonicalize an allow-list.
///
/// Every entry must be an IPv4 or IPv6 address. Entries are normalized with
/// [`normalize_ip`] and duplicates removed, keeping the first occurrence.
pub fn validate_ip_allow_list(entries: &[String]) -> AppResult<Vec<String>> {
    if entries.len() > MAX_ALLOW_LIST_ENTRIES {
        return Err(AppError::BadRequest(format!(
            "IP allow-list cannot exceed {MAX_ALLOW_LIST_ENTRIES} entries."
        )));
    }

    let mut canonical: Vec<String> = Vec::with_capacity(entries.len());
    for (pos, entry) in entries.iter().enumerate() {
        let ip = normalize_ip(entry).ok_or_else(|| {
            AppError::BadRequest(format!("Invalid IP address at position {pos}."))
        })?;
        if !canonical.contains(&ip) {
            canonical.push(ip);
        }
    }

    Ok(canonical)
}

/// Parse an RFC 3339 `[start, end)` range. `end` must be after `start`.
pub fn parse_date_range(start: &str, end: &str) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let parse = |raw: &str| {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| AppError::BadRequest(INVALID_DATE_RANGE.to_string()))
    };

    let (start, end) = (parse(start)?, parse(end)?);
    if end <= start {
        return Err(AppError::BadRequest(INVALID_DATE_RANGE.to_string()));
    }

    Ok((start, end))
}
