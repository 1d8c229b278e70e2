//! Persisted domain records: plants, logger configurations and measurements.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::LogEntryRequest;

/// Opaque handle of a plant's dedicated measurement partition.
///
/// Always `plant_logger_` followed by exactly twelve ASCII digits. The SQL
/// backend interpolates the name into DDL, so anything else is rejected at
/// construction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionName(String);

impl PartitionName {
    pub const PREFIX: &'static str = "plant_logger_";
    pub const DIGITS: usize = 12;

    /// Parse and validate a partition name.
    pub fn parse(raw: &str) -> Option<Self> {
        let digits = raw.strip_prefix(Self::PREFIX)?;
        if digits.len() == Self::DIGITS && digits.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    /// Build a name from a numeric suffix, keeping only the low twelve digits.
    pub fn from_number(value: u64) -> Self {
        Self(format!("{}{:012}", Self::PREFIX, value % 1_000_000_000_000))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PartitionName {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid partition name: {value}"))
    }
}

impl From<PartitionName> for String {
    fn from(value: PartitionName) -> Self {
        value.0
    }
}

/// A registered solar power plant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    /// Internal identifier, shared with the plant's [`LoggerConfig`]
    pub id: Uuid,
    /// Externally shareable identifier, immutable once issued
    pub public_plant_id: String,
    /// Display name, unique across all plants
    pub name: String,
    /// Owning account id (the `sub` of the caller's bearer token)
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

/// Logger configuration of a plant: credentials, allow-list and partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Same value as the owning [`Plant::id`]
    pub id: Uuid,
    pub public_plant_id: String,
    /// Minimum number of seconds between two accepted measurements
    pub interval_sec: u32,
    /// Lookup handle for ingestion; `None` until credentials are issued
    pub key: Option<String>,
    /// Salted one-way hash of the ingestion secret; `None` until issued
    pub secret_hash: Option<String>,
    /// Capability token embedded in the ingestion path
    pub url_id: String,
    /// Canonicalized source addresses allowed to submit telemetry
    pub ip_allow_list: Vec<String>,
    pub partition: PartitionName,
    pub created_at: DateTime<Utc>,
}

/// One telemetry record inside a plant partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub voltage_output: f64,
    pub current_output: f64,
    pub power_output: f64,
    pub solar_radiation: f64,
    pub t_ambient: f64,
    pub t_module: f64,
    pub rel_humidity: f64,
    pub wind_speed: f64,
    pub created_at: DateTime<Utc>,
}

impl Measurement {
    /// Build a measurement from an accepted log entry, stamped with `created_at`.
    pub fn from_entry(entry: &LogEntryRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            voltage_output: entry.voltage_output,
            current_output: entry.current_output,
            power_output: entry.power_output,
            solar_radiation: entry.solar_radiation,
            t_ambient: entry.t_ambient,
            t_module: entry.t_module,
            rel_humidity: entry.rel_humidity,
            wind_speed: entry.wind_speed,
            created_at,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_name_accepts_generated_shape() {
        let name = PartitionName::parse("plant_logger_000123456789").unwrap();
        assert_eq!(name.as_str(), "plant_logger_000123456789");
    }

    #[test]
    fn test_partition_name_from_number_pads_and_truncates() {
        assert_eq!(PartitionName::from_number(42).as_str(), "plant_logger_000000000042");
        assert_eq!(
            PartitionName::from_number(1_000_000_000_007).as_str(),
            "plant_logger_000000000007"
        );
    }

    #[test]
    fn test_partition_name_rejects_injection() {
        assert!(PartitionName::parse("plant_logger_1; DROP TABLE plants").is_none());
        assert!(PartitionName::parse("plant_logger_12345678901").is_none()); // 11 digits
        assert!(PartitionName::parse("plant_logger_1234567890123").is_none()); // 13 digits
        assert!(PartitionName::parse("other_000123456789").is_none());
    }

    #[test]
    fn test_partition_name_deserialization_validates() {
        let ok: Result<PartitionName, _> = serde_json::from_str(r#""plant_logger_111111111111""#);
        assert!(ok.is_ok());

        let bad: Result<PartitionName, _> = serde_json::from_str(r#""pv_plants""#);
        assert!(bad.is_err());
    }
}
