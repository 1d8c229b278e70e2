use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request to register a new plant.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AddPlantRequest {
    /// Display name (unique, at most 50 characters)
    pub name: String,
}

/// Response after a plant was provisioned.
#[derive(Debug, Serialize)]
pub struct AddPlantResponse {
    #[serde(rename = "publicPlantID")]
    pub public_plant_id: String,
    pub name: String,
}

/// Request body naming a single plant (credential issuance, deletion).
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlantIdRequest {
    #[serde(rename = "publicPlantID")]
    pub public_plant_id: String,
}

/// Freshly issued ingestion credentials.
///
/// The plaintext secret is only ever part of this one response. `apiID` is
/// the path segment the logger posts to.
#[derive(Debug, Serialize)]
pub struct KeySecretResponse {
    pub key: String,
    pub secret: String,
    #[serde(rename = "apiID")]
    pub api_id: String,
}

/// Request to update the logging interval and IP allow-list of a plant.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetConfigRequest {
    #[serde(rename = "publicPlantID")]
    pub public_plant_id: String,
    /// Minimum seconds between logs; signed so negative input is reported, not mis-parsed
    #[serde(rename = "intervalSec")]
    pub interval_sec: i64,
    /// Source addresses permitted to submit telemetry (IPv4 or IPv6)
    #[serde(rename = "ipWhiteList")]
    pub ip_white_list: Vec<String>,
}

/// Telemetry submission from a field logger.
///
/// Exactly these ten keys are accepted; anything else is malformed input.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LogEntryRequest {
    pub key: String,
    pub secret: String,
    pub voltage_output: f64,
    pub current_output: f64,
    pub power_output: f64,
    pub solar_radiation: f64,
    pub t_ambient: f64,
    pub t_module: f64,
    pub rel_humidity: f64,
    pub wind_speed: f64,
}

/// Request for statistics over the half-open range `[dateStart, dateEnd)`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatisticsRequest {
    #[serde(rename = "publicPlantID")]
    pub public_plant_id: String,
    /// RFC 3339 timestamp, inclusive
    #[serde(rename = "dateStart")]
    pub date_start: String,
    /// RFC 3339 timestamp, exclusive
    #[serde(rename = "dateEnd")]
    pub date_end: String,
}

/// Uniform success envelope.
#[derive(Debug, Serialize)]
pub struct SuccessResponse<T: Serialize> {
    /// Always `"success"`
    pub result: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn with_data(message: impl Into<String>, data: T) -> Self {
        Self {
            result: "success",
            message: message.into(),
            data: Some(data),
        }
    }
}

impl SuccessResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            result: "success",
            message: message.into(),
            data: None,
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Storage backend in use (`memory` or `postgres`)
    pub store_backend: String,
    /// Whether the last store ping succeeded
    pub store_reachable: bool,
    /// Service version
    pub version: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn log_entry_json() -> serde_json::Value {
        json!({
            "key": "k", "secret": "s",
            "voltageOutput": 30.1, "currentOutput": 8.2, "powerOutput": 246.8,
            "solarRadiation": 812.0, "tAmbient": 21.5, "tModule": 43.0,
            "relHumidity": 40.0, "windSpeed": 3.2
        })
    }

    #[test]
    fn test_log_entry_accepts_exact_key_set() {
        let entry: LogEntryRequest = serde_json::from_value(log_entry_json()).unwrap();
        assert_eq!(entry.power_output, 246.8);
        assert_eq!(entry.t_module, 43.0);
    }

    #[test]
    fn test_log_entry_rejects_extra_key() {
        let mut value = log_entry_json();
        value["plantId"] = json!("x");
        assert!(serde_json::from_value::<LogEntryRequest>(value).is_err());
    }

    #[test]
    fn test_log_entry_rejects_missing_key() {
        let mut value = log_entry_json();
        value.as_object_mut().unwrap().remove("windSpeed");
        assert!(serde_json::from_value::<LogEntryRequest>(value).is_err());
    }

    #[test]
    fn test_log_entry_rejects_string_reading() {
        let mut value = log_entry_json();
        value["tAmbient"] = json!("21.5");
        assert!(serde_json::from_value::<LogEntryRequest>(value).is_err());
    }

    #[test]
    fn test_set_config_field_names() {
        let request: SetConfigRequest = serde_json::from_value(json!({
            "publicPlantID": "123",
            "intervalSec": 600,
            "ipWhiteList": ["10.0.0.1", "2001:db8::1"]
        }))
        .unwrap();

        assert_eq!(request.interval_sec, 600);
        assert_eq!(request.ip_white_list.len(), 2);
    }

    #[test]
    fn test_success_envelope_without_data() {
        let body = serde_json::to_value(SuccessResponse::message("New log added.")).unwrap();
        assert_eq!(body, json!({"result": "success", "message": "New log added."}));
    }

    #[test]
    fn test_add_plant_response_uses_public_field_name() {
        let body = serde_json::to_value(AddPlantResponse {
            public_plant_id: "123456789012345".into(),
            name: "Roof".into(),
        })
        .unwrap();
        assert_eq!(body["publicPlantID"], "123456789012345");
    }
}
