//! Plant endpoints.
//!
//! # Owner endpoints (bearer token)
//!
//! - `POST /plants/add` - register a plant
//! - `PUT /plants/keysecret` - issue ingestion credentials
//! - `PUT /plants/setconfig` - update interval and IP allow-list
//! - `DELETE /plants/delete` - remove a plant and its measurements
//! - `GET /plants/statistics` - descriptive statistics over a date range
//!
//! # Logger endpoint
//!
//! - `POST /plants/log/{apiID}` - submit one measurement
//!
//! Malformed owner bodies are answered with a sanitized 400. A malformed log
//! body is answered with the generic 500 and the detail is only logged.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use tracing::{error, instrument};

use crate::error::{AppError, AppResult};
use crate::metrics::{self, outcome};
use crate::middleware::request_id::request_id;
use crate::middleware::{ClientIp, OwnerIdentity};
use crate::models::{
    AddPlantRequest, AddPlantResponse, KeySecretResponse, LogEntryRequest, PlantIdRequest,
    SetConfigRequest, StatisticsRequest, SuccessResponse,
};
use crate::services::{StatisticsReport, statistics};
use crate::state::AppState;
use crate::validation::parse_date_range;

pub const PLANT_ADDED: &str = "New plant added to your account.";
pub const CREDENTIALS_ISSUED: &str = "New key and secret created. Please note them in a safe place. We cannot retrieve them again. If they get lost, you must create a new key and secret here.";
pub const CONFIG_UPDATED: &str = "Plant configuration updated.";
pub const LOG_ADDED: &str = "New log added.";
pub const PLANT_DELETED: &str = "Deletion accomplished.";
pub const STATISTICS_RETRIEVED: &str = "Requested statistical data retrieved.";

/// Register a new plant for the caller.
///
/// # Request Body
///
/// ```json
/// { "name": "Rooftop West" }
/// ```
#[instrument(skip(state, owner, payload), fields(owner = %owner.as_str()))]
pub async fn add_plant(
    State(state): State<AppState>,
    owner: OwnerIdentity,
    payload: Result<Json<AddPlantRequest>, JsonRejection>,
) -> AppResult<Json<SuccessResponse<AddPlantResponse>>> {
    let Json(request) = payload?;

    let plant = state
        .provisioner
        .create_plant(owner.as_str(), &request.name)
        .await?;

    Ok(Json(SuccessResponse::with_data(
        PLANT_ADDED,
        AddPlantResponse {
            public_plant_id: plant.public_plant_id,
            name: plant.name,
        },
    )))
}

/// Issue a fresh key and secret. Previous credentials stop working.
#[instrument(skip(state, owner, payload), fields(owner = %owner.as_str()))]
pub async fn set_key_secret(
    State(state): State<AppState>,
    owner: OwnerIdentity,
    payload: Result<Json<PlantIdRequest>, JsonRejection>,
) -> AppResult<Json<SuccessResponse<KeySecretResponse>>> {
    let Json(request) = payload?;

    let credentials = state
        .provisioner
        .issue_credentials(owner.as_str(), &request.public_plant_id)
        .await?;

    Ok(Json(SuccessResponse::with_data(CREDENTIALS_ISSUED, credentials)))
}

/// Update the logging interval and source address allow-list.
///
/// # Request Body
///
/// ```json
/// { "publicPlantID": "123456789012345", "intervalSec": 900, "ipWhiteList": ["203.0.113.5"] }
/// ```
#[instrument(skip(state, owner, payload), fields(owner = %owner.as_str()))]
pub async fn set_config(
    State(state): State<AppState>,
    owner: OwnerIdentity,
    payload: Result<Json<SetConfigRequest>, JsonRejection>,
) -> AppResult<Json<SuccessResponse<()>>> {
    let Json(request) = payload?;

    state
        .provisioner
        .set_logger_config(
            owner.as_str(),
            &request.public_plant_id,
            request.interval_sec,
            &request.ip_white_list,
        )
        .await?;

    Ok(Json(SuccessResponse::message(CONFIG_UPDATED)))
}

/// Accept one measurement from a field logger.
///
/// `apiID` is the plant's URL id. Key, secret, URL id and source address must
/// all match; any mismatch yields the same 400.
#[instrument(skip_all)]
pub async fn add_log_entry(
    State(state): State<AppState>,
    Path(api_id): Path<String>,
    client_ip: ClientIp,
    headers: HeaderMap,
    payload: Result<Json<LogEntryRequest>, JsonRejection>,
) -> AppResult<Json<SuccessResponse<()>>> {
    let entry = match payload {
        Ok(Json(entry)) => entry,
        Err(rejection) => {
            metrics::record_ingestion(outcome::MALFORMED);
            error!(
                request_id = request_id(&headers),
                source_ip = client_ip.as_str(),
                detail = %rejection.body_text(),
                "Malformed log entry"
            );
            return Err(AppError::MalformedInput(rejection.body_text()));
        }
    };

    state
        .ingestion
        .ingest(&api_id, client_ip.as_str(), &entry)
        .await?;

    Ok(Json(SuccessResponse::message(LOG_ADDED)))
}

/// Delete a plant, its logger configuration and every measurement.
#[instrument(skip(state, owner, payload), fields(owner = %owner.as_str()))]
pub async fn delete_plant(
    State(state): State<AppState>,
    owner: OwnerIdentity,
    payload: Result<Json<PlantIdRequest>, JsonRejection>,
) -> AppResult<Json<SuccessResponse<()>>> {
    let Json(request) = payload?;

    state
        .provisioner
        .delete_plant(owner.as_str(), &request.public_plant_id)
        .await?;

    Ok(Json(SuccessResponse::message(PLANT_DELETED)))
}

/// Statistics for `powerOutput` and `solarRadiation` over `[dateStart, dateEnd)`.
///
/// The parameters travel in a JSON body on a `GET` request.
///
/// # Request Body
///
/// ```json
/// {
///   "publicPlantID": "123456789012345",
///   "dateStart": "2024-06-01T00:00:00Z",
///   "dateEnd": "2024-07-01T00:00:00Z"
/// }
/// ```
#[instrument(skip(state, owner, payload), fields(owner = %owner.as_str()))]
pub async fn get_statistics(
    State(state): State<AppState>,
    owner: OwnerIdentity,
    payload: Result<Json<StatisticsRequest>, JsonRejection>,
) -> AppResult<Json<SuccessResponse<StatisticsReport>>> {
    let Json(request) = payload?;

    let config = state
        .provisioner
        .owned_config(owner.as_str(), &request.public_plant_id)
        .await?;
    let (start, end) = parse_date_range(&request.date_start, &request.date_end)?;

    let report = statistics::compute(state.store.as_ref(), &config.partition, start, end).await?;

    Ok(Json(SuccessResponse::with_data(STATISTICS_RETRIEVED, report)))
}
