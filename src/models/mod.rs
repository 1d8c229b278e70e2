mod api;
mod plant;

pub use api::{
    AddPlantRequest, AddPlantResponse, HealthResponse, KeySecretResponse, LogEntryRequest,
    PlantIdRequest, SetConfigRequest, StatisticsRequest, SuccessResponse,
};
pub use plant::{LoggerConfig, Measurement, PartitionName, Plant};
