//! PostgreSQL store: shared `plants` / `logger_configs` tables plus one
//! measurement table per plant partition.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use tracing::{debug, info};

use crate::models::{LoggerConfig, Measurement, PartitionName, Plant};

use super::{CredentialStore, PartitionStore, PlantStore, StoreError, StoreResult};

const PLANTS: &str = "plants";
const LOGGER_CONFIGS: &str = "logger_configs";

/// Postgres error code for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";
/// Postgres error code for `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

const MEASUREMENT_COLUMNS: &str = "voltage_output, current_output, power_output, solar_radiation, \
     t_ambient, t_module, rel_humidity, wind_speed, created_at";

const CONFIG_COLUMNS: &str = "id, public_plant_id, interval_sec, key, secret_hash, url_id, \
     ip_allow_list, partition_name, created_at";

/// PostgreSQL-backed plant store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and make sure the shared tables exist.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(db_err("connect", "pool", Filter::None))?;

        Self::from_pool(pool).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> StoreResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS plants (
                id UUID PRIMARY KEY,
                public_plant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                owner TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err("ensure_schema", PLANTS, Filter::None))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS logger_configs (
                id UUID PRIMARY KEY REFERENCES plants(id),
                public_plant_id TEXT NOT NULL,
                interval_sec INTEGER NOT NULL,
                key TEXT,
                secret_hash TEXT,
                url_id TEXT NOT NULL,
                ip_allow_list TEXT[] NOT NULL DEFAULT '{}',
                partition_name TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_err("ensure_schema", LOGGER_CONFIGS, Filter::None))?;

        info!("Plant store schema ready");
        Ok(())
    }

    fn row_to_plant(row: &PgRow) -> StoreResult<Plant> {
        Ok(Plant {
            id: row.try_get("id").map_err(corrupt(PLANTS))?,
            public_plant_id: row.try_get("public_plant_id").map_err(corrupt(PLANTS))?,
            name: row.try_get("name").map_err(corrupt(PLANTS))?,
            owner: row.try_get("owner").map_err(corrupt(PLANTS))?,
            created_at: row.try_get("created_at").map_err(corrupt(PLANTS))?,
        })
    }

    fn row_to_config(row: &PgRow) -> StoreResult<LoggerConfig> {
        let interval: i32 = row.try_get("interval_sec").map_err(corrupt(LOGGER_CONFIGS))?;
        let partition: String = row
            .try_get("partition_name")
            .map_err(corrupt(LOGGER_CONFIGS))?;

        Ok(LoggerConfig {
            id: row.try_get("id").map_err(corrupt(LOGGER_CONFIGS))?,
            public_plant_id: row
                .try_get("public_plant_id")
                .map_err(corrupt(LOGGER_CONFIGS))?,
            interval_sec: u32::try_from(interval).map_err(|_| StoreError::Corrupt {
                target: LOGGER_CONFIGS.to_string(),
                detail: format!("negative interval_sec {interval}"),
            })?,
            key: row.try_get("key").map_err(corrupt(LOGGER_CONFIGS))?,
            secret_hash: row.try_get("secret_hash").map_err(corrupt(LOGGER_CONFIGS))?,
            url_id: row.try_get("url_id").map_err(corrupt(LOGGER_CONFIGS))?,
            ip_allow_list: row
                .try_get("ip_allow_list")
                .map_err(corrupt(LOGGER_CONFIGS))?,
            partition: PartitionName::parse(&partition).ok_or_else(|| StoreError::Corrupt {
                target: LOGGER_CONFIGS.to_string(),
                detail: format!("invalid partition name {partition}"),
            })?,
            created_at: row.try_get("created_at").map_err(corrupt(LOGGER_CONFIGS))?,
        })
    }

    fn row_to_measurement(row: &PgRow, partition: &PartitionName) -> StoreResult<Measurement> {
        let target = partition.as_str();
        Ok(Measurement {
            voltage_output: row.try_get("voltage_output").map_err(corrupt(target))?,
            current_output: row.try_get("current_output").map_err(corrupt(target))?,
            power_output: row.try_get("power_output").map_err(corrupt(target))?,
            solar_radiation: row.try_get("solar_radiation").map_err(corrupt(target))?,
            t_ambient: row.try_get("t_ambient").map_err(corrupt(target))?,
            t_module: row.try_get("t_module").map_err(corrupt(target))?,
            rel_humidity: row.try_get("rel_humidity").map_err(corrupt(target))?,
            wind_speed: row.try_get("wind_speed").map_err(corrupt(target))?,
            created_at: row.try_get("created_at").map_err(corrupt(target))?,
        })
    }
}

/// Row filter of a failed statement, as it appears in error logs.
///
/// Logger keys are credentials, so only a short prefix is kept.
#[derive(Debug, Clone, Copy)]
enum Filter<'a> {
    None,
    PublicPlantId(&'a str),
    Name(&'a str),
    Key(&'a str),
    Range(DateTime<Utc>, DateTime<Utc>),
}

/// Characters of a logger key kept in error messages.
const KEY_PREFIX_CHARS: usize = 4;

impl fmt::Display for Filter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::None => f.write_str("no filter"),
            Filter::PublicPlantId(id) => write!(f, "public_plant_id={id}"),
            Filter::Name(name) => write!(f, "name={name:?}"),
            Filter::Key(key) => {
                let prefix: String = key.chars().take(KEY_PREFIX_CHARS).collect();
                write!(f, "key={prefix}***")
            }
            Filter::Range(start, end) => {
                write!(f, "created_at in [{}, {})", start.to_rfc3339(), end.to_rfc3339())
            }
        }
    }
}

/// Map a sqlx error into a `StoreError`, recognising unique violations and
/// missing partition tables.
fn db_err(
    op: &'static str,
    target: impl Into<String>,
    filter: Filter<'_>,
) -> impl FnOnce(sqlx::Error) -> StoreError {
    let target = target.into();
    move |source| {
        if let sqlx::Error::Database(db) = &source {
            match db.code().as_deref() {
                Some(UNIQUE_VIOLATION) => {
                    return StoreError::Duplicate {
                        field: unique_field(db.constraint()),
                    };
                }
                Some(UNDEFINED_TABLE) => return StoreError::PartitionMissing(target),
                _ => {}
            }
        }
        StoreError::Database {
            op,
            target,
            filter: filter.to_string(),
            source,
        }
    }
}

fn unique_field(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some("plants_name_key") => "name",
        Some("plants_public_plant_id_key") => "public_plant_id",
        Some("logger_configs_partition_name_key") => "partition",
        Some("logger_configs_key_key") => "key",
        _ => "unknown",
    }
}

fn corrupt(target: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |e| StoreError::Corrupt {
        target: target.to_string(),
        detail: e.to_string(),
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn plant_name_exists(&self, name: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT EXISTS (SELECT 1 FROM plants WHERE name = $1) AS taken")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("plant_name_exists", PLANTS, Filter::Name(name)))?;
        row.try_get("taken").map_err(corrupt(PLANTS))
    }

    async fn find_plant(&self, public_plant_id: &str) -> StoreResult<Option<Plant>> {
        let row = sqlx::query(
            "SELECT id, public_plant_id, name, owner, created_at FROM plants WHERE public_plant_id = $1",
        )
        .bind(public_plant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("find_plant", PLANTS, Filter::PublicPlantId(public_plant_id)))?;

        row.as_ref().map(Self::row_to_plant).transpose()
    }

    async fn find_config(&self, public_plant_id: &str) -> StoreResult<Option<LoggerConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM logger_configs WHERE public_plant_id = $1"
        ))
        .bind(public_plant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("find_config", LOGGER_CONFIGS, Filter::PublicPlantId(public_plant_id)))?;

        row.as_ref().map(Self::row_to_config).transpose()
    }

    async fn find_config_by_key(&self, key: &str) -> StoreResult<Option<LoggerConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {CONFIG_COLUMNS} FROM logger_configs WHERE key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("find_config_by_key", LOGGER_CONFIGS, Filter::Key(key)))?;

        row.as_ref().map(Self::row_to_config).transpose()
    }

    async fn set_credentials(
        &self,
        public_plant_id: &str,
        key: &str,
        secret_hash: &str,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE logger_configs SET key = $1, secret_hash = $2 WHERE public_plant_id = $3",
        )
        .bind(key)
        .bind(secret_hash)
        .bind(public_plant_id)
        .execute(&self.pool)
        .await
        .map_err(db_err(
            "set_credentials",
            LOGGER_CONFIGS,
            Filter::PublicPlantId(public_plant_id),
        ))?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_logger_settings(
        &self,
        public_plant_id: &str,
        interval_sec: u32,
        ip_allow_list: &[String],
    ) -> StoreResult<bool> {
        let interval = i32::try_from(interval_sec).map_err(|_| StoreError::Corrupt {
            target: LOGGER_CONFIGS.to_string(),
            detail: format!("interval_sec {interval_sec} out of range"),
        })?;

        let result = sqlx::query(
            "UPDATE logger_configs SET interval_sec = $1, ip_allow_list = $2 WHERE public_plant_id = $3",
        )
        .bind(interval)
        .bind(ip_allow_list)
        .bind(public_plant_id)
        .execute(&self.pool)
        .await
        .map_err(db_err(
            "set_logger_settings",
            LOGGER_CONFIGS,
            Filter::PublicPlantId(public_plant_id),
        ))?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PartitionStore for PostgresStore {
    async fn partition_exists(&self, partition: &PartitionName) -> StoreResult<bool> {
        let row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
            .bind(partition.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("partition_exists", partition.as_str(), Filter::None))?;
        row.try_get("present").map_err(corrupt(partition.as_str()))
    }

    async fn append(
        &self,
        partition: &PartitionName,
        measurement: &Measurement,
    ) -> StoreResult<()> {
        sqlx::query(&format!(
            r#"INSERT INTO "{partition}" ({MEASUREMENT_COLUMNS})
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#
        ))
        .bind(measurement.voltage_output)
        .bind(measurement.current_output)
        .bind(measurement.power_output)
        .bind(measurement.solar_radiation)
        .bind(measurement.t_ambient)
        .bind(measurement.t_module)
        .bind(measurement.rel_humidity)
        .bind(measurement.wind_speed)
        .bind(measurement.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err("append", partition.as_str(), Filter::None))?;

        Ok(())
    }

    async fn latest(&self, partition: &PartitionName) -> StoreResult<Option<Measurement>> {
        let row = sqlx::query(&format!(
            r#"SELECT {MEASUREMENT_COLUMNS} FROM "{partition}" ORDER BY created_at DESC LIMIT 1"#
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("latest", partition.as_str(), Filter::None))?;

        row.as_ref()
            .map(|r| Self::row_to_measurement(r, partition))
            .transpose()
    }

    async fn range(
        &self,
        partition: &PartitionName,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StoreResult<Vec<Measurement>> {
        let rows = sqlx::query(&format!(
            r#"SELECT {MEASUREMENT_COLUMNS} FROM "{partition}"
               WHERE created_at >= $1 AND created_at < $2
               ORDER BY created_at ASC"#
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("range", partition.as_str(), Filter::Range(start, end)))?;

        rows.iter()
            .map(|r| Self::row_to_measurement(r, partition))
            .collect()
    }
}

#[async_trait]
impl PlantStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("ping", "pool", Filter::None))?;
        Ok(())
    }

    async fn provision(&self, plant: &Plant, config: &LoggerConfig) -> StoreResult<()> {
        let interval = i32::try_from(config.interval_sec).map_err(|_| StoreError::Corrupt {
            target: LOGGER_CONFIGS.to_string(),
            detail: format!("interval_sec {} out of range", config.interval_sec),
        })?;
        let partition = &config.partition;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("provision.begin", PLANTS, Filter::None))?;

        sqlx::query(
            "INSERT INTO plants (id, public_plant_id, name, owner, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(plant.id)
        .bind(&plant.public_plant_id)
        .bind(&plant.name)
        .bind(&plant.owner)
        .bind(plant.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err(
            "provision.insert_plant",
            PLANTS,
            Filter::PublicPlantId(&plant.public_plant_id),
        ))?;

        sqlx::query(&format!(
            "INSERT INTO logger_configs ({CONFIG_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(config.id)
        .bind(&config.public_plant_id)
        .bind(interval)
        .bind(&config.key)
        .bind(&config.secret_hash)
        .bind(&config.url_id)
        .bind(&config.ip_allow_list)
        .bind(partition.as_str())
        .bind(config.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err(
            "provision.insert_config",
            LOGGER_CONFIGS,
            Filter::PublicPlantId(&config.public_plant_id),
        ))?;

        // Postgres DDL is transactional, so the partition joins the same unit.
        sqlx::query(&format!(
            r#"CREATE TABLE "{partition}" (
                id BIGSERIAL PRIMARY KEY,
                voltage_output DOUBLE PRECISION NOT NULL,
                current_output DOUBLE PRECISION NOT NULL,
                power_output DOUBLE PRECISION NOT NULL,
                solar_radiation DOUBLE PRECISION NOT NULL,
                t_ambient DOUBLE PRECISION NOT NULL,
                t_module DOUBLE PRECISION NOT NULL,
                rel_humidity DOUBLE PRECISION NOT NULL,
                wind_speed DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ NOT NULL
            )"#
        ))
        .execute(&mut *tx)
        .await
        .map_err(db_err(
            "provision.create_partition",
            partition.as_str(),
            Filter::PublicPlantId(&config.public_plant_id),
        ))?;

        tx.commit()
            .await
            .map_err(db_err(
                "provision.commit",
                PLANTS,
                Filter::PublicPlantId(&plant.public_plant_id),
            ))?;

        debug!(partition = %partition, "Plant provisioned");
        Ok(())
    }

    async fn decommission(&self, public_plant_id: &str) -> StoreResult<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(db_err("decommission.begin", PLANTS, Filter::None))?;

        let deleted = sqlx::query(
            "DELETE FROM logger_configs WHERE public_plant_id = $1 RETURNING partition_name",
        )
        .bind(public_plant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err(
            "decommission.delete_config",
            LOGGER_CONFIGS,
            Filter::PublicPlantId(public_plant_id),
        ))?;

        let Some(row) = deleted else {
            // Nothing to delete; dropping the transaction rolls it back.
            return Ok(false);
        };
        let raw: String = row
            .try_get("partition_name")
            .map_err(corrupt(LOGGER_CONFIGS))?;
        let partition = PartitionName::parse(&raw).ok_or_else(|| StoreError::Corrupt {
            target: LOGGER_CONFIGS.to_string(),
            detail: format!("invalid partition name {raw}"),
        })?;

        sqlx::query("DELETE FROM plants WHERE public_plant_id = $1")
            .bind(public_plant_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err(
                "decommission.delete_plant",
                PLANTS,
                Filter::PublicPlantId(public_plant_id),
            ))?;

        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{partition}""#))
            .execute(&mut *tx)
            .await
            .map_err(db_err(
                "decommission.drop_partition",
                partition.as_str(),
                Filter::PublicPlantId(public_plant_id),
            ))?;

        tx.commit()
            .await
            .map_err(db_err(
                "decommission.commit",
                PLANTS,
                Filter::PublicPlantId(public_plant_id),
            ))?;

        debug!(partition = %partition, "Plant decommissioned");
        Ok(true)
    }

    async fn ensure_base_indexes(&self) -> StoreResult<()> {
        for (statement, target) in [
            (
                "CREATE UNIQUE INDEX IF NOT EXISTS plants_name_key ON plants (name)",
                PLANTS,
            ),
            (
                "CREATE UNIQUE INDEX IF NOT EXISTS logger_configs_partition_name_key ON logger_configs (partition_name)",
                LOGGER_CONFIGS,
            ),
            (
                "CREATE UNIQUE INDEX IF NOT EXISTS logger_configs_key_key ON logger_configs (key) WHERE key IS NOT NULL",
                LOGGER_CONFIGS,
            ),
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err("ensure_base_indexes", target, Filter::None))?;
        }
        Ok(())
    }

    async fn ensure_plant_indexes(&self, config: &LoggerConfig) -> StoreResult<()> {
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS plants_public_plant_id_key ON plants (public_plant_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err("ensure_plant_indexes", PLANTS, Filter::None))?;

        let partition = &config.partition;
        sqlx::query(&format!(
            r#"CREATE INDEX IF NOT EXISTS "{partition}_created_at_idx" ON "{partition}" (created_at DESC)"#
        ))
        .execute(&self.pool)
        .await
        .map_err(db_err(
            "ensure_plant_indexes",
            partition.as_str(),
            Filter::PublicPlantId(&config.public_plant_id),
        ))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_field_mapping() {
        assert_eq!(unique_field(Some("plants_name_key")), "name");
        assert_eq!(unique_field(Some("logger_configs_partition_name_key")), "partition");
        assert_eq!(unique_field(None), "unknown");
    }

    #[test]
    fn test_database_error_names_filter_and_redacts_key() {
        let key = "4321987654321987654321987654321987654321";
        let err = db_err("find_config_by_key", LOGGER_CONFIGS, Filter::Key(key))(
            sqlx::Error::PoolTimedOut,
        );

        let message = err.to_string();
        assert!(message.contains("find_config_by_key"), "{message}");
        assert!(message.contains("logger_configs"), "{message}");
        assert!(message.contains("key=4321***"), "{message}");
        assert!(!message.contains(key), "{message}");
    }

    #[test]
    fn test_database_error_names_public_plant_id() {
        let err = db_err("find_plant", PLANTS, Filter::PublicPlantId("100000000000042"))(
            sqlx::Error::PoolClosed,
        );

        match err {
            StoreError::Database { op, filter, .. } => {
                assert_eq!(op, "find_plant");
                assert_eq!(filter, "public_plant_id=100000000000042");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
