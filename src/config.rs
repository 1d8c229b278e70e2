//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with development
//! defaults. In production, configure via environment variables or a `.env` file.
//! The only required value is `AUTH_JWT_SECRET`.
//!
//! # Storage
//!
//! - `DATABASE_URL`: PostgreSQL connection string; unset selects the in-memory store
//! - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
//! - `OPERATION_TIMEOUT_SECS`: deadline for every store call (default: 10)
//!
//! # Ingestion
//!
//! - `RATE_LIMIT_SAFETY_BUFFER_SECS`: seconds subtracted from a plant's interval (default: 60)
//! - `RATE_LIMIT_ACCEPT_FIRST_MEASUREMENT`: accept a submission to an empty partition (default: false)
//! - `DEFAULT_LOG_INTERVAL_SECS`: interval given to new plants (default: 900)
//!
//! # Security Configuration
//!
//! - `AUTH_JWT_SECRET`, `AUTH_JWT_ALGORITHM`, `AUTH_JWT_ISSUER`, `AUTH_JWT_AUDIENCE`:
//!   owner bearer token verification
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins (default: `*` for dev)
//! - `TRUSTED_PROXIES`: CIDR ranges whose forwarding headers are honoured
//!
//! # HTTP Limits
//!
//! - `RATE_LIMIT_RPS`: Requests per second per client (default: 100, 0 = disabled)
//! - `RATE_LIMIT_BURST`: Burst capacity for rate limiter (default: 50)
//! - `MAX_REQUEST_BODY_SIZE`: bytes (default: 1 MiB)

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::middleware::Cidr;
use crate::services::provisioner::DEFAULT_LOG_INTERVAL_SECS;
use crate::services::rate_limiter::DEFAULT_RATE_LIMIT_SAFETY_BUFFER_SECS;
use crate::services::{FirstMeasurementPolicy, RateLimitPolicy};
use crate::validation::{MAX_INTERVAL_SECS, MIN_INTERVAL_SECS};

/// HMAC algorithm used to verify owner tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

impl FromStr for AuthAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Self::HS256),
            "HS384" => Ok(Self::HS384),
            "HS512" => Ok(Self::HS512),
            other => Err(format!("unsupported algorithm '{other}' (expected HS256, HS384 or HS512)")),
        }
    }
}

/// Owner token verification settings.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Shared HMAC secret
    pub secret: String,
    pub algorithm: AuthAlgorithm,
    /// Expected `iss` claim, unchecked when `None`
    pub issuer: Option<String>,
    /// Expected `aud` claim, unchecked when `None`
    pub audience: Option<String>,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .finish()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}' (expected pretty or json)")),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// PostgreSQL connection string; `None` runs on the in-memory store
    pub database_url: Option<String>,

    pub database_max_connections: u32,

    /// Deadline applied to every store call (default: 10 seconds)
    pub operation_timeout: Duration,

    /// Interval of the background store ping (default: 30 seconds)
    pub health_check_interval: Duration,

    // =========================================================================
    // Ingestion Configuration
    // =========================================================================
    /// Seconds subtracted from a plant's logging interval (default: 60)
    pub rate_limit_safety_buffer_secs: u32,

    /// Accept a submission when the partition is still empty (default: false)
    pub accept_first_measurement: bool,

    /// Logging interval assigned to new plants (default: 900)
    pub default_log_interval_secs: u32,

    // =========================================================================
    // HTTP Limits
    // =========================================================================
    /// Requests per second limit per client (default: 100)
    /// Set to 0 to disable rate limiting
    pub rate_limit_rps: u32,

    /// Burst capacity (default: 50)
    pub rate_limit_burst: u32,

    /// Maximum request body size in bytes (default: 1 MiB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    pub auth: AuthConfig,

    /// Allowed CORS origins; `*` allows any
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges. Forwarding headers are only honoured when
    /// the socket peer is inside one of them. Empty trusts every peer.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if a value does not parse, if
    /// `AUTH_JWT_SECRET` is missing, or if validation fails.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,

            // Storage
            database_url: Self::optional_env("DATABASE_URL"),
            database_max_connections: Self::parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
            operation_timeout: Duration::from_secs(Self::parse_env("OPERATION_TIMEOUT_SECS", 10)?),
            health_check_interval: Duration::from_secs(Self::parse_env(
                "HEALTH_CHECK_INTERVAL_SECS",
                30,
            )?),

            // Ingestion
            rate_limit_safety_buffer_secs: Self::parse_env(
                "RATE_LIMIT_SAFETY_BUFFER_SECS",
                DEFAULT_RATE_LIMIT_SAFETY_BUFFER_SECS,
            )?,
            accept_first_measurement: Self::parse_env("RATE_LIMIT_ACCEPT_FIRST_MEASUREMENT", false)?,
            default_log_interval_secs: Self::parse_env(
                "DEFAULT_LOG_INTERVAL_SECS",
                DEFAULT_LOG_INTERVAL_SECS,
            )?,

            // HTTP limits
            rate_limit_rps: Self::parse_env("RATE_LIMIT_RPS", 100)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", 50)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,

            // Security
            auth: AuthConfig {
                secret: Self::optional_env("AUTH_JWT_SECRET").ok_or_else(|| {
                    AppError::ConfigError("AUTH_JWT_SECRET must be set".to_string())
                })?,
                algorithm: Self::parse_env("AUTH_JWT_ALGORITHM", AuthAlgorithm::default())?,
                issuer: Self::optional_env("AUTH_JWT_ISSUER"),
                audience: Self::optional_env("AUTH_JWT_AUDIENCE"),
            },
            cors_allowed_origins: Self::parse_cors_origins(),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES"),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_format: Self::parse_env("LOG_FORMAT", LogFormat::default())?,
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        if self.auth.secret.trim().is_empty() {
            return Err(AppError::ConfigError(
                "AUTH_JWT_SECRET cannot be empty".to_string(),
            ));
        }

        if self.operation_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "OPERATION_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if self.health_check_interval.is_zero() {
            return Err(AppError::ConfigError(
                "HEALTH_CHECK_INTERVAL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.database_max_connections == 0 {
            return Err(AppError::ConfigError(
                "DATABASE_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS)
            .contains(&i64::from(self.default_log_interval_secs))
        {
            return Err(AppError::ConfigError(format!(
                "DEFAULT_LOG_INTERVAL_SECS must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS}"
            )));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        for entry in &self.trusted_proxies {
            entry
                .parse::<Cidr>()
                .map_err(|e| AppError::ConfigError(format!("TRUSTED_PROXIES: {e}")))?;
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if HTTP rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_rps > 0
    }

    /// Check if trusted proxy validation is enabled.
    pub fn proxy_validation_enabled(&self) -> bool {
        !self.trusted_proxies.is_empty()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address, `None` when disabled.
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Ingestion rate limiter settings.
    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            safety_buffer_secs: self.rate_limit_safety_buffer_secs,
            first_measurement: if self.accept_first_measurement {
                FirstMeasurementPolicy::Accept
            } else {
                FirstMeasurementPolicy::Reject
            },
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// A variable that counts as unset when empty.
    fn optional_env(name: &str) -> Option<String> {
        env::var(name).ok().filter(|v| !v.trim().is_empty())
    }

    fn parse_cors_origins() -> Vec<String> {
        let origins = Self::parse_list("CORS_ALLOWED_ORIGINS");
        if origins.is_empty() {
            vec!["*".to_string()]
        } else {
            origins
        }
    }

    /// Comma-separated list; unset or empty yields an empty list.
    fn parse_list(name: &str) -> Vec<String> {
        Self::optional_env(name)
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            // Storage
            database_url: None,
            database_max_connections: 10,
            operation_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(30),
            // Ingestion
            rate_limit_safety_buffer_secs: DEFAULT_RATE_LIMIT_SAFETY_BUFFER_SECS,
            accept_first_measurement: false,
            default_log_interval_secs: DEFAULT_LOG_INTERVAL_SECS,
            // HTTP limits
            rate_limit_rps: 100,
            rate_limit_burst: 50,
            max_request_body_size: 1024 * 1024,
            // Security
            auth: AuthConfig {
                secret: "development-secret-change-me".to_string(),
                algorithm: AuthAlgorithm::HS256,
                issuer: None,
                audience: None,
            },
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![], // Empty = forwarding headers honoured from any peer
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}
