use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use plant_telemetry::config::LogFormat;
use plant_telemetry::store::{MemoryStore, PlantStore, PostgresStore, TimedStore};
use plant_telemetry::{AppState, Config, build_router, metrics, utils};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    init_tracing(
        config
            .as_ref()
            .map(|c| c.log_format)
            .unwrap_or_default(),
    );

    info!(
        "Starting Plant Telemetry Backend v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        persistent = config.database_url.is_some(),
        operation_timeout_secs = config.operation_timeout.as_secs(),
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    let store = open_store(&config).await?;

    // Build application state and router
    let state = AppState::new(store, config.clone());
    state.provisioner.bootstrap_indexes().await.map_err(|e| {
        error!("Failed to ensure base indexes: {e}");
        exitcode::UNAVAILABLE
    })?;

    let app = build_router(state.clone()).map_err(|e| {
        error!("Failed to build router: {e}");
        exitcode::CONFIG
    })?;

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET    /health                - Health check");
    info!("  GET    /ready                 - Readiness check");
    info!("  POST   /plants/add            - Register a plant");
    info!("  PUT    /plants/keysecret      - Issue ingestion credentials");
    info!("  PUT    /plants/setconfig      - Update interval and IP allow-list");
    info!("  POST   /plants/log/{{apiID}}    - Submit a measurement");
    info!("  DELETE /plants/delete         - Delete a plant");
    info!("  GET    /plants/statistics     - Descriptive statistics");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(utils::shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Open the configured backend wrapped in the per-call deadline.
async fn open_store(config: &Config) -> Result<Arc<dyn PlantStore>, exitcode::ExitCode> {
    let timeout = config.operation_timeout;

    match &config.database_url {
        Some(url) => {
            info!("Connecting to PostgreSQL...");
            let store = PostgresStore::connect(url, config.database_max_connections)
                .await
                .map_err(|e| {
                    error!("Failed to connect to PostgreSQL: {e}");
                    exitcode::UNAVAILABLE
                })?;
            info!("Connected to PostgreSQL");
            Ok(Arc::new(TimedStore::new(store, timeout)))
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory store (data is lost on restart)");
            Ok(Arc::new(TimedStore::new(MemoryStore::new(), timeout)))
        }
    }
}
