//! Orpheon Server - Main entry point

use anyhow::{Context, Result};
use orpheon_common::logging::{init_logging, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tracing::info;

use orpheon_server::{
    api::{self, AppState},
    config::Config,
    extract::YtDlpExtractor,
    ingest::IngestionOrchestrator,
    jobs::PgJobStore,
    processing::ProcessingClient,
    storage,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables take precedence over these defaults
    let log_config = LogConfig::default()
        .with_prefix("orpheon-server")
        .with_directives("orpheon_server=debug,tower_http=debug,sqlx=warn,aws_smithy_runtime=info")
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    info!("Starting Orpheon Server");

    let config = Config::load()?;
    info!(
        "Configuration loaded - server will bind to {}:{}",
        config.server.host, config.server.port
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout_secs))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    info!("Database connection pool established");

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    info!("Database migrations completed");

    let object_store = storage::connect(config.storage.clone());
    let extractor = YtDlpExtractor::new(config.extractor.clone())?;
    let processing = ProcessingClient::from_config(&config.processing)?;
    info!(endpoint = %config.processing.endpoint, "Processing client initialized");

    let orchestrator = IngestionOrchestrator::new(
        Arc::new(PgJobStore::new(db_pool.clone())),
        object_store,
        Arc::new(extractor),
        Arc::new(processing),
        config.pipeline.clone(),
    );

    // Jobs left mid-flight by a previous process are resolved before new
    // submissions are accepted.
    let recovered = orchestrator
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted jobs")?;
    info!(recovered, "Startup recovery finished");

    let state = AppState {
        orchestrator: orchestrator.clone(),
        db: Some(db_pool),
    };
    let app = api::create_router(state, &config.cors);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let grace = Duration::from_secs(config.server.shutdown_timeout_secs);
    info!("Waiting up to {} seconds for running jobs", grace.as_secs());
    orchestrator.shutdown(grace).await;

    info!("Server shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
