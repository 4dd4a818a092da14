mod api;
mod config;
mod error;
mod executor;
mod models;
mod paths;
mod repository;
mod services;

use crate::config::Config;
use crate::executor::TokioProcessHost;
use crate::repository::{ExecutionRepository, LogRepository, establish_connection};
use crate::services::{
    ExecutionService, NotificationHub, OutputRecorder, RunSettings, ScriptExecutionService,
};
use api::create_router;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "batch_monitor=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting batch_monitor with config: {:?}", config);

    if let Some(path) = config.database_url.strip_prefix("sqlite:") {
        let path = std::path::Path::new(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::create_dir_all(&config.logs_dir)?;

    // Establish database connection
    let db_pool = establish_connection(&config.database_url).await?;
    tracing::info!("Database connected: {}", config.database_url);

    // Initialize repositories
    let execution_repo = ExecutionRepository::new(db_pool.clone());
    let log_repo = LogRepository::new(db_pool);

    // Initialize services
    let hub = NotificationHub::default();
    let recorder = OutputRecorder::new(log_repo.clone(), hub.clone());
    let shutdown = CancellationToken::new();
    let runner = ScriptExecutionService::new(
        execution_repo.clone(),
        recorder.clone(),
        hub.clone(),
        TokioProcessHost,
        RunSettings::from_config(&config),
        shutdown.clone(),
    );
    let execution_service = ExecutionService::new(
        &config,
        execution_repo,
        log_repo,
        recorder,
        runner,
        shutdown,
    );
    execution_service.recover().await?;

    // Create router
    let app = create_router(execution_service.clone(), hub);
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let addr = addr.parse::<SocketAddr>()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    execution_service.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
