use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use patient_records::config::ApiConfig;
use patient_records::db::{ConnectionFactory, run_migrations};
use patient_records::http;
use patient_records::state::AppState;
use patient_records::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ApiConfig::load().context("Failed to load configuration")?;
    info!("Starting patient records API ({})", config.environment);

    let database = ConnectionFactory::new("application", config.database.clone())
        .connect()
        .await?;
    run_migrations(&database).await?;

    let app_state = AppState::new(database.clone(), config.environment.clone());
    let router: Router = http::router(app_state, &config.cors)?;

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("Patient records API listening on {local_addr}");

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server exited with error")?;

    if let Err(err) = database.close().await {
        error!("Failed to close database pool: {err}");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    info!("Shutdown signal received");
}
