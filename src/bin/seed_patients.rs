//! Loads patients from a `db.json` style document into the database.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use patient_records::config::{ConnectionRole, DatabaseConfig, normalize_database_url};
use patient_records::db::{ConnectionFactory, run_migrations};
use patient_records::seed::import_patients;
use patient_records::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "seed-patients")]
#[command(about = "Import patients from a JSON document of the form {\"patients\": [..]}")]
#[command(version)]
struct Cli {
    /// JSON document to import
    #[arg(long, default_value = "db.json")]
    file: PathBuf,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Assume the schema already exists
    #[arg(long)]
    skip_schema: bool,

    /// Print the import summary to stdout as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("Seed import failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let document = tokio::fs::read_to_string(&cli.file)
        .await
        .with_context(|| format!("Failed to read {}", cli.file.display()))?;

    let url = normalize_database_url(&cli.database_url, ConnectionRole::Migration)
        .context("Invalid database URL")?;
    let config = DatabaseConfig::for_url(url);
    config.ensure_bounds()?;
    let factory = ConnectionFactory::new("seed", config);
    info!(
        "Importing {} into {}",
        cli.file.display(),
        factory.redacted_url()
    );

    let database = factory.connect().await?;
    if cli.skip_schema {
        info!("Skipping schema setup");
    } else {
        run_migrations(&database)
            .await
            .context("Failed to prepare schema")?;
    }

    let outcome = import_patients(&database, &document).await;
    if let Err(err) = database.close().await {
        warn!("Failed to close database connection: {err}");
    }
    let summary = outcome?;

    info!("Seed import summary");
    info!("  Total patients: {}", summary.total);
    info!("  Successful: {}", summary.successful);
    info!("  Failed: {}", summary.failed);
    info!("  Skipped: {}", summary.skipped);
    for message in &summary.errors {
        warn!("  - {message}");
    }
    if cli.json {
        let encoded =
            serde_json::to_string_pretty(&summary).context("Failed to encode summary as JSON")?;
        println!("{encoded}");
    }

    Ok(summary.is_success())
}
