//! Read-only comparison of source and destination after a migration.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use patient_records::config::{DEFAULT_SAMPLE_SIZE, DEFAULT_UNIT_NAME, MigrationSettings};
use patient_records::db::ConnectionFactory;
use patient_records::migrator::{OrmPatientStore, Verifier};
use patient_records::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "verify-migration")]
#[command(about = "Compare record counts, sampled records and schema after a migration")]
#[command(version)]
struct Cli {
    #[arg(long, env = "DATABASE_URL_LOCAL")]
    source_url: String,

    #[arg(long, env = "DATABASE_URL")]
    destination_url: String,

    /// Destination table checked for schema objects
    #[arg(long, default_value = DEFAULT_UNIT_NAME)]
    table: String,

    /// Source records compared field by field
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
    sample_size: u64,

    /// Also write the report to this file
    #[arg(long)]
    output: Option<PathBuf>,

    /// Emit the report as JSON instead of text
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
            error!("Verification failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let settings = MigrationSettings::new(&cli.source_url, &cli.destination_url)?
        .with_unit_name(cli.table)
        .with_sample_size(cli.sample_size);
    settings.validate()?;

    let source_db = ConnectionFactory::new("source", settings.source.clone())
        .connect()
        .await?;
    let destination_db = ConnectionFactory::new("destination", settings.destination.clone())
        .connect()
        .await?;

    let source = OrmPatientStore::new(source_db.clone());
    let destination = OrmPatientStore::new(destination_db.clone());
    let report = Verifier::new(
        &source,
        &destination,
        settings.unit_name.clone(),
        settings.sample_size,
    )?
    .run()
    .await;

    for (label, database) in [("source", source_db), ("destination", destination_db)] {
        if let Err(err) = database.close().await {
            warn!("Failed to close {label} connection: {err}");
        }
    }

    let rendered = if cli.json {
        report.to_json().context("Failed to encode report as JSON")?
    } else {
        report.render()
    };
    println!("{rendered}");
    if let Some(path) = cli.output {
        tokio::fs::write(&path, &rendered)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Report saved to {}", path.display());
    }

    Ok(report.passed())
}
