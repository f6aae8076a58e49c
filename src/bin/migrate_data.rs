//! Copies patient records from a source database into a destination database
//! in checkpointed batches. Re-running after a failure resumes after the last
//! committed batch.

use std::process::ExitCode;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use patient_records::config::{DEFAULT_BATCH_SIZE, DEFAULT_UNIT_NAME, MigrationSettings};
use patient_records::db::{ConnectionFactory, run_migrations};
use patient_records::migrator::{BatchCopier, OrmCheckpointStore, OrmPatientStore, RunStatus};
use patient_records::telemetry::init_tracing;

#[derive(Parser)]
#[command(name = "migrate-data")]
#[command(about = "Checkpointed copy of patient records between databases")]
#[command(version)]
struct Cli {
    /// Database records are read from
    #[arg(long, env = "DATABASE_URL_LOCAL")]
    source_url: String,

    /// Database records are written to; also holds the checkpoints
    #[arg(long, env = "DATABASE_URL")]
    destination_url: String,

    /// Table to copy; also the checkpoint name. Only `patients` is supported
    #[arg(long, default_value = DEFAULT_UNIT_NAME)]
    table: String,

    /// Assume the destination schema already exists
    #[arg(long)]
    skip_schema: bool,

    /// Records copied per destination transaction
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: u64,

    /// Print the run summary to stdout as JSON
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
            error!("Migration failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let json = cli.json;
    let settings = MigrationSettings::new(&cli.source_url, &cli.destination_url)?
        .with_unit_name(cli.table)
        .with_batch_size(cli.batch_size)
        .with_skip_schema(cli.skip_schema);
    settings.validate()?;
    settings.ensure_copyable()?;

    let source_factory = ConnectionFactory::new("source", settings.source.clone());
    let destination_factory = ConnectionFactory::new("destination", settings.destination.clone());
    info!(
        "Migrating {} from {} to {}",
        settings.unit_name,
        source_factory.redacted_url(),
        destination_factory.redacted_url()
    );

    let source_db = source_factory.connect().await?;
    let destination_db = destination_factory.connect().await?;

    if settings.skip_schema {
        info!("Skipping schema setup");
    } else {
        info!("Applying schema to destination");
        run_migrations(&destination_db)
            .await
            .context("Failed to prepare destination schema")?;
    }

    let source = OrmPatientStore::new(source_db.clone());
    let destination = OrmPatientStore::new(destination_db.clone());
    let checkpoints = OrmCheckpointStore::new(destination_db.clone());
    let copier = BatchCopier::new(
        &source,
        &destination,
        &checkpoints,
        settings.unit_name.clone(),
        settings.batch_size,
    )?;

    let started = Instant::now();
    let outcome = copier.run().await;
    let elapsed = started.elapsed();

    for (label, database) in [("source", source_db), ("destination", destination_db)] {
        if let Err(err) = database.close().await {
            warn!("Failed to close {label} connection: {err}");
        }
    }

    let summary = outcome?;
    info!("Migration summary for {}", summary.unit_name);
    info!("  Status: {:?}", summary.status);
    info!("  Total records: {}", summary.total);
    info!("  Migrated: {}", summary.migrated);
    info!("  Failed: {}", summary.failed);
    info!("  Batches: {}", summary.batches);
    info!("  Duration: {:.2}s", elapsed.as_secs_f64());
    for message in &summary.errors {
        warn!("  - {message}");
    }
    if summary.status == RunStatus::Failed {
        warn!("Re-run migrate-data to resume from the last committed batch");
    }
    if json {
        let encoded =
            serde_json::to_string_pretty(&summary).context("Failed to encode summary as JSON")?;
        println!("{encoded}");
    }

    Ok(summary.status.is_success())
}
