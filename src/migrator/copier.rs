use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::MigrationError;
use super::checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore, CheckpointUpdate};
use super::record::PatientRecord;
use super::store::{DestinationStore, SourceStore};

/// Error messages carried in a run summary.
pub const MAX_REPORTED_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    AlreadyCompleted,
    Failed,
}

impl RunStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed | Self::AlreadyCompleted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    pub unit_name: String,
    pub status: RunStatus,
    /// Records in the source at the start of the run.
    pub total: u64,
    /// Cumulative records copied for this unit, including earlier runs.
    pub migrated: u64,
    /// Records that failed during this run.
    pub failed: u64,
    pub batches: u32,
    pub errors: Vec<String>,
}

/// Resume position and counters, mirrored into the checkpoint after each
/// committed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Progress {
    last_record_id: Option<i32>,
    batch_number: i32,
    records_migrated: i64,
}

impl Progress {
    fn resume(checkpoint: &Checkpoint) -> Self {
        Self {
            last_record_id: checkpoint.last_record_id,
            batch_number: checkpoint.batch_number.unwrap_or(0),
            records_migrated: checkpoint.records_migrated,
        }
    }

    fn is_pending(&self, record_id: i32) -> bool {
        self.last_record_id.is_none_or(|last| record_id > last)
    }

    fn advance(&mut self, last_record_id: i32, copied: usize) {
        assert!(
            self.is_pending(last_record_id),
            "Checkpoint position must move forward"
        );
        self.last_record_id = Some(last_record_id);
        self.batch_number += 1;
        self.records_migrated += copied as i64;
    }
}

#[derive(Debug, Default)]
struct Tally {
    failed: u64,
    errors: Vec<String>,
}

impl Tally {
    fn record(&mut self, message: String) {
        self.errors.push(message);
    }
}

struct BatchOutcome {
    copied: usize,
    failed: usize,
    commit_error: Option<String>,
}

enum Finish {
    Exhausted { total: u64 },
    CommitFailed { total: u64, message: String },
}

/// Copies every not-yet-migrated record of one unit from source to
/// destination, one committed batch at a time.
pub struct BatchCopier<'a> {
    source: &'a dyn SourceStore,
    destination: &'a dyn DestinationStore,
    checkpoints: &'a dyn CheckpointStore,
    unit_name: String,
    batch_size: u64,
}

impl<'a> BatchCopier<'a> {
    pub fn new(
        source: &'a dyn SourceStore,
        destination: &'a dyn DestinationStore,
        checkpoints: &'a dyn CheckpointStore,
        unit_name: impl Into<String>,
        batch_size: u64,
    ) -> Result<Self, MigrationError> {
        let unit_name = unit_name.into();
        if unit_name.trim().is_empty() {
            return Err(MigrationError::InvalidInput(
                "unit name cannot be empty".to_string(),
            ));
        }
        if batch_size == 0 || batch_size > i32::MAX as u64 {
            return Err(MigrationError::InvalidInput(format!(
                "batch size must be positive, got {batch_size}"
            )));
        }
        Ok(Self {
            source,
            destination,
            checkpoints,
            unit_name,
            batch_size,
        })
    }

    pub async fn run(&self) -> Result<MigrationSummary, MigrationError> {
        info!(
            "Starting data migration for {} (batch size {})",
            self.unit_name, self.batch_size
        );

        let existing = self
            .checkpoints
            .get(&self.unit_name)
            .await
            .map_err(|err| MigrationError::checkpoint(&self.unit_name, err))?;

        if let Some(checkpoint) = existing.as_ref() {
            if checkpoint.status == CheckpointStatus::Completed {
                info!("Migration for {} already completed", self.unit_name);
                let migrated = checkpoint.records_migrated.max(0) as u64;
                return Ok(MigrationSummary {
                    unit_name: self.unit_name.clone(),
                    status: RunStatus::AlreadyCompleted,
                    total: migrated,
                    migrated,
                    failed: 0,
                    batches: checkpoint.batch_number.unwrap_or(0).max(0) as u32,
                    errors: Vec::new(),
                });
            }
        }

        let mut progress = existing.as_ref().map(Progress::resume).unwrap_or_default();
        let mut tally = Tally::default();

        match self.migrate(&mut progress, &mut tally).await {
            Ok(Finish::Exhausted { total }) => {
                self.save(&progress, CheckpointStatus::Completed, None)
                    .await?;
                info!(
                    "Migration of {} completed: {} migrated, {} failed out of {}",
                    self.unit_name, progress.records_migrated, tally.failed, total
                );
                Ok(self.summary(RunStatus::Completed, total, &progress, tally))
            }
            Ok(Finish::CommitFailed { total, message }) => {
                self.save(&progress, CheckpointStatus::Failed, Some(message.clone()))
                    .await?;
                error!(
                    "Migration of {} stopped at record id {:?}: {message}",
                    self.unit_name, progress.last_record_id
                );
                Ok(self.summary(RunStatus::Failed, total, &progress, tally))
            }
            Err(err) => {
                error!("Migration of {} failed: {err}", self.unit_name);
                if let Err(save_err) = self
                    .save(&progress, CheckpointStatus::Failed, Some(err.to_string()))
                    .await
                {
                    error!(
                        "Could not record failure for {}: {save_err}",
                        self.unit_name
                    );
                }
                Err(err)
            }
        }
    }

    async fn migrate(
        &self,
        progress: &mut Progress,
        tally: &mut Tally,
    ) -> Result<Finish, MigrationError> {
        self.save(progress, CheckpointStatus::InProgress, None)
            .await?;

        let total = self.source.count().await.map_err(MigrationError::Source)?;
        info!("Total records to migrate for {}: {total}", self.unit_name);
        if let Some(last) = progress.last_record_id {
            info!("Resuming {} after record id {last}", self.unit_name);
        }

        loop {
            let fetched = self
                .source
                .fetch_after(progress.last_record_id, self.batch_size)
                .await
                .map_err(MigrationError::Source)?;
            let source_exhausted = (fetched.len() as u64) < self.batch_size;
            let batch: Vec<PatientRecord> = fetched
                .into_iter()
                .filter(|record| progress.is_pending(record.id))
                .collect();
            let Some(last_id) = batch.last().map(|record| record.id) else {
                return Ok(Finish::Exhausted { total });
            };

            let batch_index = progress.batch_number + 1;
            let outcome = self.copy_batch(batch_index, &batch, tally).await?;
            tally.failed += outcome.failed as u64;

            if let Some(commit_error) = outcome.commit_error {
                return Ok(Finish::CommitFailed {
                    total,
                    message: format!("Batch {batch_index} commit failed: {commit_error}"),
                });
            }

            progress.advance(last_id, outcome.copied);
            self.save(progress, CheckpointStatus::InProgress, None)
                .await?;

            info!(
                "Batch {}: {} migrated, {} failed. Total: {}/{}",
                progress.batch_number,
                outcome.copied,
                outcome.failed,
                progress.records_migrated,
                total
            );

            if source_exhausted {
                return Ok(Finish::Exhausted { total });
            }
        }
    }

    async fn copy_batch(
        &self,
        batch_index: i32,
        records: &[PatientRecord],
        tally: &mut Tally,
    ) -> Result<BatchOutcome, MigrationError> {
        let mut unit = self
            .destination
            .begin_batch()
            .await
            .map_err(MigrationError::Destination)?;

        let mut copied = 0usize;
        let mut failed = 0usize;
        for record in records {
            match unit.upsert(record).await {
                Ok(action) => {
                    copied += 1;
                    debug!("Patient {}: {action:?}", record.patient_id);
                }
                Err(err) => {
                    failed += 1;
                    let message = format!("Patient {}: {err}", record.patient_id);
                    warn!("{message}");
                    tally.record(message);
                }
            }
        }

        if let Err(err) = unit.commit().await {
            error!("Batch {batch_index} commit failed: {err}");
            tally.record(format!("Batch {batch_index}: commit failed: {err}"));
            return Ok(BatchOutcome {
                copied: 0,
                failed: records.len(),
                commit_error: Some(err.to_string()),
            });
        }

        Ok(BatchOutcome {
            copied,
            failed,
            commit_error: None,
        })
    }

    async fn save(
        &self,
        progress: &Progress,
        status: CheckpointStatus,
        error_message: Option<String>,
    ) -> Result<Checkpoint, MigrationError> {
        let last_record_id = match status {
            CheckpointStatus::Completed => None,
            _ => progress.last_record_id,
        };
        let update = CheckpointUpdate {
            unit_name: self.unit_name.clone(),
            last_record_id,
            batch_number: progress.batch_number,
            records_migrated: progress.records_migrated,
            status,
            error_message,
        };
        self.checkpoints
            .save(update)
            .await
            .map_err(|err| MigrationError::checkpoint(&self.unit_name, err))
    }

    fn summary(
        &self,
        status: RunStatus,
        total: u64,
        progress: &Progress,
        mut tally: Tally,
    ) -> MigrationSummary {
        tally.errors.truncate(MAX_REPORTED_ERRORS);
        MigrationSummary {
            unit_name: self.unit_name.clone(),
            status,
            total,
            migrated: progress.records_migrated.max(0) as u64,
            failed: tally.failed,
            batches: progress.batch_number.max(0) as u32,
            errors: tally.errors,
        }
    }
}
