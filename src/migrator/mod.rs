//! Checkpointed copy of patient records between two databases, and the
//! post-copy verification of the result.

pub mod checkpoint;
pub mod copier;
pub mod orm;
pub mod record;
pub mod store;
pub mod verifier;

#[cfg(test)]
pub(crate) mod testing;

use thiserror::Error;

pub use checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore, CheckpointUpdate, OrmCheckpointStore};
pub use copier::{BatchCopier, MigrationSummary, RunStatus};
pub use orm::OrmPatientStore;
pub use record::PatientRecord;
pub use store::{DestinationBatch, DestinationStore, SourceStore, StoreError, UpsertAction};
pub use verifier::{VerificationReport, Verifier};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("source read failed: {0}")]
    Source(#[source] StoreError),
    #[error("destination write failed: {0}")]
    Destination(#[source] StoreError),
    #[error("checkpoint for {unit} could not be stored: {source}")]
    Checkpoint {
        unit: String,
        #[source]
        source: StoreError,
    },
    #[error("invalid migration input: {0}")]
    InvalidInput(String),
}

impl MigrationError {
    pub(crate) fn checkpoint(unit: &str, source: StoreError) -> Self {
        Self::Checkpoint {
            unit: unit.to_string(),
            source,
        }
    }
}
