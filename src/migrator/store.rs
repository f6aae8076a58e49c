use async_trait::async_trait;
use sea_orm::{DbBackend, DbErr};
use serde::Serialize;
use thiserror::Error;

use super::record::PatientRecord;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("{operation} is not supported on {backend:?}")]
    UnsupportedBackend {
        operation: &'static str,
        backend: DbBackend,
    },
    #[error("invalid stored value: {0}")]
    Invalid(String),
}

/// What an upsert did at the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConstraintInfo {
    pub name: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    pub table_exists: bool,
    pub indexes: Vec<String>,
    pub constraints: Vec<ConstraintInfo>,
}

/// Read side of a migration: the database records are copied from.
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn count(&self) -> Result<u64, StoreError>;

    /// Up to `limit` records with internal id greater than `after`, ascending.
    async fn fetch_after(&self, after: Option<i32>, limit: u64)
    -> Result<Vec<PatientRecord>, StoreError>;

    /// Up to `size` records in random order.
    async fn sample(&self, size: u64) -> Result<Vec<PatientRecord>, StoreError>;
}

/// Write side of a migration: the database records are copied into.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    async fn count(&self) -> Result<u64, StoreError>;

    async fn find_by_natural_key(&self, patient_id: &str)
    -> Result<Option<PatientRecord>, StoreError>;

    /// Opens a unit of work that commits or discards a whole batch.
    async fn begin_batch(&self) -> Result<Box<dyn DestinationBatch>, StoreError>;

    async fn describe_table(&self, table_name: &str) -> Result<TableSchema, StoreError>;
}

/// One open destination transaction.
///
/// A failed `upsert` leaves the rest of the batch intact. A failed `commit`
/// leaves none of the batch applied.
#[async_trait]
pub trait DestinationBatch: Send {
    async fn upsert(&mut self, record: &PatientRecord) -> Result<UpsertAction, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
