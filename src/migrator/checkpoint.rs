use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sea_orm::ActiveModelTrait;
use sea_orm::ActiveValue::Set;
use sea_orm::ColumnTrait;
use sea_orm::DatabaseConnection;
use sea_orm::EntityTrait;
use sea_orm::QueryFilter;
use sea_orm::TransactionTrait;
use tracing::debug;

use super::store::StoreError;
use crate::clock::fixed_now;
use crate::entities::migration_checkpoint;

pub use crate::entities::migration_checkpoint::CheckpointStatus;

/// Durable progress of one migration unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub unit_name: String,
    pub last_record_id: Option<i32>,
    pub batch_number: Option<i32>,
    pub records_migrated: i64,
    pub status: CheckpointStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl From<migration_checkpoint::Model> for Checkpoint {
    fn from(model: migration_checkpoint::Model) -> Self {
        Self {
            unit_name: model.unit_name,
            last_record_id: model.last_record_id,
            batch_number: model.batch_number,
            records_migrated: model.records_migrated,
            status: model.status,
            error_message: model.error_message,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Full replacement state written by [`CheckpointStore::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointUpdate {
    pub unit_name: String,
    pub last_record_id: Option<i32>,
    pub batch_number: i32,
    pub records_migrated: i64,
    pub status: CheckpointStatus,
    pub error_message: Option<String>,
}

impl CheckpointUpdate {
    /// Rejects states the checkpoint table must never hold. The error message
    /// is dropped unless the status is `failed`.
    pub fn normalized(mut self) -> Result<Self, StoreError> {
        if self.unit_name.trim().is_empty() {
            return Err(StoreError::Invalid("unit name cannot be empty".to_string()));
        }
        if self.batch_number < 0 || self.records_migrated < 0 {
            return Err(StoreError::Invalid(format!(
                "negative progress for {}: batch {} records {}",
                self.unit_name, self.batch_number, self.records_migrated
            )));
        }
        if self.status == CheckpointStatus::Completed && self.last_record_id.is_some() {
            return Err(StoreError::Invalid(format!(
                "completed checkpoint for {} cannot keep a resume position",
                self.unit_name
            )));
        }
        if self.status != CheckpointStatus::Failed {
            self.error_message = None;
        }
        Ok(self)
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get(&self, unit_name: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Creates or fully overwrites the unit's checkpoint. Either the whole
    /// update is stored or an error is returned and nothing changed.
    async fn save(&self, update: CheckpointUpdate) -> Result<Checkpoint, StoreError>;
}

/// Checkpoints kept in the destination database's `migration_checkpoints`.
#[derive(Clone)]
pub struct OrmCheckpointStore {
    database: DatabaseConnection,
}

impl OrmCheckpointStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }
}

#[async_trait]
impl CheckpointStore for OrmCheckpointStore {
    async fn get(&self, unit_name: &str) -> Result<Option<Checkpoint>, StoreError> {
        let model = migration_checkpoint::Entity::find()
            .filter(migration_checkpoint::Column::UnitName.eq(unit_name))
            .one(&self.database)
            .await?;
        Ok(model.map(Checkpoint::from))
    }

    async fn save(&self, update: CheckpointUpdate) -> Result<Checkpoint, StoreError> {
        let update = update.normalized()?;
        let now = fixed_now();

        let txn = self.database.begin().await?;
        let existing = migration_checkpoint::Entity::find()
            .filter(migration_checkpoint::Column::UnitName.eq(update.unit_name.as_str()))
            .one(&txn)
            .await?;

        let is_new = existing.is_none();
        let mut checkpoint = match existing {
            Some(model) => migration_checkpoint::ActiveModel::from(model),
            None => migration_checkpoint::ActiveModel {
                unit_name: Set(update.unit_name.clone()),
                created_at: Set(now),
                ..Default::default()
            },
        };
        checkpoint.last_record_id = Set(update.last_record_id);
        checkpoint.batch_number = Set(Some(update.batch_number));
        checkpoint.records_migrated = Set(update.records_migrated);
        checkpoint.status = Set(update.status);
        checkpoint.error_message = Set(update.error_message);
        checkpoint.updated_at = Set(now);

        let model = if is_new {
            checkpoint.insert(&txn).await?
        } else {
            checkpoint.update(&txn).await?
        };
        txn.commit().await?;
        debug!(
            "Checkpoint {} saved as {} (batch {:?}, {} records)",
            model.unit_name, model.status, model.batch_number, model.records_migrated
        );
        Ok(Checkpoint::from(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_database;

    fn update(status: CheckpointStatus, last: Option<i32>, batch: i32, records: i64) -> CheckpointUpdate {
        CheckpointUpdate {
            unit_name: "patients".to_string(),
            last_record_id: last,
            batch_number: batch,
            records_migrated: records,
            status,
            error_message: None,
        }
    }

    #[test]
    fn completed_checkpoint_cannot_keep_position() {
        let invalid = update(CheckpointStatus::Completed, Some(10), 1, 10);
        assert!(invalid.normalized().is_err());
        assert!(update(CheckpointStatus::InProgress, None, -1, 0).normalized().is_err());
    }

    #[test]
    fn error_message_kept_only_when_failed() {
        let mut in_progress = update(CheckpointStatus::InProgress, Some(5), 1, 5);
        in_progress.error_message = Some("stale".to_string());
        assert_eq!(in_progress.normalized().unwrap().error_message, None);

        let mut failed = update(CheckpointStatus::Failed, Some(5), 1, 5);
        failed.error_message = Some("Connection timeout".to_string());
        assert_eq!(
            failed.normalized().unwrap().error_message.as_deref(),
            Some("Connection timeout")
        );
    }

    #[tokio::test]
    async fn save_creates_then_overwrites() {
        let store = OrmCheckpointStore::new(memory_database().await);
        assert!(store.get("patients").await.unwrap().is_none());

        let created = store
            .save(update(CheckpointStatus::InProgress, None, 0, 0))
            .await
            .expect("create checkpoint");
        assert_eq!(created.batch_number, Some(0));
        assert_eq!(created.records_migrated, 0);

        let mut failed = update(CheckpointStatus::Failed, Some(500), 1, 500);
        failed.error_message = Some("Batch 2 commit failed".to_string());
        store.save(failed).await.expect("update checkpoint");

        let stored = store.get("patients").await.unwrap().expect("checkpoint exists");
        assert_eq!(stored.status, CheckpointStatus::Failed);
        assert_eq!(stored.last_record_id, Some(500));
        assert_eq!(stored.batch_number, Some(1));
        assert_eq!(stored.records_migrated, 500);
        assert_eq!(stored.error_message.as_deref(), Some("Batch 2 commit failed"));
        assert_eq!(stored.created_at, created.created_at);
        assert!(stored.updated_at >= created.updated_at);

        store
            .save(update(CheckpointStatus::Completed, None, 3, 1200))
            .await
            .expect("complete checkpoint");
        let stored = store.get("patients").await.unwrap().unwrap();
        assert_eq!(stored.status, CheckpointStatus::Completed);
        assert_eq!(stored.last_record_id, None);
        assert_eq!(stored.error_message, None);
    }

    #[tokio::test]
    async fn units_are_tracked_independently() {
        let store = OrmCheckpointStore::new(memory_database().await);
        store
            .save(update(CheckpointStatus::InProgress, Some(3), 1, 3))
            .await
            .unwrap();
        let mut other = update(CheckpointStatus::InProgress, Some(9), 2, 9);
        other.unit_name = "patients_archive".to_string();
        store.save(other).await.unwrap();

        assert_eq!(
            store.get("patients").await.unwrap().unwrap().last_record_id,
            Some(3)
        );
        assert_eq!(
            store
                .get("patients_archive")
                .await
                .unwrap()
                .unwrap()
                .last_record_id,
            Some(9)
        );
    }

    #[tokio::test]
    async fn rejected_update_leaves_store_unchanged() {
        let store = OrmCheckpointStore::new(memory_database().await);
        store
            .save(update(CheckpointStatus::InProgress, Some(7), 1, 7))
            .await
            .unwrap();
        let result = store
            .save(update(CheckpointStatus::Completed, Some(8), 2, 8))
            .await;
        assert!(result.is_err());
        let stored = store.get("patients").await.unwrap().unwrap();
        assert_eq!(stored.status, CheckpointStatus::InProgress);
        assert_eq!(stored.last_record_id, Some(7));
    }
}
