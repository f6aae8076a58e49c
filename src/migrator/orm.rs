use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::{Expr, Order};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbBackend, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QueryResult, QuerySelect,
    Statement, TransactionTrait,
};
use tracing::warn;

use super::record::PatientRecord;
use super::store::{
    ConstraintInfo, DestinationBatch, DestinationStore, SourceStore, StoreError, TableSchema,
    UpsertAction,
};
use crate::clock::fixed_now;
use crate::entities::patient;

/// The `patients` table of one database, usable as either end of a copy.
#[derive(Clone)]
pub struct OrmPatientStore {
    database: DatabaseConnection,
}

impl OrmPatientStore {
    pub fn new(database: DatabaseConnection) -> Self {
        Self { database }
    }

    async fn count_rows(&self) -> Result<u64, StoreError> {
        Ok(patient::Entity::find().count(&self.database).await?)
    }
}

#[async_trait]
impl SourceStore for OrmPatientStore {
    async fn count(&self) -> Result<u64, StoreError> {
        self.count_rows().await
    }

    async fn fetch_after(
        &self,
        after: Option<i32>,
        limit: u64,
    ) -> Result<Vec<PatientRecord>, StoreError> {
        let mut query = patient::Entity::find();
        if let Some(after) = after {
            query = query.filter(patient::Column::Id.gt(after));
        }
        let rows = query
            .order_by_asc(patient::Column::Id)
            .limit(limit)
            .all(&self.database)
            .await?;
        Ok(rows.into_iter().map(PatientRecord::from).collect())
    }

    async fn sample(&self, size: u64) -> Result<Vec<PatientRecord>, StoreError> {
        let rows = patient::Entity::find()
            .order_by(Expr::cust("RANDOM()"), Order::Asc)
            .limit(size)
            .all(&self.database)
            .await?;
        Ok(rows.into_iter().map(PatientRecord::from).collect())
    }
}

#[async_trait]
impl DestinationStore for OrmPatientStore {
    async fn count(&self) -> Result<u64, StoreError> {
        self.count_rows().await
    }

    async fn find_by_natural_key(
        &self,
        patient_id: &str,
    ) -> Result<Option<PatientRecord>, StoreError> {
        let row = patient::Entity::find()
            .filter(patient::Column::PatientId.eq(patient_id))
            .one(&self.database)
            .await?;
        Ok(row.map(PatientRecord::from))
    }

    async fn begin_batch(&self) -> Result<Box<dyn DestinationBatch>, StoreError> {
        let txn = self.database.begin().await?;
        Ok(Box::new(OrmPatientBatch { txn }))
    }

    async fn describe_table(&self, table_name: &str) -> Result<TableSchema, StoreError> {
        match self.database.get_database_backend() {
            DbBackend::Postgres => describe_postgres(&self.database, table_name).await,
            DbBackend::Sqlite => describe_sqlite(&self.database, table_name).await,
            backend => Err(StoreError::UnsupportedBackend {
                operation: "schema introspection",
                backend,
            }),
        }
    }
}

/// One destination transaction. Each upsert runs in its own savepoint so a
/// rejected record is undone without poisoning the rest of the batch.
pub struct OrmPatientBatch {
    txn: DatabaseTransaction,
}

#[async_trait]
impl DestinationBatch for OrmPatientBatch {
    async fn upsert(&mut self, record: &PatientRecord) -> Result<UpsertAction, StoreError> {
        let savepoint = self.txn.begin().await?;
        match upsert_patient(&savepoint, record).await {
            Ok(action) => {
                savepoint.commit().await?;
                Ok(action)
            }
            Err(err) => {
                if let Err(rollback) = savepoint.rollback().await {
                    warn!(
                        "Rollback of patient {} failed: {rollback}",
                        record.patient_id
                    );
                }
                Err(err)
            }
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.txn.commit().await?;
        Ok(())
    }
}

/// Overwrites the mutable fields of the row with the same `patient_id`, or
/// inserts it. Rows that already hold the same values are left untouched.
async fn upsert_patient<C>(db: &C, record: &PatientRecord) -> Result<UpsertAction, StoreError>
where
    C: ConnectionTrait,
{
    let existing = patient::Entity::find()
        .filter(patient::Column::PatientId.eq(record.patient_id.as_str()))
        .one(db)
        .await?;
    let now = fixed_now();

    match existing {
        Some(model) => {
            if PatientRecord::from(model.clone()).same_contents(record) {
                return Ok(UpsertAction::Unchanged);
            }
            let mut row = patient::ActiveModel::from(model);
            row.name = Set(record.name.clone());
            row.age = Set(record.age);
            row.gender = Set(record.gender.clone());
            row.medical_condition = Set(record.medical_condition.clone());
            row.last_visit = Set(record.last_visit);
            row.updated_at = Set(now);
            row.update(db).await?;
            Ok(UpsertAction::Updated)
        }
        None => {
            patient::ActiveModel {
                patient_id: Set(record.patient_id.clone()),
                name: Set(record.name.clone()),
                age: Set(record.age),
                gender: Set(record.gender.clone()),
                medical_condition: Set(record.medical_condition.clone()),
                last_visit: Set(record.last_visit),
                created_at: Set(now),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(db)
            .await?;
            Ok(UpsertAction::Inserted)
        }
    }
}

async fn query_rows(
    db: &DatabaseConnection,
    sql: &str,
    table_name: &str,
) -> Result<Vec<QueryResult>, StoreError> {
    let backend = db.get_database_backend();
    let statement = Statement::from_sql_and_values(backend, sql, [table_name.into()]);
    Ok(db.query_all(statement).await?)
}

async fn describe_postgres(
    db: &DatabaseConnection,
    table_name: &str,
) -> Result<TableSchema, StoreError> {
    let exists = query_rows(
        db,
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1) AS present",
        table_name,
    )
    .await?;
    let table_exists = match exists.first() {
        Some(row) => row.try_get::<bool>("", "present")?,
        None => false,
    };

    let indexes = query_rows(
        db,
        "SELECT indexname::text AS indexname FROM pg_indexes \
         WHERE schemaname = current_schema() AND tablename = $1 ORDER BY indexname",
        table_name,
    )
    .await?
    .iter()
    .map(|row| row.try_get::<String>("", "indexname"))
    .collect::<Result<Vec<_>, _>>()?;

    let constraints = query_rows(
        db,
        "SELECT constraint_name::text AS constraint_name, constraint_type::text AS constraint_type \
         FROM information_schema.table_constraints \
         WHERE table_schema = current_schema() AND table_name = $1 ORDER BY constraint_name",
        table_name,
    )
    .await?
    .iter()
    .map(|row| -> Result<ConstraintInfo, StoreError> {
        Ok(ConstraintInfo {
            name: row.try_get("", "constraint_name")?,
            kind: row.try_get("", "constraint_type")?,
        })
    })
    .collect::<Result<Vec<_>, _>>()?;

    Ok(TableSchema {
        table_exists,
        indexes,
        constraints,
    })
}

async fn describe_sqlite(
    db: &DatabaseConnection,
    table_name: &str,
) -> Result<TableSchema, StoreError> {
    let exists = query_rows(
        db,
        "SELECT COUNT(*) AS present FROM sqlite_master WHERE type = 'table' AND name = ?",
        table_name,
    )
    .await?;
    let table_exists = match exists.first() {
        Some(row) => row.try_get::<i64>("", "present")? > 0,
        None => false,
    };

    let indexes = query_rows(
        db,
        "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ? ORDER BY name",
        table_name,
    )
    .await?
    .iter()
    .map(|row| row.try_get::<String>("", "name"))
    .collect::<Result<Vec<_>, _>>()?;

    let constraints = query_rows(
        db,
        "SELECT name, origin FROM pragma_index_list(?) WHERE origin IN ('pk', 'u') ORDER BY name",
        table_name,
    )
    .await?
    .iter()
    .map(|row| -> Result<ConstraintInfo, StoreError> {
        let origin: String = row.try_get("", "origin")?;
        let kind = if origin == "pk" { "PRIMARY KEY" } else { "UNIQUE" };
        Ok(ConstraintInfo {
            name: row.try_get("", "name")?,
            kind: kind.to_string(),
        })
    })
    .collect::<Result<Vec<_>, _>>()?;

    Ok(TableSchema {
        table_exists,
        indexes,
        constraints,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::testing::memory_database;
    use crate::migrator::checkpoint::{CheckpointStatus, CheckpointStore, OrmCheckpointStore};
    use crate::migrator::copier::{BatchCopier, RunStatus};
    use crate::migrator::testing::patients;
    use crate::migrator::verifier::Verifier;

    async fn seeded_source(ids: std::ops::RangeInclusive<i32>) -> DatabaseConnection {
        let database = memory_database().await;
        let now = fixed_now();
        for record in patients(ids) {
            patient::ActiveModel {
                id: Set(record.id),
                patient_id: Set(record.patient_id),
                name: Set(record.name),
                age: Set(record.age),
                gender: Set(record.gender),
                medical_condition: Set(record.medical_condition),
                last_visit: Set(record.last_visit),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&database)
            .await
            .expect("seed patient");
        }
        database
    }

    #[tokio::test]
    async fn copies_and_verifies_between_databases() {
        let source_db = seeded_source(1..=12).await;
        let destination_db = memory_database().await;
        let source = OrmPatientStore::new(source_db);
        let destination = OrmPatientStore::new(destination_db.clone());
        let checkpoints = OrmCheckpointStore::new(destination_db.clone());

        let summary = BatchCopier::new(&source, &destination, &checkpoints, "patients", 5)
            .unwrap()
            .run()
            .await
            .expect("migration succeeds");
        assert_eq!(summary.status, RunStatus::Completed);
        assert_eq!(summary.migrated, 12);
        assert_eq!(summary.batches, 3);

        let checkpoint = checkpoints.get("patients").await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert_eq!(checkpoint.batch_number, Some(3));
        assert_eq!(checkpoint.last_record_id, None);

        let report = Verifier::new(&source, &destination, "patients", 100)
            .unwrap()
            .run()
            .await;
        assert!(report.passed(), "{}", report.render());
        assert_eq!(report.sample.matched, 12);

        let again = BatchCopier::new(&source, &destination, &checkpoints, "patients", 5)
            .unwrap()
            .run()
            .await
            .unwrap();
        assert_eq!(again.status, RunStatus::AlreadyCompleted);
        assert_eq!(again.migrated, 12);
    }

    #[tokio::test]
    async fn tampered_row_is_reported() {
        let source_db = seeded_source(1..=6).await;
        let destination_db = memory_database().await;
        let source = OrmPatientStore::new(source_db);
        let destination = OrmPatientStore::new(destination_db.clone());
        let checkpoints = OrmCheckpointStore::new(destination_db.clone());
        BatchCopier::new(&source, &destination, &checkpoints, "patients", 4)
            .unwrap()
            .run()
            .await
            .unwrap();

        let row = patient::Entity::find()
            .filter(patient::Column::PatientId.eq("P00003"))
            .one(&destination_db)
            .await
            .unwrap()
            .unwrap();
        let age = row.age;
        let mut row = patient::ActiveModel::from(row);
        row.age = Set(age + 10);
        row.update(&destination_db).await.unwrap();

        let sample = Verifier::new(&source, &destination, "patients", 100)
            .unwrap()
            .sample_check()
            .await;
        assert_eq!(sample.matched, 5);
        assert_eq!(sample.mismatched.len(), 1);
        assert_eq!(sample.mismatched[0].patient_id, "P00003");
        assert_eq!(sample.mismatched[0].fields, vec!["age"]);
    }

    #[tokio::test]
    async fn second_upsert_leaves_row_identical() {
        let destination = OrmPatientStore::new(memory_database().await);
        let record = patients(1..=1).remove(0);

        let mut batch = destination.begin_batch().await.unwrap();
        assert_eq!(batch.upsert(&record).await.unwrap(), UpsertAction::Inserted);
        batch.commit().await.unwrap();
        let first = patient::Entity::find()
            .one(&destination.database)
            .await
            .unwrap()
            .unwrap();

        let mut batch = destination.begin_batch().await.unwrap();
        assert_eq!(batch.upsert(&record).await.unwrap(), UpsertAction::Unchanged);
        batch.commit().await.unwrap();
        let second = patient::Entity::find()
            .all(&destination.database)
            .await
            .unwrap();

        assert_eq!(second, vec![first]);
    }

    #[tokio::test]
    async fn rejected_record_does_not_undo_its_batch() {
        let destination = OrmPatientStore::new(memory_database().await);
        let mut records = patients(1..=3);
        records[1].age = 0;

        let mut batch = destination.begin_batch().await.unwrap();
        assert!(batch.upsert(&records[0]).await.is_ok());
        assert!(batch.upsert(&records[1]).await.is_err());
        assert!(batch.upsert(&records[2]).await.is_ok());
        batch.commit().await.unwrap();

        assert_eq!(DestinationStore::count(&destination).await.unwrap(), 2);
        assert!(
            destination
                .find_by_natural_key("P00002")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn uncommitted_batch_is_discarded() {
        let destination = OrmPatientStore::new(memory_database().await);
        {
            let mut batch = destination.begin_batch().await.unwrap();
            batch.upsert(&patients(1..=1).remove(0)).await.unwrap();
        }
        assert_eq!(DestinationStore::count(&destination).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn updates_match_by_natural_key() {
        let destination = OrmPatientStore::new(memory_database().await);
        let mut record = patients(7..=7).remove(0);

        let mut batch = destination.begin_batch().await.unwrap();
        batch.upsert(&record).await.unwrap();
        record.id = 99;
        record.medical_condition = "Recovered".to_string();
        assert_eq!(batch.upsert(&record).await.unwrap(), UpsertAction::Updated);
        batch.commit().await.unwrap();

        let stored = destination
            .find_by_natural_key("P00007")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.medical_condition, "Recovered");
        assert_eq!(stored.id, 1);
    }

    #[tokio::test]
    async fn sqlite_schema_is_described() {
        let destination = OrmPatientStore::new(memory_database().await);

        let schema = destination.describe_table("patients").await.unwrap();
        assert!(schema.table_exists);
        assert!(schema.indexes.contains(&"idx_patients_name".to_string()));
        assert!(schema.indexes.contains(&"idx_patients_patient_id".to_string()));
        assert!(schema.constraints.iter().any(|c| c.kind == "UNIQUE"));

        let missing = destination.describe_table("visits").await.unwrap();
        assert!(!missing.table_exists);
        assert!(missing.indexes.is_empty());
    }

    #[tokio::test]
    async fn source_reads_in_key_order() {
        let source = OrmPatientStore::new(seeded_source(1..=9).await);

        let page = source.fetch_after(Some(4), 3).await.unwrap();
        let ids: Vec<i32> = page.iter().map(|record| record.id).collect();
        assert_eq!(ids, vec![5, 6, 7]);

        let sample = source.sample(4).await.unwrap();
        assert_eq!(sample.len(), 4);
        assert_eq!(source.sample(50).await.unwrap().len(), 9);
    }
}
