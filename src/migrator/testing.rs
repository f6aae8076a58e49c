//! In-memory stores with failure injection for copier and verifier tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use sea_orm::DbErr;

use super::checkpoint::{Checkpoint, CheckpointStore, CheckpointUpdate};
use super::record::PatientRecord;
use super::store::{
    ConstraintInfo, DestinationBatch, DestinationStore, SourceStore, StoreError, TableSchema,
    UpsertAction,
};
use crate::clock::fixed_now;

const GENDERS: [&str; 3] = ["Male", "Female", "Other"];
const CONDITIONS: [&str; 4] = ["Hypertension", "Asthma", "Diabetes", "Migraine"];

/// Deterministic patients whose internal ids are the given range.
pub fn patients(ids: RangeInclusive<i32>) -> Vec<PatientRecord> {
    let first_visit = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    ids.map(|id| PatientRecord {
        id,
        patient_id: format!("P{id:05}"),
        name: format!("Patient {id}"),
        age: 20 + id % 60,
        gender: GENDERS[id as usize % GENDERS.len()].to_string(),
        medical_condition: CONDITIONS[id as usize % CONDITIONS.len()].to_string(),
        last_visit: first_visit + Days::new(id as u64 % 365),
    })
    .collect()
}

pub fn full_schema() -> TableSchema {
    TableSchema {
        table_exists: true,
        indexes: vec![
            "idx_patients_name".to_string(),
            "idx_patients_patient_id".to_string(),
            "patients_pkey".to_string(),
        ],
        constraints: vec![
            ConstraintInfo {
                name: "patients_pkey".to_string(),
                kind: "PRIMARY KEY".to_string(),
            },
            ConstraintInfo {
                name: "patients_patient_id_key".to_string(),
                kind: "UNIQUE".to_string(),
            },
        ],
    }
}

struct PatientState {
    rows: BTreeMap<i32, PatientRecord>,
    next_id: i32,
    reads: usize,
    writes: usize,
    submitted: Vec<i32>,
    committed_batches: Vec<usize>,
    commit_attempts: usize,
    fail_commit_on: Option<usize>,
    fetch_calls: usize,
    fail_fetch_on: Option<usize>,
    fail_count: bool,
    rejected: HashSet<String>,
    schema: TableSchema,
}

impl Default for PatientState {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
            reads: 0,
            writes: 0,
            submitted: Vec::new(),
            committed_batches: Vec::new(),
            commit_attempts: 0,
            fail_commit_on: None,
            fetch_calls: 0,
            fail_fetch_on: None,
            fail_count: false,
            rejected: HashSet::new(),
            schema: full_schema(),
        }
    }
}

impl PatientState {
    fn position_of(&self, patient_id: &str) -> Option<i32> {
        self.rows
            .values()
            .find(|row| row.patient_id == patient_id)
            .map(|row| row.id)
    }

    /// Writes by natural key, keeping this store's own internal ids.
    fn apply(&mut self, record: &PatientRecord) {
        let id = match self.position_of(&record.patient_id) {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        };
        let mut stored = record.clone();
        stored.id = id;
        self.rows.insert(id, stored);
    }
}

fn unavailable(what: &str) -> StoreError {
    StoreError::Database(DbErr::Custom(format!("{what}: connection reset by peer")))
}

#[derive(Clone, Default)]
pub struct MemoryPatientStore {
    state: Arc<Mutex<PatientState>>,
}

impl MemoryPatientStore {
    /// Source-style store that keeps the given internal ids.
    pub fn seeded(records: Vec<PatientRecord>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for record in records {
                state.next_id = state.next_id.max(record.id + 1);
                state.rows.insert(record.id, record);
            }
        }
        store
    }

    /// Writes one record directly, bypassing counters and failures.
    pub fn put(&self, record: PatientRecord) {
        self.state.lock().unwrap().apply(&record);
    }

    pub fn remove(&self, patient_id: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(id) = state.position_of(patient_id) {
            state.rows.remove(&id);
        }
    }

    pub fn contents(&self) -> Vec<PatientRecord> {
        self.state.lock().unwrap().rows.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    pub fn read_count(&self) -> usize {
        self.state.lock().unwrap().reads
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Source ids handed to `upsert`, in call order.
    pub fn submitted_ids(&self) -> Vec<i32> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn reset_submissions(&self) {
        self.state.lock().unwrap().submitted.clear();
    }

    pub fn committed_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().committed_batches.clone()
    }

    /// The nth commit (1-based, counted over the store's lifetime) fails.
    pub fn fail_commit_of_batch(&self, attempt: usize) {
        self.state.lock().unwrap().fail_commit_on = Some(attempt);
    }

    /// The nth `fetch_after` call (1-based) fails.
    pub fn fail_fetch_number(&self, call: usize) {
        self.state.lock().unwrap().fail_fetch_on = Some(call);
    }

    pub fn fail_count(&self) {
        self.state.lock().unwrap().fail_count = true;
    }

    pub fn reject_patient(&self, patient_id: &str) {
        self.state
            .lock()
            .unwrap()
            .rejected
            .insert(patient_id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_commit_on = None;
        state.fail_fetch_on = None;
        state.fail_count = false;
        state.rejected.clear();
    }

    pub fn set_schema(&self, schema: TableSchema) {
        self.state.lock().unwrap().schema = schema;
    }

    fn count_rows(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        if state.fail_count {
            return Err(unavailable("count"));
        }
        Ok(state.rows.len() as u64)
    }
}

#[async_trait]
impl SourceStore for MemoryPatientStore {
    async fn count(&self) -> Result<u64, StoreError> {
        self.count_rows()
    }

    async fn fetch_after(
        &self,
        after: Option<i32>,
        limit: u64,
    ) -> Result<Vec<PatientRecord>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        state.fetch_calls += 1;
        if state.fail_fetch_on == Some(state.fetch_calls) {
            return Err(unavailable("fetch"));
        }
        let lower = after.map_or(i32::MIN, |id| id.saturating_add(1));
        Ok(state
            .rows
            .range(lower..)
            .take(limit as usize)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn sample(&self, size: u64) -> Result<Vec<PatientRecord>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        Ok(state.rows.values().take(size as usize).cloned().collect())
    }
}

#[async_trait]
impl DestinationStore for MemoryPatientStore {
    async fn count(&self) -> Result<u64, StoreError> {
        self.count_rows()
    }

    async fn find_by_natural_key(
        &self,
        patient_id: &str,
    ) -> Result<Option<PatientRecord>, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.reads += 1;
        let found = state
            .position_of(patient_id)
            .and_then(|id| state.rows.get(&id).cloned());
        Ok(found)
    }

    async fn begin_batch(&self) -> Result<Box<dyn DestinationBatch>, StoreError> {
        Ok(Box::new(MemoryBatch {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        }))
    }

    async fn describe_table(&self, table_name: &str) -> Result<TableSchema, StoreError> {
        let state = self.state.lock().unwrap();
        if table_name != "patients" {
            return Ok(TableSchema::default());
        }
        Ok(state.schema.clone())
    }
}

struct MemoryBatch {
    state: Arc<Mutex<PatientState>>,
    staged: Vec<PatientRecord>,
}

#[async_trait]
impl DestinationBatch for MemoryBatch {
    async fn upsert(&mut self, record: &PatientRecord) -> Result<UpsertAction, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.writes += 1;
        state.submitted.push(record.id);
        if state.rejected.contains(&record.patient_id) {
            return Err(StoreError::Invalid(format!(
                "value too long for column medical_condition of {}",
                record.patient_id
            )));
        }

        let current = self
            .staged
            .iter()
            .rev()
            .find(|row| row.patient_id == record.patient_id)
            .cloned()
            .or_else(|| {
                state
                    .position_of(&record.patient_id)
                    .and_then(|id| state.rows.get(&id).cloned())
            });
        self.staged.push(record.clone());
        Ok(match current {
            None => UpsertAction::Inserted,
            Some(existing) if existing.same_contents(record) => UpsertAction::Unchanged,
            Some(_) => UpsertAction::Updated,
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        state.commit_attempts += 1;
        if state.fail_commit_on == Some(state.commit_attempts) {
            return Err(unavailable("commit"));
        }
        for record in &self.staged {
            state.apply(record);
        }
        state.committed_batches.push(self.staged.len());
        Ok(())
    }
}

#[derive(Default)]
struct CheckpointState {
    current: HashMap<String, Checkpoint>,
    history: Vec<CheckpointUpdate>,
    saves: usize,
    fail_save_on: Option<usize>,
}

impl CheckpointState {
    fn store(&mut self, update: CheckpointUpdate) -> Checkpoint {
        let now = fixed_now();
        let created_at = self
            .current
            .get(&update.unit_name)
            .map_or(now, |existing| existing.created_at);
        let checkpoint = Checkpoint {
            unit_name: update.unit_name.clone(),
            last_record_id: update.last_record_id,
            batch_number: Some(update.batch_number),
            records_migrated: update.records_migrated,
            status: update.status,
            error_message: update.error_message,
            created_at,
            updated_at: now,
        };
        self.current
            .insert(checkpoint.unit_name.clone(), checkpoint.clone());
        checkpoint
    }
}

#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    state: Arc<Mutex<CheckpointState>>,
}

impl MemoryCheckpointStore {
    /// Stores a checkpoint without counting it as a save.
    pub fn seed(&self, update: CheckpointUpdate) {
        let update = update.normalized().expect("valid seed checkpoint");
        self.state.lock().unwrap().store(update);
    }

    pub fn current(&self, unit_name: &str) -> Option<Checkpoint> {
        self.state.lock().unwrap().current.get(unit_name).cloned()
    }

    /// Every successful save, in order.
    pub fn history(&self) -> Vec<CheckpointUpdate> {
        self.state.lock().unwrap().history.clone()
    }

    pub fn save_count(&self) -> usize {
        self.state.lock().unwrap().saves
    }

    /// The nth `save` call (1-based) fails and stores nothing.
    pub fn fail_save_number(&self, call: usize) {
        self.state.lock().unwrap().fail_save_on = Some(call);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(&self, unit_name: &str) -> Result<Option<Checkpoint>, StoreError> {
        Ok(self.current(unit_name))
    }

    async fn save(&self, update: CheckpointUpdate) -> Result<Checkpoint, StoreError> {
        let update = update.normalized()?;
        let mut state = self.state.lock().unwrap();
        state.saves += 1;
        if state.fail_save_on == Some(state.saves) {
            return Err(unavailable("checkpoint"));
        }
        state.history.push(update.clone());
        Ok(state.store(update))
    }
}
