//! Imports patients from a JSON document shaped like `{"patients": [..]}`.
//!
//! Entries may use the API's camelCase names (`patientID`, `medicalCondition`,
//! `lastVisit`) or the storage snake_case names. Each entry is validated like a
//! `POST /patients` body and inserted on its own, so one bad entry never stops
//! the rest of the file.

use std::str::FromStr;

use chrono::NaiveDate;
use sea_orm::{ActiveModelTrait, ConnectionTrait};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::fixed_now;
use crate::models::patient::PatientCreate;
use crate::patient::Gender;

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("seed document is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Entries without a patient ID.
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl SeedSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }
}

#[derive(Debug, Deserialize)]
struct SeedDocument {
    #[serde(default)]
    patients: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeedEntry {
    #[serde(rename = "patientID", alias = "patient_id")]
    patient_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    age: i32,
    #[serde(default)]
    gender: String,
    #[serde(default, alias = "medical_condition")]
    medical_condition: String,
    #[serde(alias = "last_visit")]
    last_visit: Option<NaiveDate>,
}

impl SeedEntry {
    fn into_create(self) -> Result<PatientCreate, String> {
        let gender = Gender::from_str(&self.gender).map_err(|err| err.to_string())?;
        let last_visit = self
            .last_visit
            .ok_or_else(|| "lastVisit is required".to_string())?;
        Ok(PatientCreate {
            patient_id: self.patient_id,
            name: self.name,
            age: self.age,
            gender,
            medical_condition: self.medical_condition,
            last_visit,
        })
    }
}

/// Non-empty `patientID` (or `patient_id`) string of a raw entry.
fn entry_patient_id(entry: &Value) -> Option<&str> {
    ["patientID", "patient_id"]
        .into_iter()
        .filter_map(|key| entry.get(key))
        .find_map(|value| value.as_str().filter(|id| !id.is_empty()))
}

pub async fn import_patients<C: ConnectionTrait>(
    db: &C,
    document: &str,
) -> Result<SeedSummary, SeedError> {
    let document: SeedDocument = serde_json::from_str(document)?;
    let mut summary = SeedSummary {
        total: document.patients.len(),
        ..SeedSummary::default()
    };
    info!("Found {} patients to import", summary.total);

    for (index, entry) in document.patients.into_iter().enumerate() {
        let position = index + 1;
        let Some(patient_id) = entry_patient_id(&entry).map(str::to_string) else {
            warn!("Skipping patient {position}: missing patientID");
            summary.errors.push(format!("Patient {position}: Missing patientID"));
            summary.skipped += 1;
            continue;
        };

        match import_entry(db, entry).await {
            Ok(name) => {
                summary.successful += 1;
                info!(
                    "Imported patient {position}/{}: {patient_id} - {name}",
                    summary.total
                );
            }
            Err(message) => {
                let message = format!("Patient {position} ({patient_id}): {message}");
                warn!("Failed to import {message}");
                summary.errors.push(message);
                summary.failed += 1;
            }
        }
    }

    info!(
        "Seed import finished: {} successful, {} failed, {} skipped",
        summary.successful, summary.failed, summary.skipped
    );
    Ok(summary)
}

async fn import_entry<C: ConnectionTrait>(db: &C, entry: Value) -> Result<String, String> {
    let entry: SeedEntry = serde_json::from_value(entry).map_err(|err| err.to_string())?;
    let patient = entry
        .into_create()?
        .validate()
        .map_err(|err| err.to_string())?;
    let inserted = patient
        .into_active_model(fixed_now())
        .insert(db)
        .await
        .map_err(|err| err.to_string())?;
    Ok(inserted.name)
}
