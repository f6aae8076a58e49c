use chrono::{DateTime, FixedOffset, NaiveDate};
use sea_orm::ActiveValue::Set;
use serde::{Deserialize, Serialize};

use crate::entities::patient;
use crate::patient::{
    Gender, PatientError, canonicalize_medical_condition, canonicalize_name,
    canonicalize_patient_id, validate_age,
};

/// Request body for `POST /patients`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientCreate {
    #[serde(rename = "patientID")]
    pub patient_id: String,
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub medical_condition: String,
    pub last_visit: NaiveDate,
}

/// Request body for `PUT /patients/{patientID}`; absent fields are left as is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientUpdate {
    #[serde(rename = "patientID")]
    pub patient_id: Option<String>,
    pub name: Option<String>,
    pub age: Option<i32>,
    pub gender: Option<Gender>,
    pub medical_condition: Option<String>,
    pub last_visit: Option<NaiveDate>,
}

/// A create request after validation, in storage naming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPatient {
    pub patient_id: String,
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    pub medical_condition: String,
    pub last_visit: NaiveDate,
}

impl PatientCreate {
    pub fn validate(self) -> Result<NewPatient, PatientError> {
        Ok(NewPatient {
            patient_id: canonicalize_patient_id(&self.patient_id)?,
            name: canonicalize_name(&self.name)?,
            age: validate_age(self.age)?,
            gender: self.gender,
            medical_condition: canonicalize_medical_condition(&self.medical_condition)?,
            last_visit: self.last_visit,
        })
    }
}

impl NewPatient {
    /// Insertable row stamped with `now` for both timestamps.
    pub fn into_active_model(self, now: DateTime<FixedOffset>) -> patient::ActiveModel {
        patient::ActiveModel {
            patient_id: Set(self.patient_id),
            name: Set(self.name),
            age: Set(self.age),
            gender: Set(self.gender.to_string()),
            medical_condition: Set(self.medical_condition),
            last_visit: Set(self.last_visit),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
    }
}

impl PatientUpdate {
    pub fn validate(self) -> Result<Self, PatientError> {
        Ok(Self {
            patient_id: self
                .patient_id
                .as_deref()
                .map(canonicalize_patient_id)
                .transpose()?,
            name: self.name.as_deref().map(canonicalize_name).transpose()?,
            age: self.age.map(validate_age).transpose()?,
            gender: self.gender,
            medical_condition: self
                .medical_condition
                .as_deref()
                .map(canonicalize_medical_condition)
                .transpose()?,
            last_visit: self.last_visit,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patient_id.is_none()
            && self.name.is_none()
            && self.age.is_none()
            && self.gender.is_none()
            && self.medical_condition.is_none()
            && self.last_visit.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientResponse {
    pub id: i32,
    #[serde(rename = "patientID")]
    pub patient_id: String,
    pub name: String,
    pub age: i32,
    pub gender: String,
    pub medical_condition: String,
    pub last_visit: NaiveDate,
}

impl From<patient::Model> for PatientResponse {
    fn from(model: patient::Model) -> Self {
        Self {
            id: model.id,
            patient_id: model.patient_id,
            name: model.name,
            age: model.age,
            gender: model.gender,
            medical_condition: model.medical_condition,
            last_visit: model.last_visit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse {
    pub items: Vec<PatientResponse>,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientListQuery {
    pub search: Option<String>,
    pub page: Option<u64>,
    #[serde(alias = "page_size")]
    pub page_size: Option<u64>,
    #[serde(alias = "sort_by")]
    pub sort_by: Option<String>,
    #[serde(alias = "sort_order")]
    pub sort_order: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_uses_camel_case() {
        let body = r#"{
            "patientID": " P001 ",
            "name": "Jane Doe",
            "age": 34,
            "gender": "Female",
            "medicalCondition": "Asthma",
            "lastVisit": "2024-05-17"
        }"#;
        let request: PatientCreate = serde_json::from_str(body).expect("valid body");
        let patient = request.validate().expect("valid patient");
        assert_eq!(patient.patient_id, "P001");
        assert_eq!(patient.gender, Gender::Female);
        assert_eq!(
            patient.last_visit,
            NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
        );
    }

    #[test]
    fn unknown_gender_is_rejected_at_parse_time() {
        let body = r#"{"patientID":"P1","name":"A","age":1,"gender":"male",
            "medicalCondition":"B","lastVisit":"2024-01-01"}"#;
        assert!(serde_json::from_str::<PatientCreate>(body).is_err());
    }

    #[test]
    fn update_validates_only_present_fields() {
        let update: PatientUpdate = serde_json::from_str(r#"{"age": 0}"#).unwrap();
        assert_eq!(update.validate().unwrap_err(), PatientError::InvalidAge(0));

        let update: PatientUpdate = serde_json::from_str(r#"{"name": " Bob "}"#).unwrap();
        let update = update.validate().unwrap();
        assert_eq!(update.name.as_deref(), Some("Bob"));
        assert!(!update.is_empty());
        assert!(PatientUpdate::default().is_empty());
    }

    #[test]
    fn response_serializes_wire_names() {
        let response = PatientResponse {
            id: 7,
            patient_id: "P007".to_string(),
            name: "Ann".to_string(),
            age: 61,
            gender: "Other".to_string(),
            medical_condition: "Diabetes".to_string(),
            last_visit: NaiveDate::from_ymd_opt(2023, 12, 1).unwrap(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["patientID"], "P007");
        assert_eq!(json["medicalCondition"], "Diabetes");
        assert_eq!(json["lastVisit"], "2023-12-01");
    }
}
