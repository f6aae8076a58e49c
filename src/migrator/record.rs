use chrono::NaiveDate;

use crate::entities::patient;

/// Mutable domain fields, compared by the verifier and overwritten by upserts.
pub const COMPARED_FIELDS: [&str; 5] = ["name", "age", "gender", "medical_condition", "last_visit"];

/// A patient row as it travels between databases.
///
/// `id` is the internal key of whichever database the row was read from. It
/// orders the copy and positions the checkpoint but is never written to the
/// destination; rows are matched across databases by `patient_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatientRecord {
    pub id: i32,
    pub patient_id: String,
    pub name: String,
    pub age: i32,
    pub gender: String,
    pub medical_condition: String,
    pub last_visit: NaiveDate,
}

impl PatientRecord {
    /// Names of the compared fields whose values differ, in declaration order.
    pub fn differing_fields(&self, other: &Self) -> Vec<&'static str> {
        let checks = [
            self.name != other.name,
            self.age != other.age,
            self.gender != other.gender,
            self.medical_condition != other.medical_condition,
            self.last_visit != other.last_visit,
        ];
        COMPARED_FIELDS
            .iter()
            .zip(checks)
            .filter_map(|(field, differs)| differs.then_some(*field))
            .collect()
    }

    pub fn same_contents(&self, other: &Self) -> bool {
        self.patient_id == other.patient_id && self.differing_fields(other).is_empty()
    }
}

impl From<patient::Model> for PatientRecord {
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
