use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_PATIENT_ID_LEN: usize = 50;
pub const MAX_NAME_LEN: usize = 255;
pub const MAX_MEDICAL_CONDITION_LEN: usize = 255;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatientError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
    #[error("{field} must be at most {max} characters, got {actual}")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },
    #[error("age must be greater than zero, got {0}")]
    InvalidAge(i32),
    #[error("gender must be one of Male, Female, Other; got {0:?}")]
    InvalidGender(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "Male",
            Self::Female => "Female",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = PatientError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Male" => Ok(Self::Male),
            "Female" => Ok(Self::Female),
            "Other" => Ok(Self::Other),
            other => Err(PatientError::InvalidGender(other.to_string())),
        }
    }
}

pub fn canonicalize_patient_id(value: &str) -> Result<String, PatientError> {
    bounded_text(value, "patientID", MAX_PATIENT_ID_LEN)
}

pub fn canonicalize_name(value: &str) -> Result<String, PatientError> {
    bounded_text(value, "name", MAX_NAME_LEN)
}

pub fn canonicalize_medical_condition(value: &str) -> Result<String, PatientError> {
    bounded_text(value, "medicalCondition", MAX_MEDICAL_CONDITION_LEN)
}

pub fn validate_age(age: i32) -> Result<i32, PatientError> {
    if age <= 0 {
        return Err(PatientError::InvalidAge(age));
    }
    Ok(age)
}

fn bounded_text(value: &str, field: &'static str, max: usize) -> Result<String, PatientError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PatientError::Empty { field });
    }
    let actual = trimmed.chars().count();
    if actual > max {
        return Err(PatientError::TooLong { field, max, actual });
    }
    Ok(trimmed.to_string())
}

/// Sort keys accepted on the wire, mapped onto storage columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    PatientId,
    Name,
    Age,
}

impl SortKey {
    /// Unknown keys fall back to the natural key.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("name") => Self::Name,
            Some("age") => Self::Age,
            _ => Self::PatientId,
        }
    }
}

pub fn total_pages(total: u64, page_size: u64) -> u64 {
    assert!(page_size > 0, "Page size must be positive");
    total.div_ceil(page_size)
}

/// Row offset of a 1-based page, or `None` when it does not fit a signed
/// 64-bit SQL integer.
pub fn page_offset(page: u64, page_size: u64) -> Option<u64> {
    assert!(page > 0, "Page numbers start at 1");
    (page - 1)
        .checked_mul(page_size)
        .filter(|offset| i64::try_from(*offset).is_ok())
}
