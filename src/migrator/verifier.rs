use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::{error, info, warn};

use super::MigrationError;
use super::store::{ConstraintInfo, DestinationStore, SourceStore};
use crate::clock::fixed_now;

/// Itemised sample problems kept in a report.
pub const MAX_SAMPLE_ERRORS: usize = 20;
/// Itemised sample problems printed by [`VerificationReport::render`].
pub const MAX_RENDERED_ERRORS: usize = 10;

const RULE_WIDTH: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CountCheck {
    pub table_name: String,
    pub source_count: Option<u64>,
    pub destination_count: Option<u64>,
    pub matches: bool,
    pub difference: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub patient_id: String,
    pub fields: Vec<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SampleCheck {
    pub sample_size: usize,
    pub matched: usize,
    pub mismatched: Vec<Mismatch>,
    pub missing: Vec<String>,
    /// Human-readable problems, capped at [`MAX_SAMPLE_ERRORS`].
    pub errors: Vec<String>,
    pub error: Option<String>,
}

impl SampleCheck {
    fn note(&mut self, message: String) {
        if self.errors.len() < MAX_SAMPLE_ERRORS {
            self.errors.push(message);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaCheck {
    pub table_name: String,
    pub table_exists: bool,
    pub indexes: Vec<String>,
    pub constraints: Vec<ConstraintInfo>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub generated_at: DateTime<FixedOffset>,
    pub counts: CountCheck,
    pub sample: SampleCheck,
    pub schema: SchemaCheck,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.counts.matches
            && self.sample.error.is_none()
            && self.sample.mismatched.is_empty()
            && self.sample.missing.is_empty()
            && self.schema.table_exists
    }

    /// Pretty JSON of every check plus the overall `passed` flag.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let mut value = serde_json::to_value(self)?;
        value["passed"] = self.passed().into();
        serde_json::to_string_pretty(&value)
    }

    pub fn render(&self) -> String {
        let rule = "=".repeat(RULE_WIDTH);
        let thin = "-".repeat(RULE_WIDTH);
        let mark = |ok: bool| if ok { "YES" } else { "NO" };
        let mut out = String::new();

        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "Migration Verification Report");
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(
            out,
            "Generated: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S %:z")
        );
        let _ = writeln!(out);

        let _ = writeln!(out, "Record Count Comparison");
        let _ = writeln!(out, "{thin}");
        let counts = &self.counts;
        match counts.error.as_deref() {
            Some(err) => {
                let _ = writeln!(out, "Error: {err}");
            }
            None => {
                let _ = writeln!(out, "Table: {}", counts.table_name);
                let _ = writeln!(out, "Source count: {}", display_count(counts.source_count));
                let _ = writeln!(
                    out,
                    "Destination count: {}",
                    display_count(counts.destination_count)
                );
                let _ = writeln!(out, "Match: {}", mark(counts.matches));
                if !counts.matches {
                    let _ = writeln!(out, "Difference: {} records", counts.difference);
                }
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Sample Record Comparison");
        let _ = writeln!(out, "{thin}");
        let sample = &self.sample;
        if let Some(err) = sample.error.as_deref() {
            let _ = writeln!(out, "Error: {err}");
        }
        let _ = writeln!(out, "Sample size: {}", sample.sample_size);
        let _ = writeln!(out, "Matched: {}", sample.matched);
        let _ = writeln!(out, "Mismatched: {}", sample.mismatched.len());
        let _ = writeln!(out, "Missing: {}", sample.missing.len());
        if !sample.errors.is_empty() {
            let _ = writeln!(out, "Errors found ({}):", sample.errors.len());
            for err in sample.errors.iter().take(MAX_RENDERED_ERRORS) {
                let _ = writeln!(out, "  - {err}");
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Schema Verification");
        let _ = writeln!(out, "{thin}");
        let schema = &self.schema;
        match schema.error.as_deref() {
            Some(err) => {
                let _ = writeln!(out, "Error: {err}");
            }
            None => {
                let _ = writeln!(out, "Table: {}", schema.table_name);
                let _ = writeln!(out, "Table exists: {}", mark(schema.table_exists));
                let _ = writeln!(out, "Indexes: {}", schema.indexes.len());
                for index in &schema.indexes {
                    let _ = writeln!(out, "  - {index}");
                }
                let _ = writeln!(out, "Constraints: {}", schema.constraints.len());
                for constraint in &schema.constraints {
                    let _ = writeln!(out, "  - {} ({})", constraint.name, constraint.kind);
                }
            }
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "{rule}");
        let status = if self.passed() { "PASSED" } else { "FAILED" };
        let _ = writeln!(out, "Overall Status: {status}");
        let _ = writeln!(out, "{rule}");
        out
    }
}

fn display_count(count: Option<u64>) -> String {
    count.map_or_else(|| "unknown".to_string(), |count| count.to_string())
}

/// Read-only comparison of a finished migration.
pub struct Verifier<'a> {
    source: &'a dyn SourceStore,
    destination: &'a dyn DestinationStore,
    table_name: String,
    sample_size: u64,
}

impl<'a> Verifier<'a> {
    pub fn new(
        source: &'a dyn SourceStore,
        destination: &'a dyn DestinationStore,
        table_name: impl Into<String>,
        sample_size: u64,
    ) -> Result<Self, MigrationError> {
        let table_name = table_name.into();
        if table_name.trim().is_empty() {
            return Err(MigrationError::InvalidInput(
                "table name cannot be empty".to_string(),
            ));
        }
        if sample_size == 0 {
            return Err(MigrationError::InvalidInput(
                "sample size must be positive".to_string(),
            ));
        }
        Ok(Self {
            source,
            destination,
            table_name,
            sample_size,
        })
    }

    pub async fn run(&self) -> VerificationReport {
        info!("Verifying migration of {}", self.table_name);
        let counts = self.count_check().await;
        let sample = self.sample_check().await;
        let schema = self.schema_check().await;
        let report = VerificationReport {
            generated_at: fixed_now(),
            counts,
            sample,
            schema,
        };
        if report.passed() {
            info!("Verification of {} passed", self.table_name);
        } else {
            warn!("Verification of {} failed", self.table_name);
        }
        report
    }

    pub async fn count_check(&self) -> CountCheck {
        info!("Comparing record counts for {}", self.table_name);
        let counts = async {
            let source = self.source.count().await?;
            let destination = self.destination.count().await?;
            Ok::<_, super::StoreError>((source, destination))
        }
        .await;

        match counts {
            Ok((source, destination)) => {
                let matches = source == destination;
                info!("Source count: {source}, destination count: {destination}");
                CountCheck {
                    table_name: self.table_name.clone(),
                    source_count: Some(source),
                    destination_count: Some(destination),
                    matches,
                    difference: source.abs_diff(destination),
                    error: None,
                }
            }
            Err(err) => {
                error!("Error comparing record counts: {err}");
                CountCheck {
                    table_name: self.table_name.clone(),
                    source_count: None,
                    destination_count: None,
                    matches: false,
                    difference: 0,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    pub async fn sample_check(&self) -> SampleCheck {
        info!("Comparing a sample of up to {} records", self.sample_size);
        let records = match self.source.sample(self.sample_size).await {
            Ok(records) => records,
            Err(err) => {
                error!("Error sampling source records: {err}");
                return SampleCheck {
                    error: Some(err.to_string()),
                    ..Default::default()
                };
            }
        };
        if records.is_empty() {
            warn!("No records found in source database");
        }

        let mut check = SampleCheck {
            sample_size: records.len(),
            ..Default::default()
        };
        for record in &records {
            match self.destination.find_by_natural_key(&record.patient_id).await {
                Ok(None) => {
                    check.missing.push(record.patient_id.clone());
                    check.note(format!("Patient {}: missing at destination", record.patient_id));
                }
                Ok(Some(stored)) => {
                    let fields = record.differing_fields(&stored);
                    if fields.is_empty() {
                        check.matched += 1;
                    } else {
                        check.note(format!(
                            "Patient {}: mismatched fields: {}",
                            record.patient_id,
                            fields.join(", ")
                        ));
                        check.mismatched.push(Mismatch {
                            patient_id: record.patient_id.clone(),
                            fields,
                        });
                    }
                }
                Err(err) => {
                    check.note(format!("Patient {}: error comparing: {err}", record.patient_id));
                    check.mismatched.push(Mismatch {
                        patient_id: record.patient_id.clone(),
                        fields: Vec::new(),
                    });
                }
            }
        }
        info!(
            "Sample comparison: {} matched, {} mismatched, {} missing",
            check.matched,
            check.mismatched.len(),
            check.missing.len()
        );
        check
    }

    pub async fn schema_check(&self) -> SchemaCheck {
        info!("Verifying schema for {}", self.table_name);
        match self.destination.describe_table(&self.table_name).await {
            Ok(schema) => {
                info!(
                    "Table exists: {}, {} indexes, {} constraints",
                    schema.table_exists,
                    schema.indexes.len(),
                    schema.constraints.len()
                );
                SchemaCheck {
                    table_name: self.table_name.clone(),
                    table_exists: schema.table_exists,
                    indexes: schema.indexes,
                    constraints: schema.constraints,
                    error: None,
                }
            }
            Err(err) => {
                error!("Error verifying schema: {err}");
                SchemaCheck {
                    table_name: self.table_name.clone(),
                    table_exists: false,
                    indexes: Vec::new(),
                    constraints: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        }
    }
}
