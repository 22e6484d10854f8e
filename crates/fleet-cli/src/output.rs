// crates/fleet-cli/src/output.rs
//
// Output formatting utilities for the fleet CLI.
// Supports table and JSON output modes.

use serde::Serialize;
use tabled::{Table, Tabled};

use fleet_core::error::UnitFailure;
use fleet_core::job::TrainingJob;
use fleet_core::promotion::PromotionRecord;
use fleet_pipeline::{ChangedUnit, DataSnapshot, RegisteredModel};

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Pretty-printed table output (default).
    Table,
    /// JSON output for machine consumption.
    Json,
}

/// Format a slice of Tabled items as a table string.
pub fn format_table<T: Tabled>(data: &[T]) -> String {
    Table::new(data).to_string()
}

/// Format a serializable value as a pretty-printed JSON string.
pub fn format_json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|e| format!("JSON serialization error: {}", e))
}

/// Print a titled table, or a placeholder line when there are no rows.
pub fn print_section<T: Tabled>(title: &str, rows: &[T]) {
    println!("{} ({})", title, rows.len());
    if !rows.is_empty() {
        println!("{}", format_table(rows));
    }
    println!();
}

pub fn print_failures(failures: &[UnitFailure]) {
    if failures.is_empty() {
        return;
    }
    let rows: Vec<FailureRow> = failures.iter().map(FailureRow::from).collect();
    print_section("Failures", &rows);
}

#[derive(Tabled)]
pub struct ChangedRow {
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Data FP")]
    data_fingerprint: String,
    #[tabled(rename = "Training FP")]
    training_fingerprint: String,
    #[tabled(rename = "Last Training FP")]
    last_training_fingerprint: String,
}

impl From<&ChangedUnit> for ChangedRow {
    fn from(c: &ChangedUnit) -> Self {
        Self {
            unit: c.unit().to_string(),
            reason: format!("{:?}", c.reason),
            data_fingerprint: c.data_fingerprint.to_string(),
            training_fingerprint: c.training_fingerprint.to_string(),
            last_training_fingerprint: c
                .last_training_fingerprint
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_else(|| "--".to_string()),
        }
    }
}

#[derive(Tabled)]
pub struct SnapshotRow {
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "New")]
    created: bool,
    #[tabled(rename = "Payload")]
    payload_ref: String,
}

impl From<&DataSnapshot> for SnapshotRow {
    fn from(s: &DataSnapshot) -> Self {
        Self {
            unit: s.unit().to_string(),
            resource: s.resource.to_string(),
            created: s.created,
            payload_ref: s.payload_ref.clone(),
        }
    }
}

#[derive(Tabled)]
pub struct JobRow {
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Job")]
    job_name: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&TrainingJob> for JobRow {
    fn from(j: &TrainingJob) -> Self {
        Self {
            unit: j.unit.to_string(),
            job_name: j.job_name.clone(),
            state: j.state.to_string(),
            message: j.message.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
pub struct ModelRow {
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "New")]
    created: bool,
    #[tabled(rename = "Approval Key")]
    approval_key: String,
}

impl From<&RegisteredModel> for ModelRow {
    fn from(m: &RegisteredModel) -> Self {
        Self {
            unit: m.candidate.unit.to_string(),
            model: m.candidate.model.to_string(),
            created: m.created,
            approval_key: m.candidate.approval_key(),
        }
    }
}

#[derive(Tabled)]
pub struct PromotionRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Approval Key")]
    approval_key: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Verified")]
    verified: bool,
    #[tabled(rename = "Error")]
    error: String,
}

impl From<&PromotionRecord> for PromotionRow {
    fn from(r: &PromotionRecord) -> Self {
        Self {
            model: r.candidate.model.to_string(),
            approval_key: r.candidate.approval_key(),
            status: format!("{:?}", r.status()),
            verified: r.verified,
            error: r.error.clone().unwrap_or_default(),
        }
    }
}

#[derive(Tabled)]
pub struct FailureRow {
    #[tabled(rename = "Unit")]
    unit: String,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&UnitFailure> for FailureRow {
    fn from(f: &UnitFailure) -> Self {
        Self {
            unit: f.unit.to_string(),
            stage: f.stage.clone(),
            kind: format!("{:?}", f.kind),
            message: f.message.clone(),
        }
    }
}

#[derive(Tabled)]
pub struct FingerprintRow {
    #[tabled(rename = "Unit")]
    pub unit: String,
    #[tabled(rename = "Model")]
    pub model_name: String,
    #[tabled(rename = "Data FP")]
    pub data_fingerprint: String,
    #[tabled(rename = "Training FP")]
    pub training_fingerprint: String,
}
