// crates/fleet-core/src/job.rs
//
// Training job records and their lifecycle state machine.
//
//   Submitted -> Running -> Completed
//       |           |----> Failed
//       |           |----> Canceled
//       |           '----> TimedOut
//       '-----------------> (any terminal state)
//
// Terminal states never transition again. `TimedOut` is assigned by the
// monitor, never reported by a backend.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FleetError;
use crate::fingerprint::Fingerprint;
use crate::resource::{tag, ResourceRef, Tags};
use crate::unit::UnitId;

/// Backend-issued handle used to query a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(pub String);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Job status as reported by the compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendJobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl BackendJobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackendJobStatus::Completed | BackendJobStatus::Failed | BackendJobStatus::Canceled
        )
    }
}

/// Result of one `get_job_status` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub status: BackendJobStatus,
    /// Trained artifact location, present once the job completed.
    #[serde(default)]
    pub output_ref: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Backend-supplied detail, typically the failure reason.
    #[serde(default)]
    pub message: Option<String>,
}

impl JobStatusReport {
    pub fn new(status: BackendJobStatus) -> Self {
        Self {
            status,
            output_ref: None,
            metrics: BTreeMap::new(),
            message: None,
        }
    }
}

/// Orchestrator-side lifecycle state of a training job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Failed,
    Canceled,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Submitted | JobState::Running)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Submitted, JobState::Submitted) => false,
            (JobState::Submitted, _) => true,
            (JobState::Running, JobState::Submitted) | (JobState::Running, JobState::Running) => {
                false
            }
            (JobState::Running, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Submitted => write!(f, "Submitted"),
            JobState::Running => write!(f, "Running"),
            JobState::Completed => write!(f, "Completed"),
            JobState::Failed => write!(f, "Failed"),
            JobState::Canceled => write!(f, "Canceled"),
            JobState::TimedOut => write!(f, "TimedOut"),
        }
    }
}

impl From<BackendJobStatus> for JobState {
    fn from(status: BackendJobStatus) -> Self {
        match status {
            BackendJobStatus::Queued => JobState::Submitted,
            BackendJobStatus::Running => JobState::Running,
            BackendJobStatus::Completed => JobState::Completed,
            BackendJobStatus::Failed => JobState::Failed,
            BackendJobStatus::Canceled => JobState::Canceled,
        }
    }
}

/// A submitted training job. Kept as an audit record after it finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingJob {
    /// Deterministic name; a resubmission of the same work collides on it.
    pub job_name: String,
    pub handle: JobHandle,
    pub unit: UnitId,
    pub model_name: String,
    pub cutoff_date: String,
    /// Data snapshot the job trains on.
    pub data_resource: ResourceRef,
    /// Captured at submission so later stages never re-derive it.
    pub training_fingerprint: Fingerprint,
    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output_ref: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl TrainingJob {
    /// Move to `next`, rejecting transitions out of terminal states.
    pub fn transition(&mut self, next: JobState) -> Result<(), FleetError> {
        if !self.state.can_transition_to(next) {
            return Err(FleetError::InvalidTransition(format!(
                "job {}: {} -> {}",
                self.job_name, self.state, next
            )));
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Fold a backend status report into this job.
    ///
    /// Returns `true` when the job reached a terminal state with this report.
    /// A report that repeats the current state is a no-op.
    pub fn apply_report(&mut self, report: &JobStatusReport) -> Result<bool, FleetError> {
        let next = JobState::from(report.status);
        if next == self.state {
            return Ok(false);
        }
        if next == JobState::Submitted && self.state == JobState::Running {
            // Some backends briefly report a requeue; keep Running.
            return Ok(false);
        }
        self.transition(next)?;
        if next.is_terminal() {
            self.output_ref = report.output_ref.clone();
            self.metrics = report.metrics.clone();
            self.message = report.message.clone();
        }
        Ok(next.is_terminal())
    }

    /// Mark the job as abandoned by the monitor. The backend job keeps running.
    pub fn time_out(&mut self, elapsed_secs: u64) -> Result<(), FleetError> {
        self.transition(JobState::TimedOut)?;
        self.message = Some(format!(
            "monitoring stopped after {}s without a terminal status",
            elapsed_secs
        ));
        Ok(())
    }

    /// Metadata attached to the backend submission for lineage.
    pub fn metadata(&self) -> Tags {
        let mut meta = Tags::new();
        meta.insert(tag::PLANT_ID.to_string(), self.unit.plant_id.clone());
        meta.insert(tag::CIRCUIT_ID.to_string(), self.unit.circuit_id.clone());
        meta.insert(tag::CUTOFF_DATE.to_string(), self.cutoff_date.clone());
        meta.insert(tag::MODEL_NAME.to_string(), self.model_name.clone());
        meta.insert(tag::DATA_RESOURCE.to_string(), self.data_resource.to_string());
        meta.insert(
            tag::TRAINING_FINGERPRINT.to_string(),
            self.training_fingerprint.to_string(),
        );
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> TrainingJob {
        TrainingJob {
            job_name: "P1_C1_2025_01_01_v1_abcdefghijkl".to_string(),
            handle: JobHandle("h-1".to_string()),
            unit: UnitId::new("P1", "C1"),
            model_name: "p1-c1".to_string(),
            cutoff_date: "2025-01-01".to_string(),
            data_resource: ResourceRef::new("P1_C1", 1),
            training_fingerprint: Fingerprint::parse("abcdefghijkl").unwrap(),
            state: JobState::Submitted,
            submitted_at: Utc::now(),
            finished_at: None,
            output_ref: None,
            metrics: BTreeMap::new(),
            message: None,
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut j = job();
        assert!(!j.apply_report(&JobStatusReport::new(BackendJobStatus::Queued)).unwrap());
        assert!(!j.apply_report(&JobStatusReport::new(BackendJobStatus::Running)).unwrap());
        assert_eq!(j.state, JobState::Running);

        let mut done = JobStatusReport::new(BackendJobStatus::Completed);
        done.output_ref = Some("jobs/x/outputs/model".to_string());
        done.metrics.insert("val_loss".to_string(), 0.12);
        assert!(j.apply_report(&done).unwrap());
        assert_eq!(j.state, JobState::Completed);
        assert_eq!(j.output_ref.as_deref(), Some("jobs/x/outputs/model"));
        assert!(j.finished_at.is_some());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut j = job();
        j.transition(JobState::Failed).unwrap();
        assert!(j.transition(JobState::Running).is_err());
        assert!(j.transition(JobState::Completed).is_err());
        assert!(j.time_out(10).is_err());
        // Repeating the terminal report is harmless.
        assert!(!j.apply_report(&JobStatusReport::new(BackendJobStatus::Failed)).unwrap());
    }

    #[test]
    fn test_requeue_keeps_running() {
        let mut j = job();
        j.transition(JobState::Running).unwrap();
        assert!(!j.apply_report(&JobStatusReport::new(BackendJobStatus::Queued)).unwrap());
        assert_eq!(j.state, JobState::Running);
    }

    #[test]
    fn test_timeout_from_running() {
        let mut j = job();
        j.transition(JobState::Running).unwrap();
        j.time_out(120).unwrap();
        assert_eq!(j.state, JobState::TimedOut);
        assert!(j.message.as_deref().unwrap().contains("120s"));
    }

    #[test]
    fn test_metadata_carries_lineage() {
        let meta = job().metadata();
        assert_eq!(meta.get(tag::TRAINING_FINGERPRINT).unwrap(), "abcdefghijkl");
        assert_eq!(meta.get(tag::DATA_RESOURCE).unwrap(), "P1_C1:v1");
        assert_eq!(meta.get(tag::PLANT_ID).unwrap(), "P1");
    }
}
