// crates/fleet-pipeline/src/orchestrator.rs
//
// Job submission: one training job per data snapshot, issued concurrently
// up to a parallelism bound, with per-unit failure isolation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use fleet_core::error::{FailureKind, FleetError, UnitFailure};
use fleet_core::fingerprint::Fingerprint;
use fleet_core::job::{JobHandle, JobState, TrainingJob};
use fleet_core::resource::{ResourceRef, Tags};
use fleet_core::traits::ComputeBackend;
use fleet_core::unit::{UnitConfig, UnitId};

use crate::records::StageReport;
use crate::registrar::DataSnapshot;

pub const STAGE: &str = "submit";

/// Keys of the `inputs` map handed to the compute backend.
pub mod input {
    pub const DATA_RESOURCE: &str = "data_resource";
    pub const DATA_PAYLOAD: &str = "data_payload";
    pub const FEATURES: &str = "features";
    pub const HYPERPARAMETERS: &str = "hyperparameters";
    pub const ENVIRONMENT_VERSION: &str = "environment_version";
    pub const CODE_VERSION: &str = "code_version";
}

/// Jobs submitted in one pass, plus the unresolved jobs of earlier passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub generated_at: DateTime<Utc>,
    pub jobs: Vec<TrainingJob>,
    /// Jobs submitted by an earlier pass that had not reached a terminal
    /// state when this pass ran. They stay on record until monitored.
    #[serde(default)]
    pub carried_over: Vec<TrainingJob>,
    pub failures: Vec<UnitFailure>,
}

impl SubmissionReport {
    /// Every job this record tracks: new submissions, then carried-over ones.
    pub fn tracked(&self) -> impl Iterator<Item = &TrainingJob> {
        self.jobs.iter().chain(self.carried_over.iter())
    }

    /// Tracked jobs not yet in a terminal state.
    pub fn in_flight(&self) -> impl Iterator<Item = &TrainingJob> {
        self.tracked().filter(|j| !j.state.is_terminal())
    }
}

impl StageReport for SubmissionReport {
    const FILE_NAME: &'static str = "training_jobs.json";
    const STAGE: &'static str = STAGE;

    fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }
}

/// Deterministic job name for a unit, cutoff, snapshot version, and
/// training fingerprint.
///
/// Resubmitting identical work collides at the backend on this name.
/// Changed hyperparameters change the fingerprint and therefore the name.
pub fn job_name(
    unit: &UnitId,
    cutoff_date: &str,
    data_version: u64,
    training_fingerprint: &Fingerprint,
) -> String {
    let cutoff: String = cutoff_date
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!(
        "{}_{}_{}_v{}_{}",
        unit.plant_id, unit.circuit_id, cutoff, data_version, training_fingerprint
    )
}

/// Submits training jobs to the compute backend.
pub struct JobOrchestrator {
    backend: Arc<dyn ComputeBackend>,
    max_parallel: usize,
    code_version: Option<String>,
}

impl JobOrchestrator {
    pub fn new(backend: Arc<dyn ComputeBackend>, max_parallel: usize) -> Self {
        Self {
            backend,
            max_parallel: max_parallel.max(1),
            code_version: None,
        }
    }

    pub fn with_code_version(mut self, code_version: Option<String>) -> Self {
        self.code_version = code_version;
        self
    }

    /// Submit one job. The training fingerprint travels as job metadata so
    /// later stages never re-derive it from a configuration that may have
    /// changed in the meantime.
    pub async fn submit(
        &self,
        config: &UnitConfig,
        data_resource: &ResourceRef,
        training_fingerprint: &Fingerprint,
    ) -> Result<TrainingJob, FleetError> {
        submit_one(
            self.backend.as_ref(),
            self.code_version.as_deref(),
            config,
            data_resource,
            None,
            training_fingerprint,
        )
        .await
    }

    /// Submit a job for every snapshot.
    ///
    /// Units with a job in `in_flight` that has not reached a terminal state
    /// are rejected, as are units repeated within `snapshots`. The
    /// unresolved `in_flight` jobs are carried over into the report. A
    /// failure for one unit never affects the others.
    pub async fn submit_all(
        &self,
        snapshots: &[DataSnapshot],
        in_flight: &[TrainingJob],
    ) -> SubmissionReport {
        let mut report = SubmissionReport {
            generated_at: Utc::now(),
            jobs: Vec::new(),
            carried_over: Vec::new(),
            failures: Vec::new(),
        };

        let mut carried: HashSet<&str> = HashSet::new();
        for job in in_flight.iter().filter(|j| !j.state.is_terminal()) {
            if carried.insert(job.job_name.as_str()) {
                report.carried_over.push(job.clone());
            }
        }
        let busy: HashSet<UnitId> = report.carried_over.iter().map(|j| j.unit.clone()).collect();
        let mut batch: HashSet<UnitId> = HashSet::new();

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = Vec::new();

        for snapshot in snapshots {
            let unit = snapshot.unit();
            if busy.contains(&unit) {
                tracing::warn!("Submit: {} already has a job in flight, skipping", unit);
                report.failures.push(UnitFailure::new(
                    &unit,
                    STAGE,
                    FailureKind::InFlight,
                    "a previously submitted job has not reached a terminal state",
                ));
                continue;
            }
            if !batch.insert(unit.clone()) {
                tracing::warn!("Submit: {} appears twice in the batch, skipping", unit);
                let err = FleetError::DuplicateSubmission(format!(
                    "{} appears more than once in the batch",
                    unit
                ));
                report.failures.push(UnitFailure::from_error(&unit, STAGE, &err));
                continue;
            }

            let backend = self.backend.clone();
            let semaphore = semaphore.clone();
            let code_version = self.code_version.clone();
            let snapshot = snapshot.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| FleetError::Backend(format!("submission pool closed: {}", e)))?;
                submit_one(
                    backend.as_ref(),
                    code_version.as_deref(),
                    &snapshot.config,
                    &snapshot.resource,
                    Some(&snapshot.payload_ref),
                    &snapshot.training_fingerprint,
                )
                .await
            });
            tasks.push((unit, handle));
        }

        for (unit, handle) in tasks {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(FleetError::Backend(format!("submission task aborted: {}", e))),
            };
            match result {
                Ok(job) => report.jobs.push(job),
                Err(e) => {
                    tracing::warn!("Submit: {} failed: {}", unit, e);
                    report.failures.push(UnitFailure::from_error(&unit, STAGE, &e));
                }
            }
        }

        tracing::info!(
            "Submit: {} jobs submitted, {} carried over, {} failed",
            report.jobs.len(),
            report.carried_over.len(),
            report.failures.len()
        );
        report
    }
}

async fn submit_one(
    backend: &dyn ComputeBackend,
    code_version: Option<&str>,
    config: &UnitConfig,
    data_resource: &ResourceRef,
    data_payload: Option<&str>,
    training_fingerprint: &Fingerprint,
) -> Result<TrainingJob, FleetError> {
    let unit = config.id();
    let name = job_name(&unit, &config.cutoff_date, data_resource.version, training_fingerprint);

    let mut job = TrainingJob {
        job_name: name.clone(),
        handle: JobHandle(name.clone()),
        unit,
        model_name: config.model_name(),
        cutoff_date: config.cutoff_date.clone(),
        data_resource: data_resource.clone(),
        training_fingerprint: training_fingerprint.clone(),
        state: JobState::Submitted,
        submitted_at: Utc::now(),
        finished_at: None,
        output_ref: None,
        metrics: Default::default(),
        message: None,
    };

    let inputs = job_inputs(config, data_resource, data_payload, code_version)?;
    match backend.submit_job(&name, &inputs, &job.metadata()).await {
        Ok(handle) => {
            job.handle = handle;
            job.submitted_at = Utc::now();
            tracing::info!("Submit: {} -> job {} ({})", job.unit, job.job_name, job.handle);
            Ok(job)
        }
        Err(FleetError::AlreadyExists(_)) => adopt_existing(backend, job).await,
        Err(e) => Err(e),
    }
}

/// The backend already has a job under this name, so it is this exact work.
/// Track that job from its current status instead of submitting again.
async fn adopt_existing(
    backend: &dyn ComputeBackend,
    mut job: TrainingJob,
) -> Result<TrainingJob, FleetError> {
    let status = backend.get_job_status(&job.handle).await.map_err(|e| {
        FleetError::AlreadyExists(format!(
            "job {} was already submitted and its status is unavailable: {}",
            job.job_name, e
        ))
    })?;
    job.apply_report(&status)?;
    if job.message.is_none() {
        job.message = Some("adopted a previously submitted job".to_string());
    }
    tracing::info!(
        "Submit: {} -> adopted existing job {} ({})",
        job.unit,
        job.job_name,
        job.state
    );
    Ok(job)
}

fn job_inputs(
    config: &UnitConfig,
    data_resource: &ResourceRef,
    data_payload: Option<&str>,
    code_version: Option<&str>,
) -> Result<Tags, FleetError> {
    let mut features: Vec<&str> = config
        .features
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .collect();
    features.sort_unstable();
    features.dedup();

    let mut inputs = Tags::new();
    inputs.insert(input::DATA_RESOURCE.to_string(), data_resource.uri());
    if let Some(payload) = data_payload {
        inputs.insert(input::DATA_PAYLOAD.to_string(), payload.to_string());
    }
    inputs.insert(input::FEATURES.to_string(), features.join(","));
    inputs.insert(
        input::HYPERPARAMETERS.to_string(),
        serde_json::to_string(&config.hyperparameters)?,
    );
    if let Some(env) = &config.environment_version {
        inputs.insert(input::ENVIRONMENT_VERSION.to_string(), env.clone());
    }
    if let Some(code) = code_version {
        inputs.insert(input::CODE_VERSION.to_string(), code.to_string());
    }
    Ok(inputs)
}
