// crates/fleet-store/src/memory.rs
//
// In-memory collaborator backends.
//
// Used for dry runs of the pipeline without any external service and as
// the fakes behind the control-plane tests. Each backend can inject the
// failures the control plane must tolerate (transient query errors,
// rejected submissions, declined copies).

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use fleet_core::error::FleetError;
use fleet_core::job::{BackendJobStatus, JobHandle, JobStatusReport};
use fleet_core::promotion::ApprovalSignal;
use fleet_core::resource::{tag, RegisteredResource, ResourceKind, Tags};
use fleet_core::traits::{
    ApprovalSource, ComputeBackend, ConfigStore, ModelRegistry, ResourceRegistry,
};
use fleet_core::unit::UnitConfig;

fn poisoned<E: std::fmt::Display>(e: E) -> FleetError {
    FleetError::Storage(format!("lock poisoned: {}", e))
}

// ---------------------------------------------------------------------------
// Configuration store
// ---------------------------------------------------------------------------

/// Configuration store holding a fixed list of units, replaceable between runs.
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    units: RwLock<Vec<UnitConfig>>,
}

impl InMemoryConfigStore {
    pub fn new(units: Vec<UnitConfig>) -> Self {
        Self {
            units: RwLock::new(units),
        }
    }

    /// Replace the configuration, as an operator editing the circuits file would.
    pub fn replace(&self, units: Vec<UnitConfig>) -> Result<(), FleetError> {
        *self.units.write().map_err(poisoned)? = units;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn list_units(&self) -> Result<Vec<UnitConfig>, FleetError> {
        Ok(self.units.read().map_err(poisoned)?.clone())
    }

    async fn get_unit(&self, plant_id: &str, circuit_id: &str) -> Result<UnitConfig, FleetError> {
        self.units
            .read()
            .map_err(poisoned)?
            .iter()
            .find(|u| u.plant_id == plant_id && u.circuit_id == circuit_id)
            .cloned()
            .ok_or_else(|| FleetError::NotFound(format!("unit {}/{}", plant_id, circuit_id)))
    }
}

// ---------------------------------------------------------------------------
// Resource registry
// ---------------------------------------------------------------------------

/// Append-only resource registry kept in a HashMap.
#[derive(Debug, Default)]
pub struct InMemoryResourceRegistry {
    resources: RwLock<HashMap<String, Vec<RegisteredResource>>>,
    fail_queries: AtomicBool,
    fail_creates: AtomicBool,
    creates: AtomicUsize,
}

impl InMemoryResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every list/latest query fail transiently.
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Make every create call fail transiently.
    pub fn set_fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    /// Number of versions created so far, across all names.
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Every version of `name`, ascending.
    pub fn versions(&self, name: &str) -> Vec<RegisteredResource> {
        self.resources
            .read()
            .map(|r| r.get(name).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn check_queries(&self) -> Result<(), FleetError> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(FleetError::Transient("registry unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceRegistry for InMemoryResourceRegistry {
    async fn list_versions(
        &self,
        name: &str,
        tag_filter: &Tags,
    ) -> Result<Vec<RegisteredResource>, FleetError> {
        self.check_queries()?;
        let resources = self.resources.read().map_err(poisoned)?;
        Ok(resources
            .get(name)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|r| r.matches(tag_filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_version(
        &self,
        name: &str,
        kind: ResourceKind,
        payload_ref: &str,
        tags: &Tags,
    ) -> Result<RegisteredResource, FleetError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(FleetError::Transient("registry rejected write".to_string()));
        }
        let mut resources = self.resources.write().map_err(poisoned)?;
        let versions = resources.entry(name.to_string()).or_default();
        let resource = RegisteredResource {
            name: name.to_string(),
            version: versions.len() as u64 + 1,
            kind,
            payload_ref: payload_ref.to_string(),
            tags: tags.clone(),
            created_at: Utc::now(),
        };
        versions.push(resource.clone());
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(resource)
    }

    async fn get_latest(&self, name: &str) -> Result<Option<RegisteredResource>, FleetError> {
        self.check_queries()?;
        let resources = self.resources.read().map_err(poisoned)?;
        Ok(resources.get(name).and_then(|v| v.last().cloned()))
    }
}

// ---------------------------------------------------------------------------
// Compute backend
// ---------------------------------------------------------------------------

/// One scripted answer to a status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Status(JobStatusReport),
    /// A transient query error.
    Error(String),
}

impl ScriptStep {
    pub fn queued() -> Self {
        ScriptStep::Status(JobStatusReport::new(BackendJobStatus::Queued))
    }

    pub fn running() -> Self {
        ScriptStep::Status(JobStatusReport::new(BackendJobStatus::Running))
    }

    pub fn completed() -> Self {
        ScriptStep::Status(JobStatusReport::new(BackendJobStatus::Completed))
    }

    pub fn completed_with_metrics(metrics: &[(&str, f64)]) -> Self {
        let mut report = JobStatusReport::new(BackendJobStatus::Completed);
        report.metrics = metrics.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        ScriptStep::Status(report)
    }

    pub fn failed(message: &str) -> Self {
        let mut report = JobStatusReport::new(BackendJobStatus::Failed);
        report.message = Some(message.to_string());
        ScriptStep::Status(report)
    }

    pub fn canceled() -> Self {
        ScriptStep::Status(JobStatusReport::new(BackendJobStatus::Canceled))
    }

    pub fn error(message: &str) -> Self {
        ScriptStep::Error(message.to_string())
    }
}

#[derive(Debug)]
struct ScriptedJob {
    job_name: String,
    inputs: Tags,
    metadata: Tags,
    steps: VecDeque<ScriptStep>,
    polls: u32,
}

#[derive(Debug, Default)]
struct ScriptState {
    /// Scripts keyed by unit key (`PLANT_CIRCUIT`), applied at submission.
    unit_scripts: HashMap<String, Vec<ScriptStep>>,
    rejected_units: HashMap<String, String>,
    /// Jobs keyed by handle (equal to the job name).
    jobs: HashMap<String, ScriptedJob>,
    submission_order: Vec<String>,
}

/// Compute backend that answers polls from per-job scripts.
///
/// Each poll consumes the next step; the last step repeats forever. A job
/// with no script follows the default script (complete on first poll).
/// Every call can be given a latency, and the peak number of calls in
/// progress at once is recorded.
#[derive(Debug)]
pub struct ScriptedComputeBackend {
    state: Mutex<ScriptState>,
    default_script: Vec<ScriptStep>,
    latency: Option<Duration>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Marks one backend call in progress until dropped.
struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ScriptedComputeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedComputeBackend {
    pub fn new() -> Self {
        Self::with_default_script(vec![ScriptStep::completed()])
    }

    pub fn with_default_script(default_script: Vec<ScriptStep>) -> Self {
        Self {
            state: Mutex::new(ScriptState::default()),
            default_script,
            latency: None,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Delay every submission and poll by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Most calls ever in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> CallGuard<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let guard = CallGuard(&self.active);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    /// Script every job later submitted for `unit_key`.
    pub fn script_unit(&self, unit_key: &str, steps: Vec<ScriptStep>) {
        if let Ok(mut state) = self.state.lock() {
            state.unit_scripts.insert(unit_key.to_string(), steps);
        }
    }

    /// Reject every submission for `unit_key` with a backend error.
    pub fn reject_unit(&self, unit_key: &str, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state
                .rejected_units
                .insert(unit_key.to_string(), message.to_string());
        }
    }

    /// Register a job as if it had already been submitted.
    pub fn script_job(&self, handle: &str, steps: Vec<ScriptStep>) {
        if let Ok(mut state) = self.state.lock() {
            state.jobs.insert(
                handle.to_string(),
                ScriptedJob {
                    job_name: handle.to_string(),
                    inputs: Tags::new(),
                    metadata: Tags::new(),
                    steps: steps.into(),
                    polls: 0,
                },
            );
        }
    }

    /// Job names in submission order.
    pub fn submissions(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.submission_order.clone())
            .unwrap_or_default()
    }

    /// Inputs and metadata a job was submitted with.
    pub fn submitted(&self, job_name: &str) -> Option<(Tags, Tags)> {
        self.state.lock().ok().and_then(|s| {
            s.jobs
                .get(job_name)
                .map(|j| (j.inputs.clone(), j.metadata.clone()))
        })
    }

    /// Number of status polls served for `handle`.
    pub fn poll_count(&self, handle: &str) -> u32 {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.jobs.get(handle).map(|j| j.polls))
            .unwrap_or(0)
    }
}

#[async_trait]
impl ComputeBackend for ScriptedComputeBackend {
    async fn submit_job(
        &self,
        job_name: &str,
        inputs: &Tags,
        metadata: &Tags,
    ) -> Result<JobHandle, FleetError> {
        let _call = self.enter().await;
        let mut state = self.state.lock().map_err(poisoned)?;
        let unit_key = format!(
            "{}_{}",
            metadata.get(tag::PLANT_ID).map(String::as_str).unwrap_or(""),
            metadata.get(tag::CIRCUIT_ID).map(String::as_str).unwrap_or("")
        );

        if let Some(message) = state.rejected_units.get(&unit_key) {
            return Err(FleetError::Backend(message.clone()));
        }
        if state.jobs.contains_key(job_name) {
            return Err(FleetError::AlreadyExists(format!("job {}", job_name)));
        }

        let steps = state
            .unit_scripts
            .get(&unit_key)
            .cloned()
            .unwrap_or_else(|| self.default_script.clone());
        state.jobs.insert(
            job_name.to_string(),
            ScriptedJob {
                job_name: job_name.to_string(),
                inputs: inputs.clone(),
                metadata: metadata.clone(),
                steps: steps.into(),
                polls: 0,
            },
        );
        state.submission_order.push(job_name.to_string());
        Ok(JobHandle(job_name.to_string()))
    }

    async fn get_job_status(&self, handle: &JobHandle) -> Result<JobStatusReport, FleetError> {
        let _call = self.enter().await;
        let mut state = self.state.lock().map_err(poisoned)?;
        let job = state
            .jobs
            .get_mut(&handle.0)
            .ok_or_else(|| FleetError::NotFound(format!("job {}", handle)))?;
        job.polls += 1;

        let step = if job.steps.len() > 1 {
            job.steps.pop_front()
        } else {
            job.steps.front().cloned()
        };

        match step {
            None => Ok(JobStatusReport::new(BackendJobStatus::Queued)),
            Some(ScriptStep::Error(message)) => Err(FleetError::Transient(message)),
            Some(ScriptStep::Status(mut report)) => {
                if report.status == BackendJobStatus::Completed && report.output_ref.is_none() {
                    report.output_ref = Some(format!("fleet-jobs://{}/outputs/model", job.job_name));
                }
                Ok(report)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Model registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct StoredModel {
    source_ref: String,
    tags: Tags,
}

/// Promotion target kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryModelRegistry {
    models: RwLock<HashMap<(String, u64), StoredModel>>,
    declined: RwLock<HashSet<String>>,
    drop_copies: AtomicBool,
    fail_exists: AtomicBool,
    copies: AtomicUsize,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decline (`Ok(false)`) every copy of models named `name`.
    pub fn decline(&self, name: &str) {
        if let Ok(mut declined) = self.declined.write() {
            declined.insert(name.to_string());
        }
    }

    /// Accept copies without storing them, so post-copy verification fails.
    pub fn set_drop_copies(&self, drop: bool) {
        self.drop_copies.store(drop, Ordering::SeqCst);
    }

    /// Make `exists` fail transiently.
    pub fn set_fail_exists(&self, fail: bool) {
        self.fail_exists.store(fail, Ordering::SeqCst);
    }

    /// Number of accepted copy calls.
    pub fn copy_count(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    pub fn tags(&self, name: &str, version: u64) -> Option<Tags> {
        self.models
            .read()
            .ok()
            .and_then(|m| m.get(&(name.to_string(), version)).map(|s| s.tags.clone()))
    }

    pub fn source_ref(&self, name: &str, version: u64) -> Option<String> {
        self.models
            .read()
            .ok()
            .and_then(|m| m.get(&(name.to_string(), version)).map(|s| s.source_ref.clone()))
    }
}

#[async_trait]
impl ModelRegistry for InMemoryModelRegistry {
    async fn exists(&self, name: &str, version: u64) -> Result<bool, FleetError> {
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(FleetError::Transient("model registry unavailable".to_string()));
        }
        Ok(self
            .models
            .read()
            .map_err(poisoned)?
            .contains_key(&(name.to_string(), version)))
    }

    async fn copy_from(
        &self,
        source_ref: &str,
        name: &str,
        version: u64,
        tags: &Tags,
    ) -> Result<bool, FleetError> {
        if self.declined.read().map_err(poisoned)?.contains(name) {
            return Ok(false);
        }
        let mut models = self.models.write().map_err(poisoned)?;
        let key = (name.to_string(), version);
        if models.contains_key(&key) {
            return Err(FleetError::AlreadyExists(format!("{}:v{}", name, version)));
        }
        self.copies.fetch_add(1, Ordering::SeqCst);
        if !self.drop_copies.load(Ordering::SeqCst) {
            models.insert(
                key,
                StoredModel {
                    source_ref: source_ref.to_string(),
                    tags: tags.clone(),
                },
            );
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Approval source
// ---------------------------------------------------------------------------

/// Approval source answering from a mutable map.
#[derive(Debug, Default)]
pub struct StaticApprovalSource {
    signals: RwLock<HashMap<String, ApprovalSignal>>,
    fail: AtomicBool,
}

impl StaticApprovalSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, signal: ApprovalSignal) {
        if let Ok(mut signals) = self.signals.write() {
            signals.insert(key.to_string(), signal);
        }
    }

    /// Make every query fail transiently.
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ApprovalSource for StaticApprovalSource {
    async fn get_approval_status(&self, key: &str) -> Result<ApprovalSignal, FleetError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(FleetError::Transient("approval source unavailable".to_string()));
        }
        Ok(self
            .signals
            .read()
            .map_err(poisoned)?
            .get(key)
            .copied()
            .unwrap_or(ApprovalSignal::Absent))
    }
}
