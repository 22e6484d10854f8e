// crates/fleet-pipeline/src/pipeline.rs
//
// The `Pipeline` context object: wires the collaborators into the stages
// and drives them in sequence, persisting each stage record.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use fleet_core::error::{FleetError, UnitFailure};
use fleet_core::job::TrainingJob;
use fleet_core::promotion::ApprovalPolicy;
use fleet_core::traits::{
    ApprovalSource, ComputeBackend, ConfigStore, ModelRegistry, ResourceRegistry,
};

use crate::detector::{ChangeDetector, DetectOptions, DetectionReport};
use crate::monitor::{JobMonitor, MonitorConfig, MonitorEvent, MonitorReport};
use crate::orchestrator::{JobOrchestrator, SubmissionReport};
use crate::promotion::{PromotionGate, PromotionReport};
use crate::records::{self, StageReport};
use crate::registrar::{DataRegistrationReport, ModelRegistrationReport, ResourceRegistrar};

/// Tunables shared by the stages.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Version of the training code; part of the training fingerprint.
    pub code_version: Option<String>,
    pub snapshot_root: String,
    pub submit_max_parallel: usize,
    pub monitor: MonitorConfig,
    pub approval_policy: ApprovalPolicy,
    pub promoted_from: String,
    /// Where stage records are written. `None` keeps them in memory only.
    pub records_dir: Option<PathBuf>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            code_version: None,
            snapshot_root: "snapshots".to_string(),
            submit_max_parallel: 8,
            monitor: MonitorConfig::default(),
            approval_policy: ApprovalPolicy::default(),
            promoted_from: "dev".to_string(),
            records_dir: None,
        }
    }
}

/// The external systems a pipeline is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub config_store: Arc<dyn ConfigStore>,
    pub resources: Arc<dyn ResourceRegistry>,
    pub compute: Arc<dyn ComputeBackend>,
    pub shared_registry: Arc<dyn ModelRegistry>,
    pub approvals: Arc<dyn ApprovalSource>,
}

/// Every stage record of one end-to-end run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub detection: DetectionReport,
    pub data: DataRegistrationReport,
    pub submission: SubmissionReport,
    pub monitoring: MonitorReport,
    pub models: ModelRegistrationReport,
    pub promotion: PromotionReport,
}

impl RunSummary {
    pub fn failures(&self) -> Vec<UnitFailure> {
        let mut all = Vec::new();
        all.extend_from_slice(self.detection.failures());
        all.extend_from_slice(self.data.failures());
        all.extend_from_slice(self.submission.failures());
        all.extend_from_slice(self.monitoring.failures());
        all.extend_from_slice(self.models.failures());
        all.extend_from_slice(self.promotion.failures());
        all
    }

    pub fn has_failures(&self) -> bool {
        !self.failures().is_empty()
    }
}

pub struct Pipeline {
    collaborators: Collaborators,
    settings: PipelineSettings,
    detector: ChangeDetector,
    registrar: ResourceRegistrar,
    orchestrator: JobOrchestrator,
    gate: PromotionGate,
}

impl Pipeline {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        let detector = ChangeDetector::new(
            collaborators.resources.clone(),
            settings.code_version.clone(),
        );
        let registrar =
            ResourceRegistrar::new(collaborators.resources.clone(), settings.snapshot_root.clone());
        let orchestrator =
            JobOrchestrator::new(collaborators.compute.clone(), settings.submit_max_parallel)
                .with_code_version(settings.code_version.clone());
        let gate = PromotionGate::new(
            collaborators.approvals.clone(),
            collaborators.shared_registry.clone(),
            settings.approval_policy,
            settings.promoted_from.clone(),
        );
        Self {
            collaborators,
            settings,
            detector,
            registrar,
            orchestrator,
            gate,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    async fn persist<T: StageReport>(&self, report: &T) -> Result<(), FleetError> {
        if let Some(dir) = &self.settings.records_dir {
            if let Err(e) = records::write_record(dir, report).await {
                tracing::error!("Cannot persist {} record: {}", T::STAGE, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Read a prior stage record from the records directory.
    pub async fn load<T: StageReport>(&self) -> Result<T, FleetError> {
        match &self.settings.records_dir {
            Some(dir) => records::read_record(dir).await,
            None => Err(FleetError::Config(format!(
                "no records directory configured to read {}",
                T::FILE_NAME
            ))),
        }
    }

    /// Like `load`, for records that may not exist yet.
    pub async fn load_optional<T: StageReport>(&self) -> Result<Option<T>, FleetError> {
        match &self.settings.records_dir {
            Some(dir) => records::read_optional_record(dir).await,
            None => Ok(None),
        }
    }

    pub async fn detect(&self, options: &DetectOptions) -> Result<DetectionReport, FleetError> {
        let listing = self.collaborators.config_store.list_entries().await?;
        let report = self.detector.detect_listing(&listing, options).await;
        self.persist(&report).await?;
        Ok(report)
    }

    pub async fn register_data(
        &self,
        detection: &DetectionReport,
    ) -> Result<DataRegistrationReport, FleetError> {
        let report = self.registrar.register_data_snapshots(detection).await;
        self.persist(&report).await?;
        Ok(report)
    }

    pub async fn submit(
        &self,
        data: &DataRegistrationReport,
        in_flight: &[TrainingJob],
    ) -> Result<SubmissionReport, FleetError> {
        let report = self.orchestrator.submit_all(&data.snapshots, in_flight).await;
        self.persist(&report).await?;
        Ok(report)
    }

    /// Jobs tracked by the last persisted submission that no monitoring
    /// result has resolved yet.
    pub async fn in_flight_jobs(&self) -> Result<Vec<TrainingJob>, FleetError> {
        let Some(submission) = self.load_optional::<SubmissionReport>().await? else {
            return Ok(Vec::new());
        };
        let monitoring = self.load_optional::<MonitorReport>().await?;
        Ok(submission
            .in_flight()
            .filter(|job| {
                !monitoring
                    .as_ref()
                    .map(|m| m.contains(&job.job_name))
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    /// Monitor every job the submission record tracks, including jobs
    /// carried over from earlier passes.
    pub async fn monitor(
        &self,
        submission: &SubmissionReport,
        events: Option<mpsc::UnboundedSender<MonitorEvent>>,
    ) -> Result<MonitorReport, FleetError> {
        let mut monitor = JobMonitor::new(self.collaborators.compute.clone(), self.settings.monitor);
        if let Some(events) = events {
            monitor = monitor.with_events(events);
        }
        let report = monitor.monitor(submission.tracked().cloned().collect()).await;
        self.persist(&report).await?;
        Ok(report)
    }

    pub async fn register_models(
        &self,
        monitoring: &MonitorReport,
    ) -> Result<ModelRegistrationReport, FleetError> {
        let report = self.registrar.register_models(monitoring).await;
        self.persist(&report).await?;
        Ok(report)
    }

    pub async fn promote(
        &self,
        models: &ModelRegistrationReport,
        prior: Option<&PromotionReport>,
    ) -> Result<PromotionReport, FleetError> {
        let report = self.gate.promote_all(&models.candidates(), prior).await;
        self.persist(&report).await?;
        Ok(report)
    }

    /// Run every stage in sequence.
    ///
    /// A stage only sees the successes of the stage before it. The prior
    /// promotion record, when present, is resumed.
    pub async fn run(
        &self,
        options: &DetectOptions,
        events: Option<mpsc::UnboundedSender<MonitorEvent>>,
    ) -> Result<RunSummary, FleetError> {
        tracing::info!("Pipeline run started");
        let detection = self.detect(options).await?;
        let data = self.register_data(&detection).await?;
        let in_flight = self.in_flight_jobs().await?;
        let submission = self.submit(&data, &in_flight).await?;
        let monitoring = self.monitor(&submission, events).await?;
        let models = self.register_models(&monitoring).await?;
        let prior = self.load_optional::<PromotionReport>().await?;
        let promotion = self.promote(&models, prior.as_ref()).await?;

        let summary = RunSummary {
            detection,
            data,
            submission,
            monitoring,
            models,
            promotion,
        };
        tracing::info!(
            "Pipeline run finished: {} units failed",
            summary.failures().len()
        );
        Ok(summary)
    }
}
