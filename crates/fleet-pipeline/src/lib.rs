// crates/fleet-pipeline/src/lib.rs
//
// fleet-pipeline: The retraining control plane.
//
// Stages, in order: change detection, data snapshot registration, job
// submission, job monitoring, model registration, and approval-gated
// promotion. Each stage produces a flat record that the next stage
// consumes, so any stage can be re-run on its own.

pub mod detector;
pub mod monitor;
pub mod orchestrator;
pub mod pipeline;
pub mod promotion;
pub mod records;
pub mod registrar;

pub use detector::{needs_work, ChangeDetector, ChangeReason, ChangedUnit, DetectOptions, DetectionReport};
pub use monitor::{JobMonitor, MonitorConfig, MonitorEvent, MonitorReport, ProgressSnapshot};
pub use orchestrator::{job_name, JobOrchestrator, SubmissionReport};
pub use pipeline::{Collaborators, Pipeline, PipelineSettings, RunSummary};
pub use promotion::{PromotionGate, PromotionReport};
pub use records::StageReport;
pub use registrar::{
    DataRegistrationReport, DataSnapshot, ModelRegistrationReport, RegisteredModel,
    Registration, ResourceRegistrar,
};
