// crates/fleet-pipeline/tests/pipeline_scenarios.rs
//
// End-to-end runs of the control plane against in-memory collaborators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleet_core::error::FailureKind;
use fleet_core::promotion::{ApprovalPolicy, ApprovalSignal, PromotionStatus};
use fleet_core::resource::tag;
use fleet_core::unit::UnitConfig;
use fleet_pipeline::{
    ChangeReason, Collaborators, DetectOptions, DetectionReport, MonitorConfig, Pipeline,
    PipelineSettings, SubmissionReport,
};
use fleet_store::{
    InMemoryConfigStore, InMemoryModelRegistry, InMemoryResourceRegistry, ScriptStep,
    ScriptedComputeBackend, StaticApprovalSource,
};

struct Harness {
    config: Arc<InMemoryConfigStore>,
    resources: Arc<InMemoryResourceRegistry>,
    compute: Arc<ScriptedComputeBackend>,
    shared: Arc<InMemoryModelRegistry>,
    approvals: Arc<StaticApprovalSource>,
    records_dir: PathBuf,
}

impl Harness {
    fn new(units: Vec<UnitConfig>) -> Self {
        Self {
            config: Arc::new(InMemoryConfigStore::new(units)),
            resources: Arc::new(InMemoryResourceRegistry::new()),
            compute: Arc::new(ScriptedComputeBackend::new()),
            shared: Arc::new(InMemoryModelRegistry::new()),
            approvals: Arc::new(StaticApprovalSource::new()),
            records_dir: std::env::temp_dir()
                .join(format!("fleet_pipeline_test_{}", uuid::Uuid::now_v7())),
        }
    }

    /// A fresh pipeline over the same collaborators, as a new process would build.
    fn pipeline(&self, policy: ApprovalPolicy) -> Pipeline {
        let collaborators = Collaborators {
            config_store: self.config.clone(),
            resources: self.resources.clone(),
            compute: self.compute.clone(),
            shared_registry: self.shared.clone(),
            approvals: self.approvals.clone(),
        };
        let settings = PipelineSettings {
            code_version: Some("git-4f2a9c1".to_string()),
            snapshot_root: "mem://snapshots".to_string(),
            submit_max_parallel: 4,
            monitor: MonitorConfig {
                poll_interval: Duration::from_millis(20),
                timeout: Duration::from_secs(5),
                max_parallel: 4,
                progress_every_polls: 1,
            },
            approval_policy: policy,
            promoted_from: "dev".to_string(),
            records_dir: Some(self.records_dir.clone()),
        };
        Pipeline::new(collaborators, settings)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.records_dir);
    }
}

fn unit(plant: &str, circuit: &str) -> UnitConfig {
    let mut config = UnitConfig::new(plant, circuit, "2024-06-01", &["temp", "load", "humidity"]);
    config.source_version = Some(12);
    config
        .hyperparameters
        .insert("epochs".to_string(), serde_json::json!(30));
    config
}

#[tokio::test]
async fn test_unchanged_unit_is_skipped_on_second_run() {
    let harness = Harness::new(vec![unit("P1", "C1")]);
    let options = DetectOptions::default();

    let first = harness
        .pipeline(ApprovalPolicy::DefaultApprove)
        .run(&options, None)
        .await
        .unwrap();
    assert_eq!(first.detection.changed[0].reason, ChangeReason::FirstRun);
    assert_eq!(first.promotion.count(PromotionStatus::Promoted), 1);
    assert!(!first.has_failures());
    let creates = harness.resources.create_count();
    assert_eq!(creates, 2);

    // Unrelated metadata changes do not matter.
    let mut edited = unit("P1", "C1");
    edited.metadata = Some(serde_json::json!({"owner": "ops", "note": "reviewed"}));
    harness.config.replace(vec![edited]).unwrap();

    let second = harness
        .pipeline(ApprovalPolicy::DefaultApprove)
        .run(&options, None)
        .await
        .unwrap();
    assert!(second.detection.changed.is_empty());
    assert_eq!(second.detection.unchanged.len(), 1);
    assert!(second.submission.jobs.is_empty());
    assert_eq!(harness.resources.create_count(), creates);
    assert_eq!(harness.compute.submissions().len(), 1);
    // The promoted record is carried over, not redone.
    assert_eq!(second.promotion.count(PromotionStatus::Promoted), 1);
    assert_eq!(harness.shared.copy_count(), 1);
}

#[tokio::test]
async fn test_pending_approval_then_promoted_on_rerun() {
    let harness = Harness::new(vec![unit("P1", "C1")]);
    let options = DetectOptions::default();

    let first = harness
        .pipeline(ApprovalPolicy::DefaultPending)
        .run(&options, None)
        .await
        .unwrap();
    let record = &first.promotion.records[0];
    assert_eq!(record.status(), PromotionStatus::PendingApproval);
    assert_eq!(harness.shared.copy_count(), 0);
    assert!(harness.shared.tags("p1-c1", 1).is_none());

    harness
        .approvals
        .set(&record.candidate.approval_key(), ApprovalSignal::Approved);

    let second = harness
        .pipeline(ApprovalPolicy::DefaultPending)
        .run(&options, None)
        .await
        .unwrap();
    assert!(second.detection.changed.is_empty());
    assert_eq!(second.promotion.records.len(), 1);
    assert_eq!(second.promotion.records[0].status(), PromotionStatus::Promoted);

    let tags = harness.shared.tags("p1-c1", 1).unwrap();
    assert_eq!(tags[tag::PLANT_ID], "P1");
    assert_eq!(tags[tag::TRAINING_FINGERPRINT], record.candidate.training_fingerprint.to_string());
}

#[tokio::test]
async fn test_hyperparameter_change_retrains_on_same_snapshot() {
    let harness = Harness::new(vec![unit("P1", "C1")]);
    let options = DetectOptions::default();
    harness
        .pipeline(ApprovalPolicy::DefaultApprove)
        .run(&options, None)
        .await
        .unwrap();

    let mut tuned = unit("P1", "C1");
    tuned
        .hyperparameters
        .insert("epochs".to_string(), serde_json::json!(60));
    harness.config.replace(vec![tuned]).unwrap();

    let second = harness
        .pipeline(ApprovalPolicy::DefaultApprove)
        .run(&options, None)
        .await
        .unwrap();
    let changed = &second.detection.changed[0];
    assert_eq!(changed.reason, ChangeReason::TrainingChanged);
    assert!(!second.data.snapshots[0].created);
    assert_eq!(second.data.snapshots[0].resource.version, 1);
    assert_eq!(harness.resources.versions("P1_C1").len(), 1);
    assert_eq!(harness.resources.versions("p1-c1").len(), 2);
    assert_eq!(second.promotion.count(PromotionStatus::Promoted), 2);
}

#[tokio::test]
async fn test_unit_failures_are_isolated_across_stages() {
    let mut broken = unit("P2", "C1");
    broken.features.clear();
    let harness = Harness::new(vec![unit("P1", "C1"), broken, unit("P3", "C1"), unit("P4", "C1")]);
    harness.compute.reject_unit("P3_C1", "quota exceeded");
    harness
        .compute
        .script_unit("P4_C1", vec![ScriptStep::running(), ScriptStep::failed("nan loss")]);

    let summary = harness
        .pipeline(ApprovalPolicy::DefaultApprove)
        .run(&DetectOptions::default(), None)
        .await
        .unwrap();

    assert!(summary.has_failures());
    let kinds: Vec<(String, FailureKind)> = summary
        .failures()
        .iter()
        .map(|f| (f.unit.key(), f.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            ("P2_C1".to_string(), FailureKind::Config),
            ("P3_C1".to_string(), FailureKind::Backend),
            ("P4_C1".to_string(), FailureKind::Backend),
        ]
    );
    assert_eq!(summary.monitoring.failed.len(), 1);
    assert_eq!(summary.promotion.count(PromotionStatus::Promoted), 1);
    assert!(harness.shared.tags("p1-c1", 1).is_some());
}

#[tokio::test]
async fn test_stages_resume_from_persisted_records() {
    let harness = Harness::new(vec![unit("P1", "C1"), unit("P1", "C2")]);
    let options = DetectOptions::default();

    // Each stage runs in its own "process", reading the prior stage's record.
    let detection = harness
        .pipeline(ApprovalPolicy::DefaultApprove)
        .detect(&options)
        .await
        .unwrap();
    assert_eq!(detection.changed.len(), 2);

    let pipeline = harness.pipeline(ApprovalPolicy::DefaultApprove);
    let reread: DetectionReport = pipeline.load().await.unwrap();
    assert_eq!(reread, detection);
    let data = pipeline.register_data(&reread).await.unwrap();
    let submission = pipeline.submit(&data, &[]).await.unwrap();

    // Before monitoring, the submitted jobs count as in flight.
    let pipeline = harness.pipeline(ApprovalPolicy::DefaultApprove);
    assert_eq!(pipeline.in_flight_jobs().await.unwrap().len(), 2);
    let retry = pipeline.submit(&data, &pipeline.in_flight_jobs().await.unwrap()).await.unwrap();
    assert!(retry.failures.iter().all(|f| f.kind == FailureKind::InFlight));
    assert_eq!(harness.compute.submissions().len(), 2);

    // The retry record still tracks the original jobs; monitor from it.
    let reread: SubmissionReport = pipeline.load().await.unwrap();
    assert_eq!(reread.carried_over, submission.jobs);
    let monitoring = pipeline.monitor(&reread, None).await.unwrap();
    assert_eq!(monitoring.completed.len(), 2);
    assert!(pipeline.in_flight_jobs().await.unwrap().is_empty());

    let models = pipeline.register_models(&monitoring).await.unwrap();
    let promotion = pipeline.promote(&models, None).await.unwrap();
    assert_eq!(promotion.count(PromotionStatus::Promoted), 2);

    // Re-running promotion alone against the same registry is idempotent.
    let again = harness
        .pipeline(ApprovalPolicy::DefaultApprove)
        .promote(&models, None)
        .await
        .unwrap();
    assert_eq!(again.count(PromotionStatus::AlreadyExists), 2);
    assert_eq!(harness.shared.copy_count(), 2);
}

#[tokio::test]
async fn test_rejected_resubmission_keeps_running_job_on_record() {
    let harness = Harness::new(vec![unit("P1", "C1")]);
    harness.compute.script_unit(
        "P1_C1",
        vec![ScriptStep::running(), ScriptStep::running(), ScriptStep::completed()],
    );
    let options = DetectOptions::default();
    let pipeline = harness.pipeline(ApprovalPolicy::DefaultApprove);

    let detection = pipeline.detect(&options).await.unwrap();
    let data = pipeline.register_data(&detection).await.unwrap();
    let first = pipeline.submit(&data, &[]).await.unwrap();
    assert_eq!(first.jobs.len(), 1);
    let running = first.jobs[0].job_name.clone();

    // Same work again while the job runs: rejected, job stays on record.
    let in_flight = pipeline.in_flight_jobs().await.unwrap();
    let second = pipeline.submit(&data, &in_flight).await.unwrap();
    assert!(second.jobs.is_empty());
    assert_eq!(second.failures[0].kind, FailureKind::InFlight);
    let in_flight = pipeline.in_flight_jobs().await.unwrap();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].job_name, running);

    // New cutoff: the unit needs work, but its first job is still unresolved.
    let mut moved = unit("P1", "C1");
    moved.cutoff_date = "2024-06-08".to_string();
    harness.config.replace(vec![moved]).unwrap();
    let detection = pipeline.detect(&options).await.unwrap();
    assert_eq!(detection.changed.len(), 1);
    let data = pipeline.register_data(&detection).await.unwrap();
    let third = pipeline
        .submit(&data, &pipeline.in_flight_jobs().await.unwrap())
        .await
        .unwrap();
    assert!(third.jobs.is_empty());
    assert_eq!(third.failures[0].kind, FailureKind::InFlight);
    assert_eq!(harness.compute.submissions(), vec![running.clone()]);

    // Monitoring from the latest record still resolves the first job.
    let submission: SubmissionReport = pipeline.load().await.unwrap();
    let monitoring = pipeline.monitor(&submission, None).await.unwrap();
    assert!(monitoring.contains(&running));
    assert_eq!(monitoring.completed.len(), 1);
    let models = pipeline.register_models(&monitoring).await.unwrap();
    assert_eq!(models.models.len(), 1);
    assert!(pipeline.in_flight_jobs().await.unwrap().is_empty());
}
