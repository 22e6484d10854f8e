// crates/fleet-pipeline/src/registrar.rs
//
// Idempotent registration of data snapshots and trained models, keyed by
// fingerprint.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::error::{FleetError, UnitFailure};
use fleet_core::fingerprint::Fingerprint;
use fleet_core::job::TrainingJob;
use fleet_core::promotion::ModelCandidate;
use fleet_core::resource::{tag, RegisteredResource, ResourceKind, ResourceRef, Tags};
use fleet_core::traits::ResourceRegistry;
use fleet_core::unit::{UnitConfig, UnitId};

use crate::detector::{ChangedUnit, DetectionReport};
use crate::monitor::MonitorReport;
use crate::records::StageReport;

pub const DATA_STAGE: &str = "register_data";
pub const MODEL_STAGE: &str = "register_models";

/// Result of `register_if_new`.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    /// `false` when a version with the same fingerprint already existed.
    pub created: bool,
    pub resource: RegisteredResource,
}

/// A data snapshot ready for training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    pub config: UnitConfig,
    pub resource: ResourceRef,
    pub payload_ref: String,
    pub data_fingerprint: Fingerprint,
    pub training_fingerprint: Fingerprint,
    pub created: bool,
}

impl DataSnapshot {
    pub fn unit(&self) -> UnitId {
        self.config.id()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRegistrationReport {
    pub generated_at: DateTime<Utc>,
    pub snapshots: Vec<DataSnapshot>,
    pub failures: Vec<UnitFailure>,
}

impl DataRegistrationReport {
    pub fn created_count(&self) -> usize {
        self.snapshots.iter().filter(|s| s.created).count()
    }
}

impl StageReport for DataRegistrationReport {
    const FILE_NAME: &'static str = "data_snapshots.json";
    const STAGE: &'static str = DATA_STAGE;

    fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }
}

/// A registered model, as listed for promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub candidate: ModelCandidate,
    pub created: bool,
    #[serde(default)]
    pub metrics: std::collections::BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRegistrationReport {
    pub generated_at: DateTime<Utc>,
    pub models: Vec<RegisteredModel>,
    pub failures: Vec<UnitFailure>,
}

impl ModelRegistrationReport {
    pub fn candidates(&self) -> Vec<ModelCandidate> {
        self.models.iter().map(|m| m.candidate.clone()).collect()
    }
}

impl StageReport for ModelRegistrationReport {
    const FILE_NAME: &'static str = "registered_models.json";
    const STAGE: &'static str = MODEL_STAGE;

    fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }
}

/// Registers versioned resources, skipping fingerprints already present.
///
/// The check-then-create sequence is not atomic. Two registrars racing on
/// the same name and fingerprint may both create a version; consumers key
/// off the fingerprint, so the duplicate is harmless.
pub struct ResourceRegistrar {
    registry: Arc<dyn ResourceRegistry>,
    snapshot_root: String,
}

impl ResourceRegistrar {
    pub fn new(registry: Arc<dyn ResourceRegistry>, snapshot_root: impl Into<String>) -> Self {
        Self {
            registry,
            snapshot_root: snapshot_root.into(),
        }
    }

    /// Return the version of `name` tagged with `fingerprint`, creating it
    /// if none exists. The fingerprint tag always wins over `tags`.
    pub async fn register_if_new(
        &self,
        name: &str,
        kind: ResourceKind,
        fingerprint: &Fingerprint,
        payload_ref: &str,
        tags: &Tags,
    ) -> Result<Registration, FleetError> {
        let mut filter = Tags::new();
        filter.insert(tag::FINGERPRINT.to_string(), fingerprint.to_string());

        let existing = self.registry.list_versions(name, &filter).await?;
        if let Some(resource) = existing.into_iter().last() {
            tracing::debug!(
                "Registrar: {} already registered as {} (fingerprint {})",
                name,
                resource.reference(),
                fingerprint
            );
            return Ok(Registration {
                created: false,
                resource,
            });
        }

        let mut all_tags = tags.clone();
        all_tags.insert(tag::FINGERPRINT.to_string(), fingerprint.to_string());
        let resource = self
            .registry
            .create_version(name, kind, payload_ref, &all_tags)
            .await?;
        tracing::info!(
            "Registrar: created {} (fingerprint {})",
            resource.reference(),
            fingerprint
        );
        Ok(Registration {
            created: true,
            resource,
        })
    }

    /// Where the snapshot for a unit and data fingerprint is materialized.
    pub fn snapshot_payload_ref(&self, changed: &ChangedUnit) -> String {
        format!(
            "{}/{}/{}",
            self.snapshot_root.trim_end_matches('/'),
            changed.config.data_resource_name(),
            changed.data_fingerprint
        )
    }

    pub async fn register_data_snapshot(
        &self,
        changed: &ChangedUnit,
    ) -> Result<DataSnapshot, FleetError> {
        let config = &changed.config;
        let payload_ref = self.snapshot_payload_ref(changed);
        let registration = self
            .register_if_new(
                &config.data_resource_name(),
                ResourceKind::DataSnapshot,
                &changed.data_fingerprint,
                &payload_ref,
                &snapshot_tags(config),
            )
            .await?;
        Ok(DataSnapshot {
            config: config.clone(),
            resource: registration.resource.reference(),
            payload_ref: registration.resource.payload_ref,
            data_fingerprint: changed.data_fingerprint.clone(),
            training_fingerprint: changed.training_fingerprint.clone(),
            created: registration.created,
        })
    }

    /// Register (or reuse) a data snapshot for every unit needing work.
    pub async fn register_data_snapshots(&self, detection: &DetectionReport) -> DataRegistrationReport {
        let mut report = DataRegistrationReport {
            generated_at: Utc::now(),
            snapshots: Vec::new(),
            failures: Vec::new(),
        };

        for changed in &detection.changed {
            let unit = changed.unit();
            match self.register_data_snapshot(changed).await {
                Ok(snapshot) => report.snapshots.push(snapshot),
                Err(e) => {
                    tracing::warn!("Registrar: data snapshot for {} failed: {}", unit, e);
                    report
                        .failures
                        .push(UnitFailure::from_error(&unit, DATA_STAGE, &e));
                }
            }
        }

        tracing::info!(
            "Registrar: {} data snapshots ready ({} new), {} failed",
            report.snapshots.len(),
            report.created_count(),
            report.failures.len()
        );
        report
    }

    /// Register the model produced by a completed job.
    pub async fn register_model(&self, job: &TrainingJob) -> Result<RegisteredModel, FleetError> {
        let output_ref = job.output_ref.as_deref().ok_or_else(|| {
            FleetError::Backend(format!(
                "job {} completed without an output reference",
                job.job_name
            ))
        })?;

        let registration = self
            .register_if_new(
                &job.model_name,
                ResourceKind::Model,
                &job.training_fingerprint,
                output_ref,
                &model_tags(job),
            )
            .await?;
        let model = registration.resource.reference();

        Ok(RegisteredModel {
            candidate: ModelCandidate {
                source_ref: model.uri(),
                model,
                unit: job.unit.clone(),
                cutoff_date: job.cutoff_date.clone(),
                training_fingerprint: job.training_fingerprint.clone(),
                training_job: job.job_name.clone(),
            },
            created: registration.created,
            metrics: job.metrics.clone(),
        })
    }

    /// Register a model for every completed job in a monitoring result.
    pub async fn register_models(&self, monitor: &MonitorReport) -> ModelRegistrationReport {
        let mut report = ModelRegistrationReport {
            generated_at: Utc::now(),
            models: Vec::new(),
            failures: Vec::new(),
        };

        for job in &monitor.completed {
            match self.register_model(job).await {
                Ok(model) => report.models.push(model),
                Err(e) => {
                    tracing::warn!("Registrar: model for {} failed: {}", job.unit, e);
                    report
                        .failures
                        .push(UnitFailure::from_error(&job.unit, MODEL_STAGE, &e));
                }
            }
        }

        tracing::info!(
            "Registrar: {} models registered ({} new), {} failed",
            report.models.len(),
            report.models.iter().filter(|m| m.created).count(),
            report.failures.len()
        );
        report
    }
}

fn snapshot_tags(config: &UnitConfig) -> Tags {
    let mut tags = Tags::new();
    tags.insert(tag::PLANT_ID.to_string(), config.plant_id.clone());
    tags.insert(tag::CIRCUIT_ID.to_string(), config.circuit_id.clone());
    tags.insert(tag::CUTOFF_DATE.to_string(), config.cutoff_date.clone());
    if let Some(version) = config.source_version {
        tags.insert(tag::SOURCE_VERSION.to_string(), version.to_string());
    }
    let features = config.features.iter().filter(|f| !f.trim().is_empty()).count();
    tags.insert(tag::NUM_FEATURES.to_string(), features.to_string());
    tags
}

fn model_tags(job: &TrainingJob) -> Tags {
    let mut tags = Tags::new();
    tags.insert(tag::PLANT_ID.to_string(), job.unit.plant_id.clone());
    tags.insert(tag::CIRCUIT_ID.to_string(), job.unit.circuit_id.clone());
    tags.insert(tag::CUTOFF_DATE.to_string(), job.cutoff_date.clone());
    tags.insert(
        tag::TRAINING_FINGERPRINT.to_string(),
        job.training_fingerprint.to_string(),
    );
    tags.insert(tag::TRAINING_JOB.to_string(), job.job_name.clone());
    tags.insert(tag::DATA_RESOURCE.to_string(), job.data_resource.to_string());
    for (metric, value) in &job.metrics {
        tags.insert(format!("{}{}", tag::METRIC_PREFIX, metric), value.to_string());
    }
    tags
}
