// crates/fleet-pipeline/src/detector.rs
//
// Change detection: decides which units need a new data snapshot and a new
// training run by comparing freshly computed fingerprints against the
// fingerprints recorded on the latest registered resources.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::error::{FailureKind, FleetError, UnitFailure};
use fleet_core::fingerprint::Fingerprint;
use fleet_core::traits::ResourceRegistry;
use fleet_core::unit::{RejectedEntry, UnitConfig, UnitId, UnitListing};

use crate::records::StageReport;

pub const STAGE: &str = "detect";

/// Why a unit was selected for work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeReason {
    /// No model was ever registered for the unit.
    FirstRun,
    /// The data-relevant fields changed (implies a training change).
    DataChanged,
    /// Only training-relevant fields changed; the existing snapshot is reused.
    TrainingChanged,
    /// Selected with `force`; fingerprints were not compared.
    Forced,
}

/// A unit that needs work, with the configuration it was detected against.
///
/// Later stages read the configuration from here rather than from the
/// configuration store, so an edit between stages cannot skew lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedUnit {
    pub config: UnitConfig,
    pub data_fingerprint: Fingerprint,
    pub training_fingerprint: Fingerprint,
    #[serde(default)]
    pub last_data_fingerprint: Option<Fingerprint>,
    #[serde(default)]
    pub last_training_fingerprint: Option<Fingerprint>,
    pub data_changed: bool,
    pub reason: ChangeReason,
}

impl ChangedUnit {
    pub fn unit(&self) -> UnitId {
        self.config.id()
    }
}

/// Options for one detection pass.
#[derive(Debug, Clone, Default)]
pub struct DetectOptions {
    /// Restrict the pass to these unit keys (`PLANT_CIRCUIT`). `None` means all.
    pub selection: Option<BTreeSet<String>>,
    /// Treat every selected unit as needing work.
    pub force: bool,
}

impl DetectOptions {
    /// Parse a comma-separated `PLANT_CIRCUIT,...` list.
    pub fn with_selection_list(mut self, list: &str) -> Self {
        let keys: BTreeSet<String> = list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !keys.is_empty() {
            self.selection = Some(keys);
        }
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Output of a detection pass: the list of units needing work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub code_version: Option<String>,
    pub total_units: usize,
    pub changed: Vec<ChangedUnit>,
    pub unchanged: Vec<UnitId>,
    pub failures: Vec<UnitFailure>,
}

impl StageReport for DetectionReport {
    const FILE_NAME: &'static str = "changed_units.json";
    const STAGE: &'static str = STAGE;

    fn failures(&self) -> &[UnitFailure] {
        &self.failures
    }
}

/// A freshly computed fingerprint needs work iff it differs from the last
/// known one. No last known fingerprint always needs work.
pub fn needs_work(current: &Fingerprint, last_known: Option<&Fingerprint>) -> bool {
    last_known != Some(current)
}

/// Compares unit fingerprints against the resource registry. Never writes.
pub struct ChangeDetector {
    registry: Arc<dyn ResourceRegistry>,
    code_version: Option<String>,
}

impl ChangeDetector {
    pub fn new(registry: Arc<dyn ResourceRegistry>, code_version: Option<String>) -> Self {
        Self {
            registry,
            code_version,
        }
    }

    /// Fingerprint recorded on the latest version of `name`.
    ///
    /// A registry failure is reported as `QueryFailed`, never as "absent":
    /// treating it as absent would trigger an unnecessary retrain.
    pub async fn last_known_fingerprint(
        &self,
        name: &str,
    ) -> Result<Option<Fingerprint>, FleetError> {
        match self.registry.get_latest(name).await {
            Ok(latest) => Ok(latest.and_then(|r| r.fingerprint())),
            Err(e) => Err(FleetError::QueryFailed(format!(
                "latest version of {}: {}",
                name, e
            ))),
        }
    }

    /// Classify one unit.
    ///
    /// Returns `Ok(None)` when the unit is unchanged.
    pub async fn check_unit(
        &self,
        config: &UnitConfig,
        force: bool,
    ) -> Result<Option<ChangedUnit>, FleetError> {
        let data_fingerprint = config.data_fingerprint()?;
        let training_fingerprint = config.training_fingerprint(self.code_version.as_deref())?;

        if force {
            return Ok(Some(ChangedUnit {
                config: config.clone(),
                data_fingerprint,
                training_fingerprint,
                last_data_fingerprint: None,
                last_training_fingerprint: None,
                data_changed: true,
                reason: ChangeReason::Forced,
            }));
        }

        let last_data = self
            .last_known_fingerprint(&config.data_resource_name())
            .await?;
        let last_training = self.last_known_fingerprint(&config.model_name()).await?;

        if !needs_work(&training_fingerprint, last_training.as_ref()) {
            return Ok(None);
        }

        let data_changed = needs_work(&data_fingerprint, last_data.as_ref());
        let reason = if last_training.is_none() {
            ChangeReason::FirstRun
        } else if data_changed {
            ChangeReason::DataChanged
        } else {
            ChangeReason::TrainingChanged
        };

        Ok(Some(ChangedUnit {
            config: config.clone(),
            data_fingerprint,
            training_fingerprint,
            last_data_fingerprint: last_data,
            last_training_fingerprint: last_training,
            data_changed,
            reason,
        }))
    }

    /// Classify every unit. Failures are isolated per unit.
    pub async fn detect(&self, units: &[UnitConfig], options: &DetectOptions) -> DetectionReport {
        self.detect_entries(units, &[], options).await
    }

    /// Classify the contents of a configuration store. Entries the store
    /// could not decode are reported as configuration failures.
    pub async fn detect_listing(
        &self,
        listing: &UnitListing,
        options: &DetectOptions,
    ) -> DetectionReport {
        self.detect_entries(&listing.units, &listing.rejected, options)
            .await
    }

    async fn detect_entries(
        &self,
        units: &[UnitConfig],
        rejected: &[RejectedEntry],
        options: &DetectOptions,
    ) -> DetectionReport {
        let mut report = DetectionReport {
            generated_at: Utc::now(),
            code_version: self.code_version.clone(),
            total_units: 0,
            changed: Vec::new(),
            unchanged: Vec::new(),
            failures: Vec::new(),
        };

        let mut seen = BTreeSet::new();
        for config in units {
            let unit = config.id();
            if let Some(selection) = &options.selection {
                if !selection.contains(&unit.key()) {
                    continue;
                }
            }
            report.total_units += 1;

            if !seen.insert(unit.key()) {
                tracing::warn!("Detect: unit {} configured more than once, skipping", unit);
                report.failures.push(UnitFailure::new(
                    &unit,
                    STAGE,
                    FailureKind::Duplicate,
                    "unit configured more than once",
                ));
                continue;
            }

            match self.check_unit(config, options.force).await {
                Ok(Some(changed)) => {
                    tracing::debug!(
                        "Detect: {} needs work ({:?}, training fingerprint {})",
                        unit,
                        changed.reason,
                        changed.training_fingerprint
                    );
                    report.changed.push(changed);
                }
                Ok(None) => {
                    tracing::debug!("Detect: {} unchanged", unit);
                    report.unchanged.push(unit);
                }
                Err(e) => {
                    tracing::warn!("Detect: {} skipped: {}", unit, e);
                    report.failures.push(UnitFailure::from_error(&unit, STAGE, &e));
                }
            }
        }

        for entry in rejected {
            let key = entry.unit.key();
            if let Some(selection) = &options.selection {
                if !selection.contains(&key) {
                    continue;
                }
            }
            report.total_units += 1;
            seen.insert(key);
            tracing::warn!("Detect: {} skipped: {}", entry.unit, entry.reason);
            report.failures.push(UnitFailure::new(
                &entry.unit,
                STAGE,
                FailureKind::Config,
                entry.reason.clone(),
            ));
        }

        if let Some(selection) = &options.selection {
            for key in selection.iter().filter(|k| !seen.contains(*k)) {
                let unit = unit_from_key(key);
                tracing::warn!("Detect: selected unit {} is not configured", key);
                report.failures.push(UnitFailure::new(
                    &unit,
                    STAGE,
                    FailureKind::Config,
                    "selected unit is not in the configuration",
                ));
            }
        }

        tracing::info!(
            "Detect: {} units checked, {} need work, {} unchanged, {} failed",
            report.total_units,
            report.changed.len(),
            report.unchanged.len(),
            report.failures.len()
        );
        report
    }
}

/// Split a `PLANT_CIRCUIT` key at its first underscore. Plant ids cannot
/// contain one; circuit ids can.
fn unit_from_key(key: &str) -> UnitId {
    match key.split_once('_') {
        Some((plant, circuit)) => UnitId::new(plant, circuit),
        None => UnitId::new(key, ""),
    }
}
