// crates/fleet-core/src/unit.rs
//
// Unit (circuit) identity and training configuration.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FleetError;
use crate::fingerprint::{fingerprint, Fingerprint, FingerprintKind};

/// Identity of one independently trained forecasting target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId {
    pub plant_id: String,
    pub circuit_id: String,
}

impl UnitId {
    pub fn new(plant_id: impl Into<String>, circuit_id: impl Into<String>) -> Self {
        Self {
            plant_id: plant_id.into(),
            circuit_id: circuit_id.into(),
        }
    }

    /// Selection key in `PLANT_CIRCUIT` form, also used as the data snapshot name.
    ///
    /// Plant ids never contain `_`, so the key splits back at its first one.
    pub fn key(&self) -> String {
        format!("{}_{}", self.plant_id, self.circuit_id)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plant_id, self.circuit_id)
    }
}

/// A configuration entry that could not be decoded into a [`UnitConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedEntry {
    /// Best-effort identity read from the raw entry.
    pub unit: UnitId,
    pub reason: String,
}

/// Contents of a configuration store: decoded units and the entries it
/// could not decode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitListing {
    pub units: Vec<UnitConfig>,
    pub rejected: Vec<RejectedEntry>,
}

/// Training configuration for a single unit.
///
/// Immutable once loaded for a run. Only the fields named by a
/// [`FingerprintKind`] contribute to fingerprints; `name`, `model_name`,
/// `metadata`, and any unknown keys collected in `extra` never do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    #[serde(default)]
    pub plant_id: String,
    #[serde(default)]
    pub circuit_id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Registered model name. Defaults to `plant-circuit` in lowercase.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Input feature columns. Treated as a set when fingerprinting.
    #[serde(default)]
    pub features: Vec<String>,
    /// Last date of training data to include.
    #[serde(default)]
    pub cutoff_date: String,
    /// Version of the upstream source snapshot the data is cut from.
    #[serde(default)]
    pub source_version: Option<u64>,
    #[serde(default)]
    pub hyperparameters: BTreeMap<String, Value>,
    /// Training environment version (image/conda environment tag).
    #[serde(default)]
    pub environment_version: Option<String>,
    /// Bookkeeping written by tooling. Never fingerprinted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Any other keys present in the source file.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl UnitConfig {
    /// Minimal configuration for the given unit; callers fill in the rest.
    pub fn new(plant_id: &str, circuit_id: &str, cutoff_date: &str, features: &[&str]) -> Self {
        Self {
            plant_id: plant_id.to_string(),
            circuit_id: circuit_id.to_string(),
            name: format!("{} {}", plant_id, circuit_id),
            model_name: None,
            features: features.iter().map(|f| f.to_string()).collect(),
            cutoff_date: cutoff_date.to_string(),
            source_version: None,
            hyperparameters: BTreeMap::new(),
            environment_version: None,
            metadata: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> UnitId {
        UnitId::new(&self.plant_id, &self.circuit_id)
    }

    /// Name of the registered data snapshot resource for this unit.
    pub fn data_resource_name(&self) -> String {
        self.id().key()
    }

    /// Name of the registered model resource for this unit.
    pub fn model_name(&self) -> String {
        match &self.model_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!(
                "{}-{}",
                self.plant_id.to_lowercase(),
                self.circuit_id.to_lowercase()
            ),
        }
    }

    /// Check the fields every stage relies on.
    pub fn validate(&self) -> Result<(), FleetError> {
        check_identifier("plant_id", &self.plant_id)?;
        if self.plant_id.contains('_') {
            return Err(FleetError::Config(format!(
                "plant_id '{}' must not contain '_'",
                self.plant_id
            )));
        }
        check_identifier("circuit_id", &self.circuit_id)?;
        if let Some(model_name) = &self.model_name {
            check_identifier("model_name", model_name)?;
        }
        if self.cutoff_date.trim().is_empty() {
            return Err(FleetError::Config(format!(
                "{}: cutoff_date is required",
                self.id()
            )));
        }
        if self.features.iter().all(|f| f.trim().is_empty()) {
            return Err(FleetError::Config(format!(
                "{}: at least one feature is required",
                self.id()
            )));
        }
        Ok(())
    }

    /// Project every fingerprintable field into a JSON object.
    ///
    /// `code_version` is not part of the unit file; the orchestrator
    /// injects the version of the training code it submits.
    pub fn fingerprint_projection(&self, code_version: Option<&str>) -> Value {
        let mut features: Vec<&str> = self
            .features
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .collect();
        features.sort_unstable();
        features.dedup();

        serde_json::json!({
            "features": features,
            "cutoff_date": self.cutoff_date.trim(),
            "source_version": self.source_version,
            "hyperparameters": self.hyperparameters,
            "environment_version": self.environment_version,
            "code_version": code_version,
        })
    }

    /// Fingerprint answering "does the data need a new snapshot?".
    pub fn data_fingerprint(&self) -> Result<Fingerprint, FleetError> {
        self.validate()?;
        fingerprint(
            &self.fingerprint_projection(None),
            FingerprintKind::Data.fields(),
        )
    }

    /// Fingerprint answering "does the model need retraining?".
    pub fn training_fingerprint(&self, code_version: Option<&str>) -> Result<Fingerprint, FleetError> {
        self.validate()?;
        fingerprint(
            &self.fingerprint_projection(code_version),
            FingerprintKind::Training.fields(),
        )
    }
}

/// Identifiers end up in resource names, job names, and `:`-separated
/// approval keys.
fn check_identifier(field: &str, value: &str) -> Result<(), FleetError> {
    if value.trim().is_empty() {
        return Err(FleetError::Config(format!("{} is required", field)));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-' || *c == '.'))
    {
        return Err(FleetError::Config(format!(
            "{} '{}' contains invalid character '{}'",
            field, value, c
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> UnitConfig {
        let mut cfg = UnitConfig::new("PLANT001", "CIRCUIT01", "2025-12-11", &["temp", "load"]);
        cfg.source_version = Some(42);
        cfg.hyperparameters
            .insert("learning_rate".to_string(), serde_json::json!(0.001));
        cfg.hyperparameters
            .insert("epochs".to_string(), serde_json::json!(100));
        cfg
    }

    #[test]
    fn test_default_model_name() {
        let cfg = sample();
        assert_eq!(cfg.model_name(), "plant001-circuit01");
        assert_eq!(cfg.data_resource_name(), "PLANT001_CIRCUIT01");

        let mut named = sample();
        named.model_name = Some("custom-model".to_string());
        assert_eq!(named.model_name(), "custom-model");
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut cfg = sample();
        cfg.cutoff_date = String::new();
        assert!(matches!(cfg.validate(), Err(FleetError::Config(_))));

        let mut cfg = sample();
        cfg.plant_id = String::new();
        assert!(matches!(cfg.validate(), Err(FleetError::Config(_))));

        let mut cfg = sample();
        cfg.features.clear();
        assert!(matches!(cfg.validate(), Err(FleetError::Config(_))));

        let mut cfg = sample();
        cfg.circuit_id = "C:1".to_string();
        assert!(matches!(cfg.validate(), Err(FleetError::Config(_))));
    }

    #[test]
    fn test_unit_keys_are_unambiguous() {
        // `A_B`/`C` and `A`/`B_C` would share the key `A_B_C`.
        let mut cfg = sample();
        cfg.plant_id = "A_B".to_string();
        cfg.circuit_id = "C".to_string();
        assert!(matches!(cfg.validate(), Err(FleetError::Config(_))));
        assert!(cfg.data_fingerprint().is_err());

        let mut cfg = sample();
        cfg.plant_id = "A".to_string();
        cfg.circuit_id = "B_C".to_string();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.data_resource_name(), "A_B_C");
    }

    #[test]
    fn test_feature_order_does_not_change_fingerprints() {
        let a = sample();
        let mut b = sample();
        b.features = vec!["load".to_string(), "temp".to_string(), "temp".to_string()];
        assert_eq!(a.data_fingerprint().unwrap(), b.data_fingerprint().unwrap());
        assert_eq!(
            a.training_fingerprint(Some("1.0.0")).unwrap(),
            b.training_fingerprint(Some("1.0.0")).unwrap()
        );
    }

    #[test]
    fn test_bookkeeping_fields_are_ignored() {
        let a = sample();
        let mut b = sample();
        b.name = "renamed".to_string();
        b.model_name = Some("other-name".to_string());
        b.metadata = Some(serde_json::json!({"config_hash": "abc", "generated_at": "now"}));
        b.extra
            .insert("owner".to_string(), serde_json::json!("team-a"));
        assert_eq!(a.data_fingerprint().unwrap(), b.data_fingerprint().unwrap());
        assert_eq!(
            a.training_fingerprint(None).unwrap(),
            b.training_fingerprint(None).unwrap()
        );
    }

    #[test]
    fn test_flavors_answer_different_questions() {
        let a = sample();
        let mut b = sample();
        b.hyperparameters
            .insert("learning_rate".to_string(), serde_json::json!(0.01));

        // Hyperparameters do not touch the data snapshot...
        assert_eq!(a.data_fingerprint().unwrap(), b.data_fingerprint().unwrap());
        // ...but they do require retraining.
        assert_ne!(
            a.training_fingerprint(None).unwrap(),
            b.training_fingerprint(None).unwrap()
        );
        // Code version only affects the training flavor.
        assert_ne!(
            a.training_fingerprint(Some("1.0.0")).unwrap(),
            a.training_fingerprint(Some("1.1.0")).unwrap()
        );
        assert_ne!(
            a.data_fingerprint().unwrap(),
            a.training_fingerprint(None).unwrap()
        );
    }

    #[test]
    fn test_data_field_changes_are_detected() {
        let a = sample();

        let mut cutoff = sample();
        cutoff.cutoff_date = "2025-12-18".to_string();
        assert_ne!(a.data_fingerprint().unwrap(), cutoff.data_fingerprint().unwrap());

        let mut source = sample();
        source.source_version = Some(43);
        assert_ne!(a.data_fingerprint().unwrap(), source.data_fingerprint().unwrap());

        let mut features = sample();
        features.features.push("humidity".to_string());
        assert_ne!(a.data_fingerprint().unwrap(), features.data_fingerprint().unwrap());
    }

    #[test]
    fn test_deserialize_keeps_unknown_keys() {
        let raw = serde_json::json!({
            "plant_id": "P1",
            "circuit_id": "C1",
            "cutoff_date": "2025-01-01",
            "features": ["a"],
            "owner": "ops"
        });
        let cfg: UnitConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(cfg.extra.get("owner"), Some(&serde_json::json!("ops")));
        assert!(cfg.validate().is_ok());
    }
}
