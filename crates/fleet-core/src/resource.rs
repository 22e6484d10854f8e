// crates/fleet-core/src/resource.rs
//
// Versioned registered artifacts (data snapshots and trained models).
// Append-only: new versions are created, existing versions never change.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Resource tag map. Ordered so serialized records are stable.
pub type Tags = BTreeMap<String, String>;

/// Well-known tag keys.
pub mod tag {
    pub const FINGERPRINT: &str = "fingerprint";
    pub const TRAINING_FINGERPRINT: &str = "training_fingerprint";
    pub const PLANT_ID: &str = "plant_id";
    pub const CIRCUIT_ID: &str = "circuit_id";
    pub const CUTOFF_DATE: &str = "cutoff_date";
    pub const SOURCE_VERSION: &str = "source_version";
    pub const NUM_FEATURES: &str = "num_features";
    pub const TRAINING_JOB: &str = "training_job";
    pub const MODEL_NAME: &str = "model_name";
    pub const DATA_RESOURCE: &str = "data_resource";
    pub const PROMOTED_FROM: &str = "promoted_from";
    /// Prefix for job metrics copied onto model tags.
    pub const METRIC_PREFIX: &str = "metric.";
}

/// Kind of registered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    DataSnapshot,
    Model,
}

/// Name + version pointer to a registered resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceRef {
    pub name: String,
    pub version: u64,
}

impl ResourceRef {
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// URI handed to the compute backend and the promotion target.
    pub fn uri(&self) -> String {
        format!("fleet://{}/versions/{}", self.name, self.version)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:v{}", self.name, self.version)
    }
}

/// A versioned, named artifact tagged with its fingerprint and lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredResource {
    pub name: String,
    /// Registry-assigned version, starting at 1.
    pub version: u64,
    pub kind: ResourceKind,
    /// Where the payload lives (local directory, job output URI, ...).
    pub payload_ref: String,
    pub tags: Tags,
    pub created_at: DateTime<Utc>,
}

impl RegisteredResource {
    pub fn reference(&self) -> ResourceRef {
        ResourceRef::new(&self.name, self.version)
    }

    /// The fingerprint this resource was registered under, if it carries a
    /// well-formed one.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.tags
            .get(tag::FINGERPRINT)
            .and_then(|raw| Fingerprint::parse(raw).ok())
    }

    /// Whether every entry of `filter` is present with the same value.
    pub fn matches(&self, filter: &Tags) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.tags.get(k).map(|t| t == v).unwrap_or(false))
    }
}
