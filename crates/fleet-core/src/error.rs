// crates/fleet-core/src/error.rs

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::unit::UnitId;

/// Error taxonomy for the fleet control plane.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Configuration error (missing required field, malformed fingerprint input).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A registry lookup failed, so the last known fingerprint is unknown.
    ///
    /// Kept apart from `Transient` so change detection never mistakes a
    /// failed query for "no prior resource".
    #[error("Registry query failed: {0}")]
    QueryFailed(String),

    /// Transient backend error (network, rate limit, unavailable).
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// Terminal backend rejection of a call.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The backend already holds an object with this identity.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid job or promotion state transition.
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    /// A second in-flight submission for the same unit.
    #[error("Duplicate submission: {0}")]
    DuplicateSubmission(String),

    /// Storage layer error (RocksDB, spool directory).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl FleetError {
    /// Whether re-invoking the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, FleetError::Transient(_) | FleetError::QueryFailed(_))
    }

    /// Classify this error for per-unit failure records.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FleetError::Config(_) | FleetError::Serialization(_) => FailureKind::Config,
            FleetError::QueryFailed(_) | FleetError::Transient(_) => FailureKind::Transient,
            FleetError::DuplicateSubmission(_) => FailureKind::Duplicate,
            _ => FailureKind::Backend,
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        FleetError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for FleetError {
    fn from(e: std::io::Error) -> Self {
        FleetError::Io(e.to_string())
    }
}

/// Category of a per-unit failure recorded in a stage report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Bad or incomplete unit configuration.
    Config,
    /// Transient backend problem; re-running the stage may succeed.
    Transient,
    /// The backend rejected the call or reported a terminal failure.
    Backend,
    /// The unit already has a training job in flight.
    InFlight,
    /// The unit appeared more than once in a single batch.
    Duplicate,
    /// Monitoring stopped waiting; the backend job may still finish.
    TimedOut,
}

/// A failure isolated to one unit. Never aborts the rest of the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit: UnitId,
    /// Stage that produced the failure (e.g. "detect", "submit").
    pub stage: String,
    pub kind: FailureKind,
    pub message: String,
}

impl UnitFailure {
    /// Build a failure record from an error raised while processing `unit`.
    pub fn from_error(unit: &UnitId, stage: &str, err: &FleetError) -> Self {
        Self {
            unit: unit.clone(),
            stage: stage.to_string(),
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }

    pub fn new(unit: &UnitId, stage: &str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            unit: unit.clone(),
            stage: stage.to_string(),
            kind,
            message: message.into(),
        }
    }
}
