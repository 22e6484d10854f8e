// crates/fleet-core/src/lib.rs
//
// fleet-core: Core types, fingerprinting, and collaborator traits for the
// circuit fleet retraining control plane.
//
// This is the leaf crate that all other crates in the workspace depend on.
// It defines the unit configuration model, the two fingerprint flavors,
// registered resources, training jobs, promotion records, the error
// taxonomy, and the abstract interfaces of every external collaborator
// (configuration store, resource registry, compute backend, model registry,
// approval source).

pub mod error;
pub mod fingerprint;
pub mod job;
pub mod promotion;
pub mod resource;
pub mod traits;
pub mod unit;

// Re-export key types for ergonomic access from downstream crates.
// Usage: `use fleet_core::UnitConfig;`

// Unit types
pub use unit::{UnitConfig, UnitId};

// Fingerprint types
pub use fingerprint::{fingerprint, Fingerprint, FingerprintKind};

// Resource types
pub use resource::{RegisteredResource, ResourceKind, ResourceRef, Tags};

// Job types
pub use job::{BackendJobStatus, JobHandle, JobState, JobStatusReport, TrainingJob};

// Promotion types
pub use promotion::{
    ApprovalPolicy, ApprovalSignal, ApprovalState, ModelCandidate, PromotionOutcome,
    PromotionRecord, PromotionStatus,
};

// Error types
pub use error::{FailureKind, FleetError, UnitFailure};

// Traits
pub use traits::{ApprovalSource, ComputeBackend, ConfigStore, ModelRegistry, ResourceRegistry};
