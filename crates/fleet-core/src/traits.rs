// crates/fleet-core/src/traits.rs
//
// Contracts of the external collaborators the control plane is wired to.
// Implemented by fleet-store; fakes live alongside the real backends.

use async_trait::async_trait;

use crate::error::FleetError;
use crate::job::{JobHandle, JobStatusReport};
use crate::promotion::ApprovalSignal;
use crate::resource::{RegisteredResource, ResourceKind, Tags};
use crate::unit::{UnitConfig, UnitListing};

/// Source of unit configurations.
///
/// Implemented by fleet-store (TOML circuits file).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// List every configured unit, valid or not. Validation happens per unit
    /// downstream so one bad entry never hides the rest.
    async fn list_units(&self) -> Result<Vec<UnitConfig>, FleetError>;

    /// Like `list_units`, plus the entries that could not be decoded into a
    /// `UnitConfig` at all, so they can be reported per unit.
    async fn list_entries(&self) -> Result<UnitListing, FleetError> {
        Ok(UnitListing {
            units: self.list_units().await?,
            rejected: Vec::new(),
        })
    }

    /// Get one unit by identity.
    async fn get_unit(&self, plant_id: &str, circuit_id: &str) -> Result<UnitConfig, FleetError>;
}

/// Versioned, append-only registry of data snapshots and models.
///
/// Implemented by fleet-store (RocksDB and in-memory backends).
#[async_trait]
pub trait ResourceRegistry: Send + Sync {
    /// List versions of `name` whose tags contain every entry of `tag_filter`,
    /// ordered by ascending version.
    async fn list_versions(
        &self,
        name: &str,
        tag_filter: &Tags,
    ) -> Result<Vec<RegisteredResource>, FleetError>;

    /// Create the next version of `name`.
    async fn create_version(
        &self,
        name: &str,
        kind: ResourceKind,
        payload_ref: &str,
        tags: &Tags,
    ) -> Result<RegisteredResource, FleetError>;

    /// Latest version of `name`, or `None` if nothing is registered.
    async fn get_latest(&self, name: &str) -> Result<Option<RegisteredResource>, FleetError>;
}

/// Training job execution backend.
///
/// Implemented by fleet-store (spool directory and scripted in-memory backends).
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Submit a job under `job_name`. Must fail with `AlreadyExists` if the
    /// name is taken.
    async fn submit_job(
        &self,
        job_name: &str,
        inputs: &Tags,
        metadata: &Tags,
    ) -> Result<JobHandle, FleetError>;

    /// Current status of a submitted job.
    async fn get_job_status(&self, handle: &JobHandle) -> Result<JobStatusReport, FleetError>;
}

/// Shared model registry that promoted models are copied into.
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn exists(&self, name: &str, version: u64) -> Result<bool, FleetError>;

    /// Copy a model from `source_ref` under `name`/`version`. Returns `false`
    /// if the registry declined the copy.
    async fn copy_from(
        &self,
        source_ref: &str,
        name: &str,
        version: u64,
        tags: &Tags,
    ) -> Result<bool, FleetError>;
}

/// External approval signal keyed by `plant_id:model_name:version`.
#[async_trait]
pub trait ApprovalSource: Send + Sync {
    async fn get_approval_status(&self, key: &str) -> Result<ApprovalSignal, FleetError>;
}
