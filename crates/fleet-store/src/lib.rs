// crates/fleet-store/src/lib.rs
//
// fleet-store: Collaborator backends for the circuit fleet control plane.
//
// Provides RocksDB-backed resource and model registries, a TOML circuits
// file as configuration store, file and HTTP approval sources, a spool
// directory compute backend driven by an external runner, and in-memory
// backends for local dry runs and tests.

pub mod approvals;
pub mod config_store;
pub mod memory;
pub mod model_registry;
pub mod registry;
pub mod rocks;
pub mod spool;

// Re-export key types for ergonomic access from downstream crates.
pub use approvals::{HttpApprovalSource, JsonFileApprovalSource};
pub use config_store::TomlConfigStore;
pub use memory::{
    InMemoryConfigStore, InMemoryModelRegistry, InMemoryResourceRegistry, ScriptStep, ScriptedComputeBackend,
    StaticApprovalSource,
};
pub use model_registry::RocksModelRegistry;
pub use registry::RocksResourceRegistry;
pub use rocks::RocksStore;
pub use spool::SpoolComputeBackend;
