// crates/fleet-cli/src/wiring.rs
//
// Builds the pipeline from configuration: RocksDB registries under the
// data directory, the spool compute backend, and the configured approval
// source.

use std::path::Path;
use std::sync::Arc;

use fleet_core::traits::ApprovalSource;
use fleet_pipeline::{Collaborators, Pipeline};
use fleet_store::{
    HttpApprovalSource, JsonFileApprovalSource, RocksModelRegistry, RocksResourceRegistry,
    SpoolComputeBackend, StaticApprovalSource, TomlConfigStore,
};

use crate::config::{expand_tilde, PipelineConfig};

pub fn config_store(config: &PipelineConfig) -> TomlConfigStore {
    TomlConfigStore::new(expand_tilde(&config.circuits_file))
}

fn approval_source(config: &PipelineConfig) -> Arc<dyn ApprovalSource> {
    match (&config.approval.url, &config.approval.file) {
        (Some(url), _) => {
            tracing::info!("Approvals from {}", url);
            Arc::new(HttpApprovalSource::new(url))
        }
        (None, Some(file)) => {
            tracing::info!("Approvals from {}", file);
            Arc::new(JsonFileApprovalSource::new(expand_tilde(file)))
        }
        (None, None) => {
            tracing::info!(
                "No approval source configured; policy {:?} decides every candidate",
                config.approval.policy
            );
            Arc::new(StaticApprovalSource::new())
        }
    }
}

pub fn build_pipeline(config: &PipelineConfig) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let data_dir = expand_tilde(&config.data_dir);
    let registry_path = Path::new(&data_dir).join("registry");
    std::fs::create_dir_all(&data_dir)?;
    let shared_path = expand_tilde(&config.promotion.registry_dir);
    if let Some(parent) = Path::new(&shared_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let resources = RocksResourceRegistry::open(&registry_path.to_string_lossy())?;
    let shared = RocksModelRegistry::open(&shared_path)?;

    let collaborators = Collaborators {
        config_store: Arc::new(config_store(config)),
        resources: Arc::new(resources),
        compute: Arc::new(SpoolComputeBackend::new(expand_tilde(&config.spool_dir))),
        shared_registry: Arc::new(shared),
        approvals: approval_source(config),
    };
    Ok(Pipeline::new(collaborators, config.settings()))
}
