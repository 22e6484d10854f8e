// crates/fleet-store/src/model_registry.rs
//
// RocksDB-backed shared model registry (promotion target).
//
// Key format: `model:{name}:{version:020}` -> JSON PromotedModel

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::error::FleetError;
use fleet_core::resource::Tags;
use fleet_core::traits::ModelRegistry;

use crate::rocks::{check_name, RocksStore};

/// A model copied into the shared registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotedModel {
    pub name: String,
    pub version: u64,
    pub source_ref: String,
    pub tags: Tags,
    pub copied_at: DateTime<Utc>,
}

/// Persistent model registry implementing the `ModelRegistry` trait.
#[derive(Debug)]
pub struct RocksModelRegistry {
    store: RocksStore,
    copy_lock: Mutex<()>,
}

impl RocksModelRegistry {
    pub fn open(path: &str) -> Result<Self, FleetError> {
        Ok(Self {
            store: RocksStore::open(path)?,
            copy_lock: Mutex::new(()),
        })
    }

    /// Fetch a promoted model with its lineage tags.
    pub fn get(&self, name: &str, version: u64) -> Result<Option<PromotedModel>, FleetError> {
        check_name(name)?;
        self.store
            .get_json(&RocksStore::versioned_key("model", name, version))
    }

    /// All promoted versions of `name`, ascending.
    pub fn list(&self, name: &str) -> Result<Vec<PromotedModel>, FleetError> {
        check_name(name)?;
        self.store.scan_json(format!("model:{}:", name).as_bytes())
    }
}

#[async_trait]
impl ModelRegistry for RocksModelRegistry {
    async fn exists(&self, name: &str, version: u64) -> Result<bool, FleetError> {
        Ok(self.get(name, version)?.is_some())
    }

    async fn copy_from(
        &self,
        source_ref: &str,
        name: &str,
        version: u64,
        tags: &Tags,
    ) -> Result<bool, FleetError> {
        check_name(name)?;
        let _guard = self
            .copy_lock
            .lock()
            .map_err(|e| FleetError::Storage(format!("Mutex poisoned: {}", e)))?;

        if self.get(name, version)?.is_some() {
            return Err(FleetError::AlreadyExists(format!("{}:v{}", name, version)));
        }

        let model = PromotedModel {
            name: name.to_string(),
            version,
            source_ref: source_ref.to_string(),
            tags: tags.clone(),
            copied_at: Utc::now(),
        };
        self.store
            .put_json(&RocksStore::versioned_key("model", name, version), &model)?;
        tracing::debug!("Copied {} into model registry as {}:v{}", source_ref, name, version);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rocks::temp_db_path;

    #[tokio::test]
    async fn test_copy_then_exists() {
        let registry = RocksModelRegistry::open(&temp_db_path("models")).unwrap();
        assert!(!registry.exists("p1-c1", 3).await.unwrap());

        let mut tags = Tags::new();
        tags.insert("plant_id".to_string(), "P1".to_string());
        assert!(registry
            .copy_from("fleet://p1-c1/versions/3", "p1-c1", 3, &tags)
            .await
            .unwrap());
        assert!(registry.exists("p1-c1", 3).await.unwrap());
        assert!(!registry.exists("p1-c1", 4).await.unwrap());

        let stored = registry.get("p1-c1", 3).unwrap().unwrap();
        assert_eq!(stored.tags.get("plant_id").unwrap(), "P1");
        assert_eq!(registry.list("p1-c1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_second_copy_is_rejected() {
        let registry = RocksModelRegistry::open(&temp_db_path("models_dup")).unwrap();
        registry
            .copy_from("src", "p1-c1", 1, &Tags::new())
            .await
            .unwrap();
        let again = registry.copy_from("src", "p1-c1", 1, &Tags::new()).await;
        assert!(matches!(again, Err(FleetError::AlreadyExists(_))));
    }
}
