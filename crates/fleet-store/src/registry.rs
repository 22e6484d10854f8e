// crates/fleet-store/src/registry.rs
//
// RocksDB-backed resource registry for data snapshots and models.
//
// Key format:
//   - Version: `res:{name}:{version:020}` -> JSON RegisteredResource
//   - Head:    `head:{name}`              -> JSON u64 (latest version)
//
// Versions are append-only. Creation is serialized in-process so two
// registrars sharing one handle never hand out the same version; separate
// processes must not share the database (RocksDB enforces this with a lock).

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use fleet_core::error::FleetError;
use fleet_core::resource::{RegisteredResource, ResourceKind, Tags};
use fleet_core::traits::ResourceRegistry;

use crate::rocks::{check_name, RocksStore};

/// Persistent registry implementing the `ResourceRegistry` trait.
#[derive(Debug)]
pub struct RocksResourceRegistry {
    store: RocksStore,
    create_lock: Mutex<()>,
}

impl RocksResourceRegistry {
    pub fn open(path: &str) -> Result<Self, FleetError> {
        Ok(Self {
            store: RocksStore::open(path)?,
            create_lock: Mutex::new(()),
        })
    }

    fn head_key(name: &str) -> Vec<u8> {
        format!("head:{}", name).into_bytes()
    }

    fn head(&self, name: &str) -> Result<Option<u64>, FleetError> {
        self.store.get_json(&Self::head_key(name))
    }
}

#[async_trait]
impl ResourceRegistry for RocksResourceRegistry {
    async fn list_versions(
        &self,
        name: &str,
        tag_filter: &Tags,
    ) -> Result<Vec<RegisteredResource>, FleetError> {
        check_name(name)?;
        let prefix = format!("res:{}:", name);
        let all: Vec<RegisteredResource> = self.store.scan_json(prefix.as_bytes())?;
        Ok(all.into_iter().filter(|r| r.matches(tag_filter)).collect())
    }

    async fn create_version(
        &self,
        name: &str,
        kind: ResourceKind,
        payload_ref: &str,
        tags: &Tags,
    ) -> Result<RegisteredResource, FleetError> {
        check_name(name)?;
        let _guard = self
            .create_lock
            .lock()
            .map_err(|e| FleetError::Storage(format!("Mutex poisoned: {}", e)))?;

        let version = self.head(name)?.unwrap_or(0) + 1;
        let resource = RegisteredResource {
            name: name.to_string(),
            version,
            kind,
            payload_ref: payload_ref.to_string(),
            tags: tags.clone(),
            created_at: Utc::now(),
        };

        self.store.put_batch(vec![
            (
                RocksStore::versioned_key("res", name, version),
                serde_json::to_vec(&resource)?,
            ),
            (Self::head_key(name), serde_json::to_vec(&version)?),
        ])?;

        tracing::debug!("Registered {} ({:?})", resource.reference(), kind);
        Ok(resource)
    }

    async fn get_latest(&self, name: &str) -> Result<Option<RegisteredResource>, FleetError> {
        check_name(name)?;
        match self.head(name)? {
            Some(version) => self
                .store
                .get_json(&RocksStore::versioned_key("res", name, version)),
            None => Ok(None),
        }
    }
}
