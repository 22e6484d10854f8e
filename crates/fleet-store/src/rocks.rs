// crates/fleet-store/src/rocks.rs
//
// Thin RocksDB wrapper shared by the resource and model registries.
// Values are JSON; keys are `{prefix}:{name}:{version:020}` so a prefix
// scan returns versions in ascending order.

use rocksdb::{DBWithThreadMode, MultiThreaded, Options, WriteBatch};
use serde::de::DeserializeOwned;
use serde::Serialize;

use fleet_core::error::FleetError;

/// RocksDB handle with JSON helpers, mapping errors to `FleetError::Storage`.
#[derive(Debug)]
pub struct RocksStore {
    db: DBWithThreadMode<MultiThreaded>,
}

impl RocksStore {
    /// Open a RocksDB database at the given filesystem path.
    ///
    /// Creates the database directory if it does not exist.
    pub fn open(path: &str) -> Result<Self, FleetError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path).map_err(|e| {
            FleetError::Storage(format!("Failed to open RocksDB at {}: {}", path, e))
        })?;

        Ok(Self { db })
    }

    /// Key for one version of a named object: `{prefix}:{name}:{version:020}`.
    pub fn versioned_key(prefix: &str, name: &str, version: u64) -> Vec<u8> {
        format!("{}:{}:{:020}", prefix, name, version).into_bytes()
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, FleetError> {
        match self.get_raw(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Write several JSON-encoded values in one atomic batch.
    pub fn put_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<(), FleetError> {
        let mut batch = WriteBatch::default();
        for (key, value) in entries {
            batch.put(key, value);
        }
        self.db
            .write(batch)
            .map_err(|e| FleetError::Storage(format!("RocksDB batch write failed: {}", e)))
    }

    pub fn put_json<T: Serialize>(&self, key: &[u8], value: &T) -> Result<(), FleetError> {
        let bytes = serde_json::to_vec(value)?;
        self.db
            .put(key, bytes)
            .map_err(|e| FleetError::Storage(format!("RocksDB put failed: {}", e)))
    }

    /// Decode every value whose key starts with `prefix`, in key order.
    pub fn scan_json<T: DeserializeOwned>(&self, prefix: &[u8]) -> Result<Vec<T>, FleetError> {
        let mut values = Vec::new();
        for item in self.db.prefix_iterator(prefix) {
            let (key, value) = item
                .map_err(|e| FleetError::Storage(format!("RocksDB iteration error: {}", e)))?;

            // No prefix extractor is configured, so stop at the first foreign key.
            if !key.starts_with(prefix) {
                break;
            }
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn get_raw(&self, key: &[u8]) -> Result<Option<Vec<u8>>, FleetError> {
        self.db
            .get(key)
            .map_err(|e| FleetError::Storage(format!("RocksDB get failed: {}", e)))
    }
}

/// Registry names end up inside `:`-separated keys.
pub(crate) fn check_name(name: &str) -> Result<(), FleetError> {
    if name.is_empty() || name.contains(':') {
        return Err(FleetError::Config(format!(
            "invalid registry name '{}'",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn temp_db_path(label: &str) -> String {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("fleet_test_{}_{}", label, uuid::Uuid::now_v7()));
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versioned_keys_sort_numerically() {
        let k2 = RocksStore::versioned_key("res", "P1_C1", 2);
        let k10 = RocksStore::versioned_key("res", "P1_C1", 10);
        assert!(k2 < k10);
    }

    #[test]
    fn test_scan_stops_at_prefix_boundary() {
        let store = RocksStore::open(&temp_db_path("scan")).unwrap();
        store
            .put_json(&RocksStore::versioned_key("res", "A", 1), &"a1")
            .unwrap();
        store
            .put_json(&RocksStore::versioned_key("res", "A", 2), &"a2")
            .unwrap();
        store
            .put_json(&RocksStore::versioned_key("res", "AB", 1), &"ab1")
            .unwrap();

        let values: Vec<String> = store.scan_json(b"res:A:").unwrap();
        assert_eq!(values, vec!["a1".to_string(), "a2".to_string()]);
    }

    #[test]
    fn test_check_name() {
        assert!(check_name("P1_C1").is_ok());
        assert!(check_name("").is_err());
        assert!(check_name("a:b").is_err());
    }
}
