// crates/fleet-store/src/config_store.rs
//
// Configuration store backed by a TOML circuits file:
//
//   [[circuits]]
//   plant_id = "PLANT001"
//   circuit_id = "CIRCUIT01"
//   features = ["load", "temp"]
//   cutoff_date = "2025-12-11"
//   source_version = 42
//   [circuits.hyperparameters]
//   learning_rate = 0.001

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use fleet_core::error::FleetError;
use fleet_core::traits::ConfigStore;
use fleet_core::unit::{RejectedEntry, UnitConfig, UnitId, UnitListing};

#[derive(Debug, Deserialize)]
struct CircuitsFile {
    #[serde(default)]
    circuits: Vec<toml::Value>,
}

/// Reads the circuits file on every call so edits between runs are seen.
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse circuits from TOML text.
    ///
    /// Entries that cannot be decoded at all are returned as rejected;
    /// entries that decode but are incomplete are returned as units and
    /// rejected per unit by `UnitConfig::validate` downstream.
    pub fn parse(contents: &str) -> Result<UnitListing, FleetError> {
        let file: CircuitsFile = toml::from_str(contents)
            .map_err(|e| FleetError::Config(format!("invalid circuits file: {}", e)))?;

        let mut listing = UnitListing::default();
        for (index, raw) in file.circuits.into_iter().enumerate() {
            let unit = entry_identity(&raw, index);
            match UnitConfig::deserialize(raw) {
                Ok(config) => listing.units.push(config),
                Err(e) => {
                    tracing::warn!("Circuit entry #{} ({}) cannot be decoded: {}", index, unit, e);
                    listing.rejected.push(RejectedEntry {
                        unit,
                        reason: format!("circuit entry #{} cannot be decoded: {}", index, e),
                    });
                }
            }
        }
        Ok(listing)
    }

    async fn load(&self) -> Result<UnitListing, FleetError> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            FleetError::Config(format!(
                "cannot read circuits file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Self::parse(&contents)
    }
}

/// Best-effort identity of an undecodable entry.
fn entry_identity(raw: &toml::Value, index: usize) -> UnitId {
    let field = |name: &str| raw.get(name).and_then(|v| v.as_str()).map(str::to_string);
    UnitId::new(
        field("plant_id").unwrap_or_else(|| "?".to_string()),
        field("circuit_id").unwrap_or_else(|| format!("#{}", index)),
    )
}

#[async_trait]
impl ConfigStore for TomlConfigStore {
    async fn list_units(&self) -> Result<Vec<UnitConfig>, FleetError> {
        Ok(self.load().await?.units)
    }

    async fn list_entries(&self) -> Result<UnitListing, FleetError> {
        self.load().await
    }

    async fn get_unit(&self, plant_id: &str, circuit_id: &str) -> Result<UnitConfig, FleetError> {
        self.load()
            .await?
            .units
            .into_iter()
            .find(|u| u.plant_id == plant_id && u.circuit_id == circuit_id)
            .ok_or_else(|| FleetError::NotFound(format!("unit {}/{}", plant_id, circuit_id)))
    }
}
