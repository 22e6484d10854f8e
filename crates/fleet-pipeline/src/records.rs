// crates/fleet-pipeline/src/records.rs
//
// Persisted stage records. Each stage writes its report as pretty JSON into
// the records directory; the next stage (possibly in another process) reads
// it back. Writes go to a temporary file that is renamed into place, so a
// crash never leaves a half-written record behind.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use fleet_core::error::{FleetError, UnitFailure};

/// A stage output that can be persisted and summarized.
pub trait StageReport: Serialize + DeserializeOwned {
    /// File name inside the records directory.
    const FILE_NAME: &'static str;
    /// Stage name used in logs and failure records.
    const STAGE: &'static str;

    /// Units that failed in this stage.
    fn failures(&self) -> &[UnitFailure];

    /// Whether the batch should be reported as failed.
    fn has_failures(&self) -> bool {
        !self.failures().is_empty()
    }
}

pub fn record_path<T: StageReport>(dir: &Path) -> PathBuf {
    dir.join(T::FILE_NAME)
}

/// Atomically write `report` into `dir`.
pub async fn write_record<T: StageReport>(dir: &Path, report: &T) -> Result<PathBuf, FleetError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = record_path::<T>(dir);
    let tmp = dir.join(format!(".{}.{}.tmp", T::FILE_NAME, uuid::Uuid::now_v7()));
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(report)?).await?;
    if let Err(e) = tokio::fs::rename(&tmp, &path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    tracing::debug!("Wrote {} record to {}", T::STAGE, path.display());
    Ok(path)
}

/// Read the record of a prior stage. A missing record is `NotFound`.
pub async fn read_record<T: StageReport>(dir: &Path) -> Result<T, FleetError> {
    read_optional_record(dir).await?.ok_or_else(|| {
        FleetError::NotFound(format!(
            "{} (run the stage that produces it first)",
            record_path::<T>(dir).display()
        ))
    })
}

/// Read a record that may legitimately not exist yet.
pub async fn read_optional_record<T: StageReport>(dir: &Path) -> Result<Option<T>, FleetError> {
    let path = record_path::<T>(dir);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes).map(Some).map_err(|e| {
        FleetError::Serialization(format!("{}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct SampleRecord {
        value: u32,
        failures: Vec<UnitFailure>,
    }

    impl StageReport for SampleRecord {
        const FILE_NAME: &'static str = "sample.json";
        const STAGE: &'static str = "sample";

        fn failures(&self) -> &[UnitFailure] {
            &self.failures
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("fleet_records_test_{}", uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = temp_dir();
        let record = SampleRecord {
            value: 7,
            failures: vec![],
        };
        let path = write_record(&dir, &record).await.unwrap();
        assert!(path.ends_with("sample.json"));
        assert_eq!(read_record::<SampleRecord>(&dir).await.unwrap(), record);
        assert!(!record.has_failures());

        // No temporary files are left behind.
        let mut entries = tokio::fs::read_dir(&dir).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["sample.json".to_string()]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_missing_and_corrupt_records() {
        let dir = temp_dir();
        assert!(read_optional_record::<SampleRecord>(&dir).await.unwrap().is_none());
        assert!(matches!(
            read_record::<SampleRecord>(&dir).await,
            Err(FleetError::NotFound(_))
        ));

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("sample.json"), b"{not json").unwrap();
        assert!(matches!(
            read_record::<SampleRecord>(&dir).await,
            Err(FleetError::Serialization(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
