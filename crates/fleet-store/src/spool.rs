// crates/fleet-store/src/spool.rs
//
// Compute backend backed by a spool directory shared with an external
// training runner.
//
// Layout:
//   {root}/jobs/{job_name}/request.json  written here on submission
//   {root}/jobs/{job_name}/status.json   written by the runner
//   {root}/staging/                      requests being written
//
// Creating the job directory is the name-collision check: a second
// submission under the same name fails with `AlreadyExists`. The request is
// written into staging first and renamed into the job directory, so a runner
// never sees a partial request and a failed write leaves no job behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleet_core::error::FleetError;
use fleet_core::job::{BackendJobStatus, JobHandle, JobStatusReport};
use fleet_core::resource::Tags;
use fleet_core::traits::ComputeBackend;

/// Body of `request.json`, consumed by the runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolRequest {
    pub job_name: String,
    pub inputs: Tags,
    pub metadata: Tags,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SpoolComputeBackend {
    root: PathBuf,
}

impl SpoolComputeBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn job_dir(&self, job_name: &str) -> PathBuf {
        self.root.join("jobs").join(job_name)
    }

    /// Write a status file the way a runner would. Used by local tooling and tests.
    pub async fn write_status(&self, job_name: &str, report: &JobStatusReport) -> Result<(), FleetError> {
        let dir = self.job_dir(job_name);
        let tmp = dir.join("status.json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(report)?).await?;
        tokio::fs::rename(&tmp, dir.join("status.json")).await?;
        Ok(())
    }
}

fn check_job_name(job_name: &str) -> Result<(), FleetError> {
    let valid = !job_name.is_empty()
        && job_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
        && job_name != "."
        && job_name != "..";
    if valid {
        Ok(())
    } else {
        Err(FleetError::Config(format!("invalid job name '{}'", job_name)))
    }
}

async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, FleetError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FleetError::Transient(format!(
            "cannot read {}: {}",
            path.display(),
            e
        ))),
    }
}

#[async_trait]
impl ComputeBackend for SpoolComputeBackend {
    async fn submit_job(
        &self,
        job_name: &str,
        inputs: &Tags,
        metadata: &Tags,
    ) -> Result<JobHandle, FleetError> {
        check_job_name(job_name)?;
        tokio::fs::create_dir_all(self.root.join("jobs")).await?;
        let staging = self.root.join("staging");
        tokio::fs::create_dir_all(&staging).await?;

        let request = SpoolRequest {
            job_name: job_name.to_string(),
            inputs: inputs.clone(),
            metadata: metadata.clone(),
            submitted_at: Utc::now(),
        };
        let staged = staging.join(format!("{}.{}.json", job_name, uuid::Uuid::now_v7()));
        tokio::fs::write(&staged, serde_json::to_vec_pretty(&request)?).await?;

        let dir = self.job_dir(job_name);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) => {
                let _ = tokio::fs::remove_file(&staged).await;
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    return Err(FleetError::AlreadyExists(format!("job {}", job_name)));
                }
                return Err(e.into());
            }
        }

        if let Err(e) = tokio::fs::rename(&staged, dir.join("request.json")).await {
            tracing::warn!("Spool: cannot place request for {}: {}", job_name, e);
            let _ = tokio::fs::remove_dir_all(&dir).await;
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(e.into());
        }

        Ok(JobHandle(job_name.to_string()))
    }

    async fn get_job_status(&self, handle: &JobHandle) -> Result<JobStatusReport, FleetError> {
        check_job_name(&handle.0)?;
        let dir = self.job_dir(&handle.0);

        match read_optional(&dir.join("status.json")).await? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                FleetError::Transient(format!("unreadable status for {}: {}", handle, e))
            }),
            None if tokio::fs::try_exists(&dir).await.unwrap_or(false) => {
                Ok(JobStatusReport::new(BackendJobStatus::Queued))
            }
            None => Err(FleetError::NotFound(format!("job {}", handle))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spool() -> SpoolComputeBackend {
        SpoolComputeBackend::new(
            std::env::temp_dir().join(format!("fleet_spool_{}", uuid::Uuid::now_v7())),
        )
    }

    #[tokio::test]
    async fn test_submit_then_poll() {
        let backend = spool();
        let mut inputs = Tags::new();
        inputs.insert("training_data".to_string(), "fleet://P1_C1/versions/1".to_string());

        let handle = backend.submit_job("P1_C1_job", &inputs, &Tags::new()).await.unwrap();
        assert_eq!(
            backend.get_job_status(&handle).await.unwrap().status,
            BackendJobStatus::Queued
        );

        let mut done = JobStatusReport::new(BackendJobStatus::Completed);
        done.output_ref = Some("runs/P1_C1_job/model".to_string());
        backend.write_status("P1_C1_job", &done).await.unwrap();
        assert_eq!(backend.get_job_status(&handle).await.unwrap(), done);
    }

    #[tokio::test]
    async fn test_name_collision() {
        let backend = spool();
        backend.submit_job("dup", &Tags::new(), &Tags::new()).await.unwrap();
        let again = backend.submit_job("dup", &Tags::new(), &Tags::new()).await;
        assert!(matches!(again, Err(FleetError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_request_is_complete_and_staging_is_cleared() {
        let backend = spool();
        let mut metadata = Tags::new();
        metadata.insert("plant_id".to_string(), "P1".to_string());
        backend.submit_job("P1_C1_job", &Tags::new(), &metadata).await.unwrap();
        backend.submit_job("P1_C1_job", &Tags::new(), &metadata).await.unwrap_err();

        let bytes = std::fs::read(backend.job_dir("P1_C1_job").join("request.json")).unwrap();
        let request: SpoolRequest = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(request.job_name, "P1_C1_job");
        assert_eq!(request.metadata["plant_id"], "P1");
        assert_eq!(std::fs::read_dir(backend.root.join("staging")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_no_job() {
        let backend = spool();
        std::fs::create_dir_all(&backend.root).unwrap();
        // A file where the staging directory belongs makes the write fail.
        std::fs::write(backend.root.join("staging"), b"").unwrap();

        assert!(backend.submit_job("P1_C1_job", &Tags::new(), &Tags::new()).await.is_err());
        assert!(!backend.job_dir("P1_C1_job").exists());
        assert!(matches!(
            backend.get_job_status(&JobHandle("P1_C1_job".to_string())).await,
            Err(FleetError::NotFound(_))
        ));

        std::fs::remove_file(backend.root.join("staging")).unwrap();
        backend.submit_job("P1_C1_job", &Tags::new(), &Tags::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_job_and_bad_names() {
        let backend = spool();
        assert!(matches!(
            backend.get_job_status(&JobHandle("nope".to_string())).await,
            Err(FleetError::NotFound(_))
        ));
        assert!(matches!(
            backend.submit_job("../escape", &Tags::new(), &Tags::new()).await,
            Err(FleetError::Config(_))
        ));
    }
}
