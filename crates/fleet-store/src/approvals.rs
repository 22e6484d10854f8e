// crates/fleet-store/src/approvals.rs
//
// Approval sources: a JSON file maintained by operators and an HTTP
// endpoint fronting an external approval workflow.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use fleet_core::error::FleetError;
use fleet_core::promotion::ApprovalSignal;
use fleet_core::traits::ApprovalSource;

/// Map a textual status onto an approval signal.
fn parse_signal(key: &str, raw: &str) -> ApprovalSignal {
    match raw.trim().to_ascii_lowercase().as_str() {
        "approved" => ApprovalSignal::Approved,
        "rejected" => ApprovalSignal::Rejected,
        "pending" => ApprovalSignal::Pending,
        other => {
            tracing::warn!(
                "Unrecognized approval status '{}' for {}; treating as pending",
                other,
                key
            );
            ApprovalSignal::Pending
        }
    }
}

/// Approvals kept in a JSON object: `{"PLANT001:model:3": "approved", ...}`.
///
/// The file is re-read on every query so approvals granted between passes
/// are picked up. A missing file means every key is absent.
#[derive(Debug, Clone)]
pub struct JsonFileApprovalSource {
    path: PathBuf,
}

impl JsonFileApprovalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ApprovalSource for JsonFileApprovalSource {
    async fn get_approval_status(&self, key: &str) -> Result<ApprovalSignal, FleetError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ApprovalSignal::Absent);
            }
            Err(e) => {
                return Err(FleetError::Transient(format!(
                    "cannot read approvals {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        let approvals: HashMap<String, String> = serde_json::from_str(&contents).map_err(|e| {
            FleetError::Config(format!("invalid approvals file {}: {}", self.path.display(), e))
        })?;

        Ok(approvals
            .get(key)
            .map(|raw| parse_signal(key, raw))
            .unwrap_or(ApprovalSignal::Absent))
    }
}

/// Response body of the approval endpoint.
#[derive(Debug, Deserialize)]
struct ApprovalResponse {
    status: String,
}

/// Approval endpoint queried as `GET {base_url}/{key}`.
///
/// 404 means no record (absent); 429 and 5xx are transient.
#[derive(Debug, Clone)]
pub struct HttpApprovalSource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpApprovalSource {
    pub fn new(base_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[async_trait]
impl ApprovalSource for HttpApprovalSource {
    async fn get_approval_status(&self, key: &str) -> Result<ApprovalSignal, FleetError> {
        let resp = self
            .client
            .get(self.url_for(key))
            .send()
            .await
            .map_err(|e| FleetError::Transient(format!("HTTP error: {}", e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(ApprovalSignal::Absent);
        }
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(FleetError::Transient(format!(
                "approval endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(FleetError::Backend(format!(
                "approval endpoint returned {}",
                status
            )));
        }

        let body: ApprovalResponse = resp
            .json()
            .await
            .map_err(|e| FleetError::Serialization(format!("Failed to parse response: {}", e)))?;
        Ok(parse_signal(key, &body.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!("fleet_{}_{}.json", label, uuid::Uuid::now_v7()))
    }

    #[tokio::test]
    async fn test_missing_file_is_absent() {
        let source = JsonFileApprovalSource::new(temp_file("missing"));
        assert_eq!(
            source.get_approval_status("P1:m:1").await.unwrap(),
            ApprovalSignal::Absent
        );
    }

    #[tokio::test]
    async fn test_file_statuses() {
        let path = temp_file("approvals");
        std::fs::write(
            &path,
            r#"{"P1:m:1": "approved", "P1:m:2": "Rejected", "P1:m:3": "pending", "P1:m:4": "maybe"}"#,
        )
        .unwrap();
        let source = JsonFileApprovalSource::new(&path);

        assert_eq!(source.get_approval_status("P1:m:1").await.unwrap(), ApprovalSignal::Approved);
        assert_eq!(source.get_approval_status("P1:m:2").await.unwrap(), ApprovalSignal::Rejected);
        assert_eq!(source.get_approval_status("P1:m:3").await.unwrap(), ApprovalSignal::Pending);
        assert_eq!(source.get_approval_status("P1:m:4").await.unwrap(), ApprovalSignal::Pending);
        assert_eq!(source.get_approval_status("P1:m:5").await.unwrap(), ApprovalSignal::Absent);
    }

    #[tokio::test]
    async fn test_file_is_reread_between_queries() {
        let path = temp_file("reread");
        std::fs::write(&path, r#"{"P1:m:1": "pending"}"#).unwrap();
        let source = JsonFileApprovalSource::new(&path);
        assert_eq!(source.get_approval_status("P1:m:1").await.unwrap(), ApprovalSignal::Pending);

        std::fs::write(&path, r#"{"P1:m:1": "approved"}"#).unwrap();
        assert_eq!(source.get_approval_status("P1:m:1").await.unwrap(), ApprovalSignal::Approved);
    }

    #[tokio::test]
    async fn test_malformed_file_is_config_error() {
        let path = temp_file("malformed");
        std::fs::write(&path, "not json").unwrap();
        let source = JsonFileApprovalSource::new(&path);
        assert!(matches!(
            source.get_approval_status("P1:m:1").await,
            Err(FleetError::Config(_))
        ));
    }

    #[test]
    fn test_http_url_building() {
        let source = HttpApprovalSource::new("http://approvals.local/api/");
        assert_eq!(
            source.url_for("P1:m:1"),
            "http://approvals.local/api/P1:m:1"
        );
    }
}
