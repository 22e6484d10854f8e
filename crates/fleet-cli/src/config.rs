// crates/fleet-cli/src/config.rs
//
// Runtime configuration for the `fleet` CLI.
// Loaded from a TOML file or populated with sensible defaults.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use fleet_core::promotion::ApprovalPolicy;
use fleet_pipeline::{MonitorConfig, PipelineSettings};

/// Top-level configuration (`fleet.toml`).
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// TOML file holding the `[[circuits]]` unit definitions.
    #[serde(default = "default_circuits_file")]
    pub circuits_file: String,

    /// Directory for local registry storage (RocksDB).
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Spool directory shared with the training runner.
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,

    /// Where stage records are written and read.
    #[serde(default = "default_records_dir")]
    pub records_dir: String,

    /// Prefix of data snapshot payload references.
    #[serde(default = "default_snapshot_root")]
    pub snapshot_root: String,

    /// Version of the training code, folded into training fingerprints.
    #[serde(default)]
    pub code_version: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub submit: SubmitSection,

    #[serde(default)]
    pub approval: ApprovalSection,

    #[serde(default)]
    pub promotion: PromotionSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_monitor_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_progress_every_polls")]
    pub progress_every_polls: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitSection {
    #[serde(default = "default_submit_parallel")]
    pub max_parallel: usize,
}

/// Where approval decisions come from. `url` wins over `file`; with
/// neither, every key is absent and `policy` decides.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalSection {
    #[serde(default)]
    pub policy: ApprovalPolicy,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromotionSection {
    /// Written as the `promoted_from` tag on promoted models.
    #[serde(default = "default_promoted_from")]
    pub promoted_from: String,
    /// RocksDB directory of the shared model registry.
    #[serde(default = "default_registry_dir")]
    pub registry_dir: String,
}

fn default_circuits_file() -> String {
    "circuits.toml".to_string()
}

fn default_data_dir() -> String {
    "~/.fleet/data".to_string()
}

fn default_spool_dir() -> String {
    "~/.fleet/spool".to_string()
}

fn default_records_dir() -> String {
    "records".to_string()
}

fn default_snapshot_root() -> String {
    "~/.fleet/snapshots".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_timeout_secs() -> u64 {
    6 * 60 * 60
}

fn default_monitor_parallel() -> usize {
    16
}

fn default_progress_every_polls() -> u32 {
    5
}

fn default_submit_parallel() -> usize {
    8
}

fn default_promoted_from() -> String {
    "dev".to_string()
}

fn default_registry_dir() -> String {
    "~/.fleet/shared-registry".to_string()
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_timeout_secs(),
            max_parallel: default_monitor_parallel(),
            progress_every_polls: default_progress_every_polls(),
        }
    }
}

impl Default for SubmitSection {
    fn default() -> Self {
        Self {
            max_parallel: default_submit_parallel(),
        }
    }
}

impl Default for PromotionSection {
    fn default() -> Self {
        Self {
            promoted_from: default_promoted_from(),
            registry_dir: default_registry_dir(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            circuits_file: default_circuits_file(),
            data_dir: default_data_dir(),
            spool_dir: default_spool_dir(),
            records_dir: default_records_dir(),
            snapshot_root: default_snapshot_root(),
            code_version: None,
            log_level: default_log_level(),
            monitor: MonitorSection::default(),
            submit: SubmitSection::default(),
            approval: ApprovalSection::default(),
            promotion: PromotionSection::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file at the given path.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = fs::read_to_string(expand_tilde(path))?;
        let config: PipelineConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn records_path(&self) -> PathBuf {
        PathBuf::from(expand_tilde(&self.records_dir))
    }

    /// Stage settings derived from this configuration.
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            code_version: self.code_version.clone(),
            snapshot_root: expand_tilde(&self.snapshot_root),
            submit_max_parallel: self.submit.max_parallel,
            monitor: MonitorConfig {
                poll_interval: Duration::from_secs(self.monitor.poll_interval_secs.max(1)),
                timeout: Duration::from_secs(self.monitor.timeout_secs),
                max_parallel: self.monitor.max_parallel,
                progress_every_polls: self.monitor.progress_every_polls,
            },
            approval_policy: self.approval.policy,
            promoted_from: self.promotion.promoted_from.clone(),
            records_dir: Some(self.records_path()),
        }
    }
}

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{}", home.display(), &path[1..]);
        }
    }
    path.to_string()
}
