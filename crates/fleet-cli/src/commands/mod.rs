// crates/fleet-cli/src/commands/mod.rs
//
// Command module declarations for the fleet CLI.
//
// Every command returns `Ok(true)` when no unit failed, so `main` can turn
// a partially failed batch into a non-zero exit code.

use clap::Args;

use fleet_pipeline::DetectOptions;

use crate::config::PipelineConfig;
use crate::output::OutputFormat;

pub mod detect;
pub mod fingerprint;
pub mod monitor;
pub mod promote;
pub mod register_data;
pub mod register_models;
pub mod run;
pub mod submit;

/// Everything a command needs besides its own arguments.
pub struct Context {
    pub config: PipelineConfig,
    pub format: OutputFormat,
}

/// Unit selection shared by `detect` and `run`.
#[derive(Debug, Args)]
pub struct SelectionArgs {
    /// Comma-separated units to consider, e.g. `PLANT001_CIRCUIT01,PLANT002_CIRCUIT03`.
    #[arg(long)]
    pub units: Option<String>,

    /// Treat every selected unit as needing work, ignoring fingerprints.
    #[arg(long)]
    pub force: bool,
}

impl SelectionArgs {
    pub fn options(&self) -> DetectOptions {
        let options = DetectOptions::default().force(self.force);
        match &self.units {
            Some(list) => options.with_selection_list(list),
            None => options,
        }
    }
}
