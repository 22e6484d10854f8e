// crates/fleet-cli/src/commands/fingerprint.rs
//
// `fleet fingerprint`: print the data and training fingerprints of the
// configured units without touching any registry.

use clap::Args;
use serde::Serialize;

use fleet_core::traits::ConfigStore;

use crate::commands::Context;
use crate::output::{format_json, print_section, FingerprintRow, OutputFormat};
use crate::wiring::config_store;

#[derive(Debug, Args)]
pub struct FingerprintArgs {
    /// Comma-separated units to show. Defaults to all.
    #[arg(long)]
    pub units: Option<String>,
}

#[derive(Serialize)]
struct FingerprintEntry {
    unit: String,
    model_name: String,
    data_fingerprint: Option<String>,
    training_fingerprint: Option<String>,
    error: Option<String>,
}

pub async fn run(ctx: &Context, args: &FingerprintArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let units = config_store(&ctx.config).list_units().await?;
    let selected: Option<Vec<String>> = args
        .units
        .as_ref()
        .map(|list| list.split(',').map(|s| s.trim().to_string()).collect());
    let code_version = ctx.config.code_version.as_deref();

    let mut entries = Vec::new();
    for unit in &units {
        if let Some(selected) = &selected {
            if !selected.contains(&unit.id().key()) {
                continue;
            }
        }
        let data = unit.data_fingerprint();
        let training = unit.training_fingerprint(code_version);
        let error = match (&data, &training) {
            (Err(e), _) | (_, Err(e)) => Some(e.to_string()),
            _ => None,
        };
        entries.push(FingerprintEntry {
            unit: unit.id().to_string(),
            model_name: unit.model_name(),
            data_fingerprint: data.ok().map(|f| f.to_string()),
            training_fingerprint: training.ok().map(|f| f.to_string()),
            error,
        });
    }

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&entries)),
        OutputFormat::Table => {
            let rows: Vec<FingerprintRow> = entries
                .iter()
                .map(|e| FingerprintRow {
                    unit: e.unit.clone(),
                    model_name: e.model_name.clone(),
                    data_fingerprint: e
                        .data_fingerprint
                        .clone()
                        .unwrap_or_else(|| e.error.clone().unwrap_or_default()),
                    training_fingerprint: e.training_fingerprint.clone().unwrap_or_default(),
                })
                .collect();
            print_section("Fingerprints", &rows);
        }
    }
    Ok(entries.iter().all(|e| e.error.is_none()))
}
