// crates/fleet-cli/src/commands/register_data.rs
//
// `fleet register-data`: register data snapshots for the detected units.

use fleet_pipeline::{DetectionReport, StageReport};

use crate::commands::Context;
use crate::output::{format_json, print_failures, print_section, OutputFormat, SnapshotRow};
use crate::wiring::build_pipeline;

pub async fn run(ctx: &Context) -> Result<bool, Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(&ctx.config)?;
    let detection: DetectionReport = pipeline.load().await?;
    let report = pipeline.register_data(&detection).await?;

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&report)),
        OutputFormat::Table => {
            let rows: Vec<SnapshotRow> = report.snapshots.iter().map(SnapshotRow::from).collect();
            print_section("Data snapshots", &rows);
            print_failures(&report.failures);
        }
    }
    Ok(!report.has_failures())
}
