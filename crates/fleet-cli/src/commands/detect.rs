// crates/fleet-cli/src/commands/detect.rs
//
// `fleet detect`: list the units whose fingerprints changed.

use fleet_pipeline::StageReport;

use crate::commands::{Context, SelectionArgs};
use crate::output::{format_json, print_failures, print_section, ChangedRow, OutputFormat};
use crate::wiring::build_pipeline;

pub async fn run(ctx: &Context, args: &SelectionArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(&ctx.config)?;
    let report = pipeline.detect(&args.options()).await?;

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&report)),
        OutputFormat::Table => {
            let rows: Vec<ChangedRow> = report.changed.iter().map(ChangedRow::from).collect();
            print_section("Units needing work", &rows);
            println!(
                "{} units checked, {} unchanged",
                report.total_units,
                report.unchanged.len()
            );
            print_failures(&report.failures);
        }
    }
    Ok(!report.has_failures())
}
