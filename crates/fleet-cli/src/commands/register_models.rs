// crates/fleet-cli/src/commands/register_models.rs
//
// `fleet register-models`: register the models of completed jobs.

use fleet_pipeline::{MonitorReport, StageReport};

use crate::commands::Context;
use crate::output::{format_json, print_failures, print_section, ModelRow, OutputFormat};
use crate::wiring::build_pipeline;

pub async fn run(ctx: &Context) -> Result<bool, Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(&ctx.config)?;
    let monitoring: MonitorReport = pipeline.load().await?;
    let report = pipeline.register_models(&monitoring).await?;

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&report)),
        OutputFormat::Table => {
            let rows: Vec<ModelRow> = report.models.iter().map(ModelRow::from).collect();
            print_section("Registered models", &rows);
            print_failures(&report.failures);
        }
    }
    Ok(!report.has_failures())
}
