// crates/fleet-cli/src/commands/submit.rs
//
// `fleet submit`: submit one training job per registered snapshot.

use fleet_pipeline::{DataRegistrationReport, StageReport};

use crate::commands::Context;
use crate::output::{format_json, print_failures, print_section, JobRow, OutputFormat};
use crate::wiring::build_pipeline;

pub async fn run(ctx: &Context) -> Result<bool, Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(&ctx.config)?;
    let data: DataRegistrationReport = pipeline.load().await?;
    let in_flight = pipeline.in_flight_jobs().await?;
    if !in_flight.is_empty() {
        tracing::info!(
            "{} jobs from the previous submission are still in flight",
            in_flight.len()
        );
    }
    let report = pipeline.submit(&data, &in_flight).await?;

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&report)),
        OutputFormat::Table => {
            let rows: Vec<JobRow> = report.jobs.iter().map(JobRow::from).collect();
            print_section("Submitted jobs", &rows);
            if !report.carried_over.is_empty() {
                let carried: Vec<JobRow> = report.carried_over.iter().map(JobRow::from).collect();
                print_section("Still in flight from earlier passes", &carried);
            }
            print_failures(&report.failures);
        }
    }
    Ok(!report.has_failures())
}
