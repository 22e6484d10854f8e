// crates/fleet-cli/src/commands/run.rs
//
// `fleet run`: every stage in sequence.

use fleet_pipeline::promotion;

use crate::commands::monitor::{print_monitor_report, spawn_progress_printer};
use crate::commands::promote::{print_promotion_report, promotion_clean};
use crate::commands::{Context, SelectionArgs};
use crate::output::{
    format_json, print_failures, print_section, ChangedRow, JobRow, ModelRow, OutputFormat,
    SnapshotRow,
};
use crate::wiring::build_pipeline;

pub async fn run(ctx: &Context, args: &SelectionArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(&ctx.config)?;

    let summary = match ctx.format {
        OutputFormat::Json => pipeline.run(&args.options(), None).await?,
        OutputFormat::Table => {
            let (tx, printer) = spawn_progress_printer();
            let summary = pipeline.run(&args.options(), Some(tx)).await?;
            let _ = printer.await;
            summary
        }
    };

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&summary)),
        OutputFormat::Table => {
            let changed: Vec<ChangedRow> =
                summary.detection.changed.iter().map(ChangedRow::from).collect();
            print_section("Units needing work", &changed);
            let snapshots: Vec<SnapshotRow> =
                summary.data.snapshots.iter().map(SnapshotRow::from).collect();
            print_section("Data snapshots", &snapshots);
            let jobs: Vec<JobRow> = summary.submission.jobs.iter().map(JobRow::from).collect();
            print_section("Submitted jobs", &jobs);
            print_monitor_report(&summary.monitoring);
            let models: Vec<ModelRow> = summary.models.models.iter().map(ModelRow::from).collect();
            print_section("Registered models", &models);
            print_promotion_report(&summary.promotion);

            // Promotion failures are already listed under the promotion table.
            let failures: Vec<_> = summary
                .failures()
                .into_iter()
                .filter(|f| f.stage != promotion::STAGE)
                .collect();
            print_failures(&failures);
        }
    }
    Ok(!summary.has_failures() && promotion_clean(&summary.promotion))
}
