// crates/fleet-cli/src/commands/promote.rs
//
// `fleet promote`: promote approved models into the shared registry.
//
// The previous promotion record is resumed unless `--fresh` is given, so
// candidates still pending approval are picked up by a later invocation.

use clap::Args;

use fleet_pipeline::{ModelRegistrationReport, PromotionReport, StageReport};

use crate::commands::Context;
use crate::output::{format_json, print_failures, print_section, OutputFormat, PromotionRow};
use crate::wiring::build_pipeline;

#[derive(Debug, Args)]
pub struct PromoteArgs {
    /// Ignore the previous promotion record.
    #[arg(long)]
    pub fresh: bool,
}

pub fn print_promotion_report(report: &PromotionReport) {
    let rows: Vec<PromotionRow> = report.records.iter().map(PromotionRow::from).collect();
    print_section("Promotion", &rows);
    print_failures(&report.failures);
}

/// Promotion is clean when nothing failed and nothing is waiting for approval.
pub fn promotion_clean(report: &PromotionReport) -> bool {
    !report.has_failures() && report.pending().next().is_none()
}

pub async fn run(ctx: &Context, args: &PromoteArgs) -> Result<bool, Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(&ctx.config)?;
    let models: ModelRegistrationReport = pipeline.load().await?;
    let prior: Option<PromotionReport> = if args.fresh {
        None
    } else {
        pipeline.load_optional().await?
    };
    let report = pipeline.promote(&models, prior.as_ref()).await?;

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&report)),
        OutputFormat::Table => print_promotion_report(&report),
    }
    Ok(promotion_clean(&report))
}
