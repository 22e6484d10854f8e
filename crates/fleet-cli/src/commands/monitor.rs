// crates/fleet-cli/src/commands/monitor.rs
//
// `fleet monitor`: poll submitted jobs until terminal or timed out.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use fleet_pipeline::{MonitorEvent, MonitorReport, StageReport, SubmissionReport};

use crate::commands::Context;
use crate::output::{format_json, print_failures, print_section, JobRow, OutputFormat};
use crate::wiring::build_pipeline;

/// Print progress events to stderr while a monitor runs.
pub fn spawn_progress_printer() -> (mpsc::UnboundedSender<MonitorEvent>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                MonitorEvent::Started { total } => eprintln!("Monitoring {} jobs", total),
                MonitorEvent::Transition { job_name, from, to } => {
                    eprintln!("  {}: {} -> {}", job_name, from, to)
                }
                MonitorEvent::Progress(p) => eprintln!(
                    "  [poll {}, {}s] {} completed, {} failed, {} pending",
                    p.poll, p.elapsed_secs, p.completed, p.failed, p.pending
                ),
                MonitorEvent::TimedOut { job_names } => {
                    eprintln!("  Stopped waiting for {} jobs", job_names.len())
                }
                MonitorEvent::PollError { .. } | MonitorEvent::Finished(_) => {}
            }
        }
    });
    (tx, handle)
}

pub fn print_monitor_report(report: &MonitorReport) {
    let rows = |jobs: &[fleet_core::job::TrainingJob]| -> Vec<JobRow> {
        jobs.iter().map(JobRow::from).collect()
    };
    print_section("Completed", &rows(&report.completed));
    print_section("Failed", &rows(&report.failed));
    print_section("Timed out", &rows(&report.timed_out));
    println!("{} polls over {}s", report.polls, report.elapsed_secs);
}

pub async fn run(ctx: &Context) -> Result<bool, Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(&ctx.config)?;
    let submission: SubmissionReport = pipeline.load().await?;

    let report = match ctx.format {
        OutputFormat::Json => pipeline.monitor(&submission, None).await?,
        OutputFormat::Table => {
            let (tx, printer) = spawn_progress_printer();
            let report = pipeline.monitor(&submission, Some(tx)).await?;
            let _ = printer.await;
            report
        }
    };

    match ctx.format {
        OutputFormat::Json => println!("{}", format_json(&report)),
        OutputFormat::Table => {
            print_monitor_report(&report);
            print_failures(&report.failures);
        }
    }
    Ok(!report.has_failures())
}
