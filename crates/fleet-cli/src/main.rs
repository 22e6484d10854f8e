// crates/fleet-cli/src/main.rs
//
// CLI entrypoint for the circuit fleet retraining control plane.
//
// Each pipeline stage is its own subcommand reading the previous stage's
// record from the records directory; `run` drives every stage in one go.
// The process exits non-zero when any unit failed.

mod commands;
mod config;
mod output;
mod wiring;

use clap::{Parser, Subcommand};
use commands::fingerprint::FingerprintArgs;
use commands::promote::PromoteArgs;
use commands::{Context, SelectionArgs};
use config::PipelineConfig;
use output::OutputFormat;

/// Fleet retraining orchestration for per-circuit forecasting models.
#[derive(Parser, Debug)]
#[command(
    name = "fleet",
    version = "0.1.0",
    about = "Detect, retrain, monitor, and promote per-circuit forecasting models"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "fleet.toml")]
    config: String,

    /// Override the records directory from the configuration.
    #[arg(long, global = true)]
    records_dir: Option<String>,

    /// Print JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Find units whose configuration fingerprints changed.
    Detect(SelectionArgs),

    /// Register data snapshots for the detected units.
    RegisterData,

    /// Submit training jobs for the registered snapshots.
    Submit,

    /// Poll submitted jobs until they finish or the timeout elapses.
    Monitor,

    /// Register the models produced by completed jobs.
    RegisterModels,

    /// Promote approved models into the shared registry.
    Promote(PromoteArgs),

    /// Run every stage in sequence.
    Run(SelectionArgs),

    /// Print unit fingerprints without touching any registry.
    Fingerprint(FingerprintArgs),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Configuration is read first so its log level can seed the filter.
    let loaded = PipelineConfig::load(&cli.config);
    let log_level = loaded
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match loaded {
        Ok(cfg) => {
            tracing::info!("Loaded configuration from {}", cli.config);
            cfg
        }
        Err(e) => {
            tracing::warn!(
                "Could not load config from {}: {}. Using defaults.",
                cli.config,
                e
            );
            PipelineConfig::default()
        }
    };

    // CLI --records-dir flag overrides the config file value.
    if let Some(dir) = &cli.records_dir {
        config.records_dir = dir.clone();
    }

    let ctx = Context {
        config,
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Table
        },
    };

    let clean = match &cli.command {
        Commands::Detect(args) => commands::detect::run(&ctx, args).await?,
        Commands::RegisterData => commands::register_data::run(&ctx).await?,
        Commands::Submit => commands::submit::run(&ctx).await?,
        Commands::Monitor => commands::monitor::run(&ctx).await?,
        Commands::RegisterModels => commands::register_models::run(&ctx).await?,
        Commands::Promote(args) => commands::promote::run(&ctx, args).await?,
        Commands::Run(args) => commands::run::run(&ctx, args).await?,
        Commands::Fingerprint(args) => commands::fingerprint::run(&ctx, args).await?,
    };

    if !clean {
        tracing::warn!("Some units failed or are awaiting approval; see the report above");
        std::process::exit(1);
    }
    Ok(())
}
