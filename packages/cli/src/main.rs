#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the pine beetle prediction pipeline.
//!
//! Uses `indicatif-log-bridge` to route `log` output through
//! `indicatif::MultiProgress` so that log lines and the run spinner never
//! fight for the terminal.

use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use pine_beetle_rmodel::ModelConfig;

#[derive(Parser)]
#[command(name = "pine_beetle_cli", about = "Pine beetle prediction pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline (both geography axes) from the cutoff year
    RunAll {
        /// First year to modify; earlier data is left untouched
        #[arg(long)]
        cutoff_year: Option<i32>,
    },
    /// Run the pipeline scoped to a single state and year
    RunStateYear {
        /// State abbreviation (e.g., "GA")
        state: String,
        /// Survey year
        year: i32,
    },
    /// Run database migrations
    Migrate,
    /// Start the API server
    Serve,
}

/// Initializes the logger wrapped in `indicatif-log-bridge` and returns the
/// [`MultiProgress`] all bars must be added to.
fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .ok(); // Ignore error if logger was already set (e.g., in tests)

    log::set_max_level(level);

    multi
}

/// Spinner shown while a pipeline run is in flight.
fn run_spinner(multi: &MultiProgress, message: &str) -> ProgressBar {
    let bar = multi.add(ProgressBar::new_spinner());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::RunAll { cutoff_year } => {
            let db = pine_beetle_database::db::connect_from_env().await?;
            pine_beetle_database::run_migrations(db.as_ref()).await?;

            let model = ModelConfig::from_env();
            let bar = run_spinner(&multi, "Running full pipeline");
            let start = Instant::now();

            let summary =
                pine_beetle_pipeline::run_all(db.as_ref(), &model, cutoff_year).await?;

            bar.finish_and_clear();
            log::info!(
                "Pipeline complete in {:.1}s",
                start.elapsed().as_secs_f64()
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::RunStateYear { state, year } => {
            let db = pine_beetle_database::db::connect_from_env().await?;
            pine_beetle_database::run_migrations(db.as_ref()).await?;

            let model = ModelConfig::from_env();
            let bar = run_spinner(&multi, &format!("Running pipeline for {state} {year}"));
            let start = Instant::now();

            let summary =
                pine_beetle_pipeline::run_state_year(db.as_ref(), &model, &state, year).await?;

            bar.finish_and_clear();
            log::info!(
                "Pipeline complete in {:.1}s",
                start.elapsed().as_secs_f64()
            );
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Migrate => {
            let db = pine_beetle_database::db::connect_from_env().await?;
            pine_beetle_database::run_migrations(db.as_ref()).await?;
        }
        Commands::Serve => {
            // The server uses actix-web's runtime, so run it in a blocking
            // task to avoid nesting tokio runtimes.
            tokio::task::spawn_blocking(|| {
                actix_web::rt::System::new().block_on(pine_beetle_server::run_server())
            })
            .await??;
        }
    }

    Ok(())
}
