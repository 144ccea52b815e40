//! Vantage: recurring competitive report scheduler
//!
//! Main binary with subcommands:
//! - `serve`: Scheduler daemon plus the JSON API
//! - `next-runs`: Preview when a frequency would fire

use std::path::PathBuf;

use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vantage_scheduler::{CronExpression, frequency_to_cron};
use vantage_store::Frequency;

mod daemon;
mod generator;
mod notifier;

#[derive(Parser)]
#[command(name = "vantage")]
#[command(about = "Recurring competitive report scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the JSON API
    Serve {
        /// HTTP server port
        #[arg(long, env = "VANTAGE_PORT", default_value = "8080")]
        port: u16,

        /// JSON file to persist projects and schedules in (in-memory when unset)
        #[arg(long, env = "VANTAGE_DATA_FILE")]
        data_file: Option<PathBuf>,

        /// Base URL of the report generation service
        #[arg(long, env = "VANTAGE_GENERATOR_URL")]
        generator_url: String,

        /// Request timeout for report generation, in seconds
        #[arg(long, env = "VANTAGE_GENERATOR_TIMEOUT_SECS", default_value = "300")]
        generator_timeout_secs: u64,

        /// Webhook to notify about finished and failed runs (logged only when unset)
        #[arg(long, env = "VANTAGE_WEBHOOK_URL")]
        webhook_url: Option<String>,
    },

    /// Print the next fire times for a frequency
    NextRuns {
        /// daily, weekly, biweekly, monthly or custom
        #[arg(value_name = "FREQUENCY")]
        frequency: Frequency,

        /// Cron expression used with the custom frequency
        #[arg(long)]
        custom: Option<String>,

        /// How many fire times to print
        #[arg(long, default_value = "5")]
        count: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "vantage=info,vantage_scheduler=info,vantage_web=info".to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            port,
            data_file,
            generator_url,
            generator_timeout_secs,
            webhook_url,
        } => {
            daemon::run(daemon::ServeOptions {
                port,
                data_file,
                generator_url,
                generator_timeout_secs,
                webhook_url,
            })
            .await
        }

        Commands::NextRuns {
            frequency,
            custom,
            count,
        } => next_runs(frequency, custom.as_deref(), count),
    }
}

fn next_runs(frequency: Frequency, custom: Option<&str>, count: usize) -> Result<()> {
    let cron = frequency_to_cron(frequency, custom);
    let expression: CronExpression = cron
        .parse()
        .map_err(|e| miette::miette!("invalid cron expression '{}': {}", cron, e))?;

    println!("{} ({})", frequency, expression);
    for run in expression.upcoming_in(Utc::now(), &Local).take(count) {
        println!("  {}", run.with_timezone(&Local).to_rfc3339());
    }
    Ok(())
}
