use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

use trx_retry::scenario::ClientResult;
use trx_retry::{logging, replay, NodeSettings, ReplayReport, Scenario};
use trx_retry_db::TrackOutcome;

#[derive(Parser)]
#[command(name = "trx-retry")]
#[command(about = "Transaction retry tracker", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a scenario of pipeline events and report every client outcome
    Replay {
        scenario: PathBuf,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = NodeSettings::load(cli.config.as_deref())?;
    logging::init_tracing(&settings.logging)?;

    match cli.command {
        Commands::Replay { scenario, json } => {
            info!(path = %scenario.display(), "replaying scenario");
            let scenario = Scenario::from_path(&scenario)?;
            let report = replay(&scenario, settings.retry.clone()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Config => {
            print!("{}", serde_yaml::to_string(&settings)?);
        }
    }

    Ok(())
}

fn print_report(report: &ReplayReport) {
    if let Some(name) = &report.name {
        println!("scenario {}", name);
    }
    for summary in &report.commits {
        println!(
            "block {} @ {}: {} committed, {} expired, {} traces cleared",
            summary.block_num,
            summary.block_time,
            summary.committed.len(),
            summary.expired.len(),
            summary.cleared_traces
        );
    }
    for rejected in &report.rejected {
        println!("step {} rejected ({}): {}", rejected.step, rejected.id, rejected.error);
    }
    for outcome in &report.outcomes {
        let result = match &outcome.result {
            ClientResult::Resolved {
                outcome: TrackOutcome::Committed { block_num, .. },
            } => format!("committed in block {}", block_num),
            ClientResult::Resolved {
                outcome: TrackOutcome::Expired { expiration, .. },
            } => format!("expired at {}", expiration),
            ClientResult::Cancelled => "cancelled".to_string(),
            ClientResult::Pending => "pending".to_string(),
        };
        println!("{}: {}", outcome.id, result);
    }
    if report.pipeline_errors > 0 {
        println!("{} pipeline events dropped", report.pipeline_errors);
    }
}
