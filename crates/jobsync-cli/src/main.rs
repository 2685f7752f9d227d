use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use jobsync_sync::RunSummary;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Runs one ingestion pass. Everything is configured through the environment.
#[derive(Debug, Parser)]
#[command(name = "jobsync")]
#[command(about = "Fetch job postings from every configured source and sync them into the content store")]
#[command(version)]
struct Cli {}

#[tokio::main]
async fn main() -> ExitCode {
    let _cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let summary = match jobsync_sync::run_sync_once_from_env().await {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %err, "configuration error; nothing was fetched");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = print_summary(&summary) {
        error!(error = %format!("{err:#}"), "could not print run summary");
    }
    ExitCode::SUCCESS
}

fn print_summary(summary: &RunSummary) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("serializing run summary")?;
    info!(
        run_id = %summary.run_id,
        state = %summary.state,
        sources = summary.sources.len(),
        canonical = summary.canonical_postings,
        "sync complete"
    );
    println!("{json}");
    Ok(())
}
