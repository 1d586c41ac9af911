use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jobwatch_storage::SnapshotStore;
use jobwatch_sync::{
    build_notifier, open_store, report_run_failure, run_with_config, RunSummary, SourceOutcome,
    SourceRegistry, WatchConfig,
};
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "jobwatch")]
#[command(about = "Watch careers pages and push an alert for every newly listed position")]
struct Cli {
    /// SQLite database file (overrides JOBWATCH_DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<PathBuf>,
    /// Source registry YAML (overrides JOBWATCH_SOURCES_PATH)
    #[arg(long, global = true)]
    sources: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape every enabled source once, notify, and record the snapshot
    Run {
        #[arg(long)]
        json: bool,
    },
    /// Create the snapshot table if it does not exist
    Init,
    /// Print the latest recorded snapshot for a source
    Latest { source: String },
    /// List configured sources
    Sources,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

fn print_summary(summary: &RunSummary) {
    println!(
        "run complete: run_id={} date={} sources={} new_positions={}",
        summary.run_id,
        summary.run_date,
        summary.sources.len(),
        summary.new_position_count()
    );
    for report in &summary.sources {
        let status = match &report.outcome {
            SourceOutcome::Completed => "ok".to_string(),
            SourceOutcome::FetchFailed { error } => format!("fetch failed: {error}"),
            SourceOutcome::StorageFailed { stage, error } => {
                format!("storage failed ({stage:?}): {error}")
            }
        };
        println!(
            "  {}: fetched={} new={} persisted={} {}",
            report.source_id,
            report.fetched,
            report.new_positions.len(),
            report.persisted,
            status
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; the process environment still applies.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut config = WatchConfig::from_env();
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(sources) = cli.sources {
        config.sources_path = sources;
    }

    match cli.command.unwrap_or(Commands::Run { json: false }) {
        Commands::Run { json } => {
            let notifier = build_notifier(&config)?;
            let summary = match run_with_config(&config, notifier.clone()).await {
                Ok(summary) => summary,
                Err(err) => {
                    report_run_failure(notifier.as_ref(), &err).await;
                    return Err(err.into());
                }
            };
            for failed in summary.failed_sources() {
                warn!(source_id = %failed.source_id, "source did not complete this run");
            }
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&summary).context("serializing run summary")?
                );
            } else {
                print_summary(&summary);
            }
        }
        Commands::Init => {
            let store = open_store(&config).await?;
            store
                .ensure_initialized()
                .await
                .context("initializing snapshot store")?;
            println!("snapshot store ready at {}", store.path().display());
        }
        Commands::Latest { source } => {
            let store = open_store(&config).await?;
            store
                .ensure_initialized()
                .await
                .context("initializing snapshot store")?;
            match store.latest_date(&source).await? {
                None => println!("no snapshot recorded for {source}"),
                Some(date) => {
                    let snapshot = store.latest_snapshot(&source).await?;
                    println!("{source} @ {date} ({} positions)", snapshot.len());
                    for position in snapshot {
                        println!("  {position}");
                    }
                }
            }
        }
        Commands::Sources => {
            let registry = SourceRegistry::load(&config.sources_path).await?;
            for source in &registry.sources {
                println!(
                    "{}\t{}\t{}\t{}",
                    source.source_id,
                    source.adapter,
                    if source.enabled { "enabled" } else { "disabled" },
                    source.listing_url
                );
            }
        }
    }

    Ok(())
}
