//! db4s-stats - DB Browser for SQLite usage statistics generator
//!
//! Batch job that rolls the download server's access log up into:
//! - daily, weekly and monthly unique users per DB4S version
//! - daily, weekly and monthly downloads per release artifact

mod catalog;
mod config;
mod db;
mod error;
mod stats;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "db4s-stats")]
#[command(about = "Generate DB4S usage and download statistics")]
#[command(version)]
struct Cli {
    /// Config file path (default: ~/.db4s/daily_stats_gen.toml, then ./config.toml)
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Only recompute the previous and current period of each report
    #[arg(long)]
    incremental: bool,

    /// Log progress for every bucket
    #[arg(long, short)]
    verbose: bool,
}

fn init_logging(level: &str, verbose: bool) {
    let default_directive = if verbose {
        format!("{level},db4s_stats=debug")
    } else {
        level.to_string()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config::Config::default_path()?,
    };
    let mut config = config::Config::load(&config_path)?;
    config.run.incremental |= cli.incremental;
    config.run.verbose |= cli.verbose;

    init_logging(&config.logging.level, config.run.verbose);
    info!("Configuration loaded from {}", config_path.display());

    let db = db::Database::new(&config.database).await?;
    if config.database.create_schema {
        db.run_migrations().await?;
    }

    let catalog = catalog::DownloadCatalog::new(config.downloads.clone())?;
    info!(
        "Generating {} statistics ({} download artifacts)",
        if config.run.incremental { "incremental" } else { "full" },
        catalog.artifacts().len()
    );

    let job = stats::StatsJob::new(db.clone(), config.source.clone(), catalog, config.run.clone());
    let summary = job.run(Utc::now().date_naive()).await?;

    info!(
        "Done: {} buckets, {} rows written, {} anomalies, {} new versions",
        summary.buckets, summary.rows_written, summary.anomalies, summary.versions_added
    );

    // Close the pool gracefully
    db.close().await;

    Ok(())
}
