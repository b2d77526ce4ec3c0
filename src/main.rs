mod analysis;
mod config;
mod error;
mod loader;
mod models;
mod pipeline;
mod report;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::AppConfig;
use crate::loader::{discover_csv_files, load_csv, load_daily_csv};
use crate::models::{MonthKey, MonthRange};
use crate::pipeline::Pipeline;
use crate::report::{DbStats, render_summary, write_metrics_csv};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "corrnet", about = "Monthly crypto correlation networks", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(clap::Args)]
struct Months {
    /// First month to rebuild (YYYY-MM)
    #[arg(long)]
    from: Option<MonthKey>,

    /// Last month to rebuild, inclusive (YYYY-MM)
    #[arg(long)]
    to: Option<MonthKey>,
}

impl Months {
    fn range(&self) -> MonthRange {
        MonthRange::new(self.from, self.to)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Bulk-load per-asset OHLC CSV files into `ohlcv`
    LoadCsv {
        /// Directory containing CSV files
        #[arg(short, long, default_value = "data")]
        dir: PathBuf,
    },

    /// Rebuild daily closes and log returns from `ohlcv`
    BuildDaily,

    /// Replace `ohlc_daily` with an externally built daily return CSV
    LoadDaily {
        /// CSV with asset_address, day, close, log_return
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Rebuild monthly pairwise correlations
    Correlations {
        #[command(flatten)]
        months: Months,

        /// Minimum shared observations per pair
        #[arg(long, env = "CORRNET_MIN_OVERLAP")]
        min_overlap: Option<usize>,
    },

    /// Rebuild monthly network metrics from stored correlations
    Network {
        #[command(flatten)]
        months: Months,

        /// Minimum |corr| for an edge
        #[arg(long, env = "CORRNET_THRESHOLD")]
        threshold: Option<f64>,
    },

    /// Daily returns → correlations → network, all months
    Run,

    /// Export the metrics time series and print a summary
    Report {
        /// Output directory (defaults to report.dir)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Show database statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Apply schema migrations without building anything
    Migrate,
}

fn open_repo(config: &AppConfig) -> Result<Repository> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(repo)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "corrnet=info,warn",
        1 => "corrnet=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::LoadCsv { dir } => {
            let _t = utils::Timer::start("CSV bulk load");
            let repo = open_repo(&config)?;

            let files = discover_csv_files(&dir)?;
            info!("Found {} CSV files in {:?}", files.len(), dir);

            let mut total_rows = 0usize;
            let mut errors = 0usize;

            for path in &files {
                match load_csv(path) {
                    Ok(rows) => {
                        total_rows += repo.upsert_ohlc(&rows)?;
                    }
                    Err(e) => {
                        warn!("Error loading {:?}: {:#}", path, e);
                        errors += 1;
                    }
                }
            }

            info!("Done: {} rows upserted, {} files failed", total_rows, errors);
        }

        Command::BuildDaily => {
            let _t = utils::Timer::start("Daily returns");
            let repo = open_repo(&config)?;
            Pipeline::new(config).build_daily(&repo).await?;
        }

        Command::LoadDaily { file } => {
            let repo = open_repo(&config)?;
            let rows = load_daily_csv(&file)?;
            let n = repo.replace_daily_returns(&rows)?;
            info!("ohlc_daily replaced with {} rows from {:?}", n, file);
        }

        Command::Correlations { months, min_overlap } => {
            if let Some(n) = min_overlap {
                config.analysis.min_overlap = n;
            }
            config.analysis.validate()?;
            let _t = utils::Timer::start("Monthly correlations");
            let repo = open_repo(&config)?;
            Pipeline::new(config).build_correlations(&repo, months.range()).await?;
        }

        Command::Network { months, threshold } => {
            if let Some(t) = threshold {
                config.analysis.threshold = t;
            }
            config.analysis.validate()?;
            let _t = utils::Timer::start("Temporal network");
            let repo = open_repo(&config)?;
            Pipeline::new(config).build_network(&repo, months.range()).await?;
        }

        Command::Run => {
            let _t = utils::Timer::start("Full rebuild");
            let repo = open_repo(&config)?;
            let pipeline = Pipeline::new(config);
            for (stage, stats) in pipeline.run_all(&repo).await? {
                info!(
                    "{:<13} months={} rows={} errors={}",
                    stage, stats.months, stats.rows_written, stats.errors
                );
            }
            let metrics = repo.load_metrics()?;
            print!("{}", render_summary(&metrics, pipeline.config().analysis.threshold));
        }

        Command::Report { out } => {
            let repo = open_repo(&config)?;
            let metrics = repo.load_metrics()?;
            if metrics.is_empty() {
                println!("No network metrics yet, run `corrnet run` first.");
                return Ok(());
            }
            let dir = out.unwrap_or(config.report.dir);
            let path = write_metrics_csv(&dir, &metrics)?;
            print!("{}", render_summary(&metrics, config.analysis.threshold));
            println!("Metrics written to {}", path.display());
        }

        Command::Stats { json } => {
            let repo = open_repo(&config)?;
            let stats = DbStats::collect(&repo)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("{}", stats.render());
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
