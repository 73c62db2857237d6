use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use scanpress_core::{
    archive::{ArchiveConfig, ArchiveDownloader, DownloadType},
    book_pipeline, load_config, validate_config, Config, ItemRunner, PipelineReport,
    ProgressTracker, RunnerConfig, SanitizedConfig, StageOutcome, WorkItem,
};

/// Default configuration file when neither the flag nor the env var is set
const DEFAULT_CONFIG: &str = "scanpress.toml";

/// Seconds between progress log lines
const PROGRESS_INTERVAL_SECS: u64 = 5;

/// Resumable processing pipeline for scanned books.
#[derive(Parser, Debug)]
#[command(name = "scanpress", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the book pipeline, skipping stages that are already done.
    Run {
        /// Configuration file.
        #[arg(short, long, env = "SCANPRESS_CONFIG", default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },

    /// Download a batch of archives, one identifier per line.
    Download {
        /// File listing identifiers.
        #[arg(short, long)]
        list: PathBuf,

        /// Directory the archives are saved into.
        #[arg(short, long)]
        out: PathBuf,

        /// Fetch the original tar instead of the processed zip.
        #[arg(long)]
        original: bool,

        /// Concurrent downloads.
        #[arg(short, long, default_value_t = 5)]
        workers: usize,
    },

    /// Validate the configuration and show the planned stages.
    Check {
        /// Configuration file.
        #[arg(short, long, env = "SCANPRESS_CONFIG", default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    if let Err(e) = run(cli.command).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Run { config } => run_pipeline(&config).await,
        Command::Download {
            list,
            out,
            original,
            workers,
        } => download_batch(&list, &out, original, workers).await,
        Command::Check { config } => check(&config),
    }
}

fn load(path: &Path) -> Result<Config> {
    info!("Loading configuration from {:?}", path);
    let config =
        load_config(path).with_context(|| format!("Failed to load config from {:?}", path))?;
    validate_config(&config).context("Configuration validation failed")?;
    Ok(config)
}

async fn run_pipeline(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    let progress = ProgressTracker::new();
    let reporter = spawn_progress_reporter(progress.clone());

    let controller =
        book_pipeline(&config, &progress).context("Failed to build the book pipeline")?;
    let result = controller.run().await;
    reporter.abort();

    let report = result.context("Pipeline run failed")?;
    print_report(&report);
    Ok(())
}

async fn download_batch(list: &Path, out: &Path, original: bool, workers: usize) -> Result<()> {
    if workers == 0 {
        bail!("--workers must be at least 1");
    }

    let contents = tokio::fs::read_to_string(list)
        .await
        .with_context(|| format!("Failed to read identifier list {:?}", list))?;
    let items: Vec<WorkItem> = parse_identifiers(&contents)
        .into_iter()
        .map(|id| WorkItem::remote(id, out))
        .collect();
    info!("Downloading {} archives into {:?}", items.len(), out);

    let download_type = if original {
        DownloadType::OriginalTar
    } else {
        DownloadType::ProcessedZip
    };
    let progress = ProgressTracker::new();
    let downloader = ArchiveDownloader::new(
        ArchiveConfig::default().with_download_type(download_type),
        progress.clone(),
    )
    .context("Failed to create archive downloader")?;

    let reporter = spawn_progress_reporter(progress.clone());
    let runner = ItemRunner::new(RunnerConfig::default().with_max_workers(workers))
        .with_progress(progress);
    let report = runner
        .run("download", items, Arc::new(downloader), Some(out))
        .await;
    reporter.abort();
    let report = report.context("Download batch failed")?;

    for failure in &report.failures {
        warn!("{}: {} (after {} attempts)", failure.item_id, failure.error, failure.attempts);
    }
    println!(
        "Downloaded {} of {} archives in {}ms",
        report.succeeded(),
        report.total,
        report.duration_ms
    );
    if !report.is_complete() {
        bail!("{} downloads failed", report.failed());
    }
    Ok(())
}

fn check(config_path: &Path) -> Result<()> {
    let config = load(config_path)?;
    let sanitized = SanitizedConfig::from(&config);
    println!("{}", serde_json::to_string_pretty(&sanitized)?);

    let progress = ProgressTracker::new();
    let controller =
        book_pipeline(&config, &progress).context("Failed to build the book pipeline")?;
    println!();
    for (name, done) in controller.plan() {
        println!("  {:<16} {}", name, if done { "done" } else { "pending" });
    }
    Ok(())
}

/// Identifiers from a list file, skipping blank lines and `#` comments.
fn parse_identifiers(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(String::from)
        .collect()
}

fn spawn_progress_reporter(progress: ProgressTracker) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(PROGRESS_INTERVAL_SECS));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            for (key, meter) in progress.snapshot() {
                match meter.fraction() {
                    Some(f) => info!("{}: {:.1}%", key, f * 100.0),
                    None => info!("{}: {} bytes", key, meter.consumed),
                }
            }
        }
    })
}

fn print_report(report: &PipelineReport) {
    println!("Run {} ({}ms)", report.run_id, report.duration_ms);
    for stage in &report.stages {
        match &stage.outcome {
            StageOutcome::Skipped => println!("  {:<16} skipped", stage.name),
            StageOutcome::Completed {
                items,
                failed,
                duration_ms,
            } => println!(
                "  {:<16} {} done, {} failed ({}ms)",
                stage.name, items, failed, duration_ms
            ),
        }
    }
}
