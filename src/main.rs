//! Paperflow main entry point
//!
//! This is the command-line interface for the Paperflow batch pipeline.

use anyhow::Context;
use clap::Parser;
use paperflow::config::{load_config_with_hash, Config, JobKind};
use paperflow::input::load_items;
use paperflow::jobs::{ClassifyJob, ScrapeJob};
use paperflow::output::{checkpoint_status, print_checkpoint_status, print_summary};
use paperflow::{CheckpointStore, Job, Pipeline, PipelineOptions, RunOutcome, SqliteCheckpointStore};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Paperflow: a resumable batch pipeline for paper metadata
///
/// Paperflow runs every item of an input file through a remote job
/// (relevance classification or page scraping) with bounded concurrency,
/// retries and periodic checkpoints. An interrupted run resumes where it
/// stopped.
#[derive(Parser, Debug)]
#[command(name = "paperflow")]
#[command(version)]
#[command(about = "A resumable batch pipeline for paper metadata", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Discard any existing checkpoint and start from the first item
    #[arg(long)]
    fresh: bool,

    /// Validate config and input and show what would run
    #[arg(long, conflicts_with_all = ["status", "fresh"])]
    dry_run: bool,

    /// Show the progress stored in the checkpoint and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh"])]
    status: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.status {
        return handle_status(&config);
    }

    match config.job.kind {
        JobKind::Classify => {
            let llm = config
                .llm
                .as_ref()
                .context("[llm] section is required for the classify job")?;
            if cli.dry_run {
                return handle_dry_run::<ClassifyJob>(&config);
            }
            let job = ClassifyJob::from_config(llm)?;
            handle_run(job, &config, cli.fresh).await
        }
        JobKind::Scrape => {
            let scraper = config
                .scraper
                .as_ref()
                .context("[scraper] section is required for the scrape job")?;
            if cli.dry_run {
                return handle_dry_run::<ScrapeJob>(&config);
            }
            let job = ScrapeJob::from_config(scraper)?;
            handle_run(job, &config, cli.fresh).await
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("paperflow=info,warn"),
            1 => EnvFilter::new("paperflow=debug,info"),
            2 => EnvFilter::new("paperflow=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and input, shows what would run
fn handle_dry_run<J: Job>(config: &Config) -> anyhow::Result<()>
where
    J::Item: DeserializeOwned,
{
    println!("=== Paperflow Dry Run ===\n");

    println!("Pipeline:");
    println!("  Job: {}", config.job.kind.as_str());
    println!("  Max concurrency: {}", config.pipeline.max_concurrency);
    println!("  Checkpoint every: {} items", config.pipeline.checkpoint_every);
    if let Some(sample) = config.pipeline.test_mode_sample_size {
        println!("  Test mode: first {} items only", sample);
    }

    println!("\nRetry:");
    println!(
        "  Remote calls: {} attempts, {}ms..{}ms",
        config.retry.max_attempts, config.retry.min_delay_ms, config.retry.max_delay_ms
    );
    println!(
        "  Validation: {} attempts, {}ms..{}ms",
        config.validation.max_attempts,
        config.validation.min_delay_ms,
        config.validation.max_delay_ms
    );

    if let Some(llm) = &config.llm {
        println!("\nLLM:");
        println!("  Endpoint: {}", llm.api_base);
        println!("  Model: {}", llm.model);
        let key_state = if std::env::var(&llm.api_key_env).is_ok() {
            "set"
        } else {
            "NOT SET"
        };
        println!("  API key (${}): {}", llm.api_key_env, key_state);
    }

    println!("\nFiles:");
    println!("  Input: {}", config.input.path);
    println!("  Checkpoint: {}", config.output.checkpoint_path);
    println!("  Output: {}", config.output.output_path);

    let items: Vec<J::Item> = load_items(Path::new(&config.input.path))?;
    let in_scope = config
        .pipeline
        .test_mode_sample_size
        .map_or(items.len(), |sample| sample.min(items.len()));

    let checkpoint_path = Path::new(&config.output.checkpoint_path);
    let completed = if checkpoint_path.exists() {
        let store = SqliteCheckpointStore::open(checkpoint_path)?;
        checkpoint_status(&store)?.map_or(0, |status| status.completed)
    } else {
        0
    };

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would process {} of {} items ({} already in checkpoint)",
        in_scope,
        items.len(),
        completed
    );

    Ok(())
}

/// Handles the --status mode: shows checkpoint progress
fn handle_status(config: &Config) -> anyhow::Result<()> {
    let path = Path::new(&config.output.checkpoint_path);
    println!("Checkpoint: {}\n", path.display());

    if !path.exists() {
        print_checkpoint_status(None);
        return Ok(());
    }

    let store = SqliteCheckpointStore::open(path)?;
    let status = checkpoint_status(&store)?;
    print_checkpoint_status(status.as_ref());

    Ok(())
}

/// Handles the main run
async fn handle_run<J: Job>(job: J, config: &Config, fresh: bool) -> anyhow::Result<()>
where
    J::Item: DeserializeOwned,
{
    let items: Vec<J::Item> = load_items(Path::new(&config.input.path))
        .with_context(|| format!("failed to read items from {}", config.input.path))?;
    tracing::info!("Loaded {} items from {}", items.len(), config.input.path);

    let mut store = SqliteCheckpointStore::open(Path::new(&config.output.checkpoint_path))?;
    if fresh {
        tracing::info!("Starting fresh (discarding existing checkpoint)");
        store.clear()?;
    }

    let cancel = CancellationToken::new();
    let ctrl = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing with a checkpoint...");
            ctrl.cancel();
        }
    });

    let mut pipeline = Pipeline::new(job, store, PipelineOptions::from_config(config));

    match pipeline.run(items, cancel).await {
        Ok(RunOutcome::Completed { summary, .. }) => {
            print_summary(&summary, false);
            println!("\n✓ Results written to: {}", config.output.output_path);
            Ok(())
        }
        Ok(RunOutcome::Interrupted { summary }) => {
            print_summary(&summary, true);
            Ok(())
        }
        Err(e) => {
            tracing::error!("Run failed in phase {}: {}", pipeline.phase(), e);
            Err(e.into())
        }
    }
}
