//! storeflowd — runs a batch of store jobs from the command line.
//!
//! Assembles the storeflow subsystems around a command-backed processor:
//! - Engine configuration (TOML or JSON, plus flag overrides)
//! - Batch engine with its workers and resource monitor
//! - External program per job (payload on stdin, result on stdout)
//!
//! # Usage
//!
//! ```text
//! storeflowd run --jobs jobs.json --config storeflow.toml -- ./extract-store.sh
//! storeflowd strategy --jobs 60
//! storeflowd config
//! ```

mod command;
mod jobs;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use storeflow_core::EngineConfig;
use storeflow_scheduler::{Engine, EngineError};

use crate::command::CommandProcessor;

#[derive(Parser)]
#[command(
    name = "storeflowd",
    about = "storeflow — parallel multi-store job runner",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every job in a job list through an external command.
    Run {
        /// JSON array of `{ "id"?, "payload" }` entries.
        #[arg(long)]
        jobs: PathBuf,

        /// Engine configuration file (.toml or .json).
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,

        /// Directory for per-slot scratch directories.
        #[arg(long)]
        scratch_dir: Option<PathBuf>,

        /// Write the full per-job results here as JSON.
        #[arg(long)]
        results: Option<PathBuf>,

        /// Program and arguments run once per job.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Print the strategy a batch of the given size would use.
    Strategy {
        /// Number of jobs in the batch.
        #[arg(long)]
        jobs: usize,

        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: Overrides,
    },
}

/// Flags that take precedence over the configuration file.
#[derive(clap::Args)]
struct Overrides {
    /// Upper bound on concurrent workers.
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Retries after the first attempt.
    #[arg(long)]
    retry_attempts: Option<u32>,

    /// Abandon a processor call after this many milliseconds (0 disables).
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log periodic progress.
    #[arg(long)]
    debug: bool,
}

impl Overrides {
    fn apply(&self, config: &mut EngineConfig) {
        if let Some(max) = self.max_concurrent {
            config.max_concurrent_stores = max;
        }
        if let Some(retries) = self.retry_attempts {
            config.retry_attempts = retries;
        }
        if let Some(timeout) = self.timeout_ms {
            config.queue_timeout_ms = timeout;
        }
        if self.debug {
            config.debug_mode = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run {
            jobs,
            config,
            overrides,
            scratch_dir,
            results,
            command,
        } => {
            let config = load_config(config.as_deref(), &overrides)?;
            run_batch(config, &jobs, scratch_dir, results.as_deref(), command).await
        }
        Command::Strategy {
            jobs,
            config,
            overrides,
        } => {
            let config = load_config(config.as_deref(), &overrides)?;
            let strategy = storeflow_scheduler::choose_strategy_with(
                jobs,
                config.max_concurrent_stores,
                &config.strategy,
            );
            println!("{}", serde_json::to_string_pretty(&strategy)?);
            Ok(())
        }
        Command::Config { config, overrides } => {
            let config = load_config(config.as_deref(), &overrides)?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,storeflow=debug"));
    // Logs go to stderr; stdout carries the summary.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>, overrides: &Overrides) -> anyhow::Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

async fn run_batch(
    config: EngineConfig,
    jobs_path: &Path,
    scratch_dir: Option<PathBuf>,
    results_path: Option<&Path>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let jobs = jobs::load_jobs(jobs_path)?;
    info!(jobs = jobs.len(), path = %jobs_path.display(), "job list loaded");

    let mut processor = CommandProcessor::new(command)?;
    if let Some(dir) = scratch_dir {
        std::fs::create_dir_all(&dir)?;
        processor = processor.with_scratch_root(dir);
    }
    let engine = Engine::new(config, Arc::new(processor))?;

    // Graceful shutdown on Ctrl-C: in-flight jobs finish, the rest is
    // reported as remaining.
    let batch = engine.process_batch(jobs);
    tokio::pin!(batch);
    let outcome = tokio::select! {
        outcome = &mut batch => outcome,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received, finishing in-flight jobs");
            engine.shutdown();
            batch.await
        }
    };

    if let Some(path) = results_path {
        let results = engine.results().await;
        std::fs::write(path, serde_json::to_vec_pretty(&results)?)
            .with_context(|| format!("writing results {}", path.display()))?;
        info!(path = %path.display(), "results written");
    }

    match outcome {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(EngineError::Aborted {
            reason,
            remaining,
            summary,
        }) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            error!(%reason, remaining, "batch aborted");
            anyhow::bail!("batch aborted: {reason}")
        }
        Err(e) => Err(e.into()),
    }
}
