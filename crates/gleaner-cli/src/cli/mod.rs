//! CLI for the Gleaner collection orchestrator.

mod commands;
mod control_socket;
mod runtime;

use anyhow::Result;
use clap::{Parser, Subcommand};
use gleaner_core::config;
use gleaner_core::phase::Strategy;
use std::path::PathBuf;

use commands::{run_category, run_history, run_jobs, run_load, run_status};

/// Top-level CLI for the Gleaner collection orchestrator.
#[derive(Debug, Parser)]
#[command(name = "gleaner")]
#[command(about = "Gleaner: phased orchestration of long-running collection jobs", long_about = None)]
pub struct Cli {
    /// Job and phase definitions (overrides `jobs_file` in config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    pub jobs_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// List registered jobs.
    Jobs {
        /// Only jobs in this category.
        #[arg(long)]
        category: Option<String>,
        /// Only scheduled jobs whose interval has elapsed since their last success.
        #[arg(long)]
        due: bool,
    },

    /// Run every enabled job of one category through the worker pool.
    Run {
        category: String,
        /// Stop each job after N records.
        #[arg(long, value_name = "N")]
        sample: Option<usize>,
    },

    /// Phased loading: drive and control a rollout of the phase plan.
    Load {
        #[command(subcommand)]
        action: LoadAction,
    },

    /// Show the detailed ledger status of an operation.
    Status {
        /// Operation name (default: the phased load).
        operation: Option<String>,
    },

    /// Show recent execution attempts from the run history.
    History {
        #[arg(long, default_value = "20", value_name = "N")]
        limit: u32,
    },
}

#[derive(Debug, Subcommand)]
pub enum LoadAction {
    /// Start a new rollout at the first phase and run it.
    Start {
        /// conservative, balanced or aggressive.
        #[arg(long, default_value = "balanced")]
        strategy: Strategy,
        /// Allow `gleaner load skip`.
        #[arg(long)]
        manual: bool,
    },
    /// Continue a persisted rollout (resuming it if paused).
    Resume,
    /// Pause the rollout; the current phase re-runs on resume.
    Pause,
    /// Mark the current phase complete without running it.
    Skip,
    /// Abandon the rollout.
    Cancel,
    /// Print the session status as JSON.
    Status,
    /// Describe one phase without running it.
    Preview { phase: String },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let mut cfg = config::load_or_init()?;
        if let Some(path) = cli.jobs_file {
            cfg.jobs_file = Some(path);
        }
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Jobs { category, due } => run_jobs(&cfg, category.as_deref(), due).await?,
            CliCommand::Run { category, sample } => run_category(&cfg, &category, sample).await?,
            CliCommand::Load { action } => run_load(&cfg, action).await?,
            CliCommand::Status { operation } => run_status(operation.as_deref())?,
            CliCommand::History { limit } => run_history(limit).await?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
