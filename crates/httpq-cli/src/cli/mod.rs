//! CLI for the httpq transfer scheduler.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use httpq_core::config;
use std::path::PathBuf;

use commands::{run_config, run_fetch, FetchArgs};

/// Top-level CLI for httpq.
#[derive(Debug, Parser)]
#[command(name = "httpq")]
#[command(about = "httpq: multiplexed HTTP GETs for tracker announces and metadata", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Fetch one or more URLs concurrently and report each result.
    Fetch {
        /// HTTP/HTTPS URLs to fetch.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Transfers attached at once (default: `max_active` from the config file).
        #[arg(long, value_name = "N")]
        max_active: Option<usize>,

        /// Write each successful body into DIR.
        #[arg(long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Print the queue snapshot and results as JSON.
        #[arg(long)]
        json: bool,

        /// Give up on outstanding transfers after SECS seconds.
        #[arg(long, default_value = "120", value_name = "SECS")]
        timeout: u64,
    },

    /// Show the effective configuration and its file location.
    Config,
}

impl CliCommand {
    pub fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match cli.command {
            CliCommand::Fetch {
                urls,
                max_active,
                output_dir,
                json,
                timeout,
            } => run_fetch(
                &cfg,
                FetchArgs {
                    urls,
                    max_active,
                    output_dir,
                    json,
                    timeout,
                },
            )?,
            CliCommand::Config => run_config(&cfg)?,
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
