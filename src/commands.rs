//! CLI command definitions
//!
//! Defines the clap commands for the runner CLI.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a script against one or more test cases
    Run(RunArgs),

    /// List available scripts
    Scripts,

    /// Show which debugging ports in a range are answering
    Instances {
        /// First port to probe (default: cdp.port from config)
        #[arg(long)]
        base_port: Option<u16>,

        /// Number of ports to probe (default: cdp.max_ports from config)
        #[arg(long)]
        count: Option<u16>,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Check every element registry selector against a running instance
    CheckElements {
        /// Debugging port of the instance (default: cdp.port from config)
        #[arg(long)]
        port: Option<u16>,

        /// Configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Element registry file
        #[arg(long)]
        elements: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Script to run (see `scripts`)
    pub script: String,

    /// Run every case from the test-case file instead of a single default case
    #[arg(long)]
    pub batch: bool,

    /// Test-case file, JSON or YAML (implies --batch)
    #[arg(long)]
    pub test_cases: Option<PathBuf>,

    /// Number of cases run at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Upper bound for --concurrency
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Admit no further cases after the first failure
    #[arg(long)]
    pub stop_on_error: bool,

    /// Directory for reports and captured payloads
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Leave started applications running
    #[arg(long)]
    pub keep_apps: bool,

    /// Seconds to wait for the bot reply, unless a case sets its own
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub bot_reply_timeout: Option<u64>,

    /// Configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Element registry file
    #[arg(long)]
    pub elements: Option<PathBuf>,
}
