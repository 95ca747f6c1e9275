//! cdp-runner - end-to-end UI test runner for desktop applications
//!
//! Launches application instances with a remote-debugging port and drives
//! scripted test cases against them.

use cdp_runner::commands::Commands;
use cdp_runner::{cli, common::logging};
use clap::Parser;

#[derive(Parser)]
#[command(name = "cdp-runner", about = "End-to-end UI test runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_cli(cli.verbose);

    match cli::dispatch(cli.command).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) if e.is_setup_error() => {
            eprintln!("Setup error: {e}");
            eprintln!("Nothing was run; check the configuration and input files.");
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}
