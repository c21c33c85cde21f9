//! loopwatch: runs an event loop under the loopwatch watchdog.
//!
//! ## Subcommands
//!
//! - `simulate`: drive a ticking loop, block it on purpose, print reports
//! - `config`: resolve and validate configuration from file and environment

mod config_cmd;
mod error;
mod logging;
mod simulate;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "loopwatch")]
#[command(about = "Event-loop stall detector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an event loop under the watchdog and block it on purpose
    Simulate(simulate::SimulateArgs),

    /// Print the resolved watchdog configuration
    Config(config_cmd::ConfigArgs),
}

fn main() -> ExitCode {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Simulate(args) => simulate::run(args),
        Commands::Config(args) => config_cmd::run(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "loopwatch failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
