//! # duodep-cli
//!
//! Merge conda and pip dependencies declared across many requirement files.
//!
//! This is the main entry point for the duodep CLI tool. It handles command
//! parsing, sets up logging and error handling, and dispatches to the
//! appropriate command handlers.

use clap::{Parser, Subcommand};
use tracing::{error, info};

mod commands;
mod output;

use commands::list::{ListArgs, LocalArgs};
use commands::merge::MergeArgs;
use commands::CommandContext;
use output::errors::ErrorFormatter;

/// Merge conda and pip dependencies from many requirement files
#[derive(Parser)]
#[command(name = "duodep", version, about = "Unified conda and pip dependency management")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Merge requirement files into a conda environment file
    Merge(MergeArgs),
    /// Print the conda dependencies of a requirement file
    Conda(ListArgs),
    /// Print the pip dependencies of a requirement file
    Pip(ListArgs),
    /// Print the local packages to pip-install
    Local(LocalArgs),
    /// Show version information
    Version,
}

fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);
    setup_panic_handler();

    info!("Starting duodep v{}", env!("CARGO_PKG_VERSION"));

    if let Err(err) = run_cli(cli) {
        eprintln!("{}", ErrorFormatter::new().format_anyhow(&err));
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let ctx = CommandContext::new()?;
    commands::dispatch_command(cli.command, &ctx)
}

fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "duodep={level},duodep_core={level},duodep_config={level},duodep_resolver={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        error!("duodep encountered an unexpected error: {}", panic_info);
        eprintln!("duodep crashed! This is a bug.");
        eprintln!("Please report this at: https://github.com/duodep/duodep/issues");
        eprintln!("Error: {}", panic_info);
    }));
}
