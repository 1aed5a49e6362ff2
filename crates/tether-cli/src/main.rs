//! Tether CLI - Command-line interface for the Tether native-object bridge.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

/// Tether native-object bridge
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(short = 'f', long, global = true, default_value = "human")]
    pub format: OutputFormat,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

/// Output format options.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    #[default]
    Human,
    /// JSON output
    Json,
    /// Compact JSON (single line)
    JsonCompact,
}

impl OutputFormat {
    /// Print a serializable report as JSON. Returns `false` for human output.
    pub fn print_json<T: serde::Serialize>(self, report: &T) -> anyhow::Result<bool> {
        match self {
            OutputFormat::Human => Ok(false),
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(report)?);
                Ok(true)
            }
            OutputFormat::JsonCompact => {
                println!("{}", serde_json::to_string(report)?);
                Ok(true)
            }
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// List the exports of the net library
    Exports(commands::exports::ExportsArgs),
    /// Validate a configuration file
    Check(commands::check::CheckArgs),
    /// Run a timer through the bridge
    Demo(commands::demo::DemoArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("tether={log_level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Run the command
    let result = match cli.command {
        Commands::Exports(args) => commands::exports::execute(args, cli.format),
        Commands::Check(args) => commands::check::execute(args, cli.format),
        Commands::Demo(args) => {
            config::load(cli.config.as_deref())
                .and_then(|config| commands::demo::execute(args, config, cli.format, cli.quiet))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}
