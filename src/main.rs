use anyhow::{Context, Result};
use clap::{ArgAction, CommandFactory, FromArgMatches, Parser, Subcommand};

use cloudcp::commands::{config, cp};
use cloudcp::config::Config;

use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cloudcp", version)]
#[command(about = "Copy files between local disk, platform storage and object buckets", long_about = None)]
struct Cli {
    /// More output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Config file to use instead of the default one
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy files and directories
    Cp(cp::CpArgs),

    /// Show the effective configuration
    Config,
}

/// Log level from the verbosity flags; `RUST_LOG` wins when set.
fn log_level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .without_time(),
        )
        .init();
}

fn main() -> Result<()> {
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches)?;

    init_logging(log_level(cli.verbose, cli.quiet));

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Cp(args) => {
            let sub_matches = matches
                .subcommand_matches("cp")
                .context("Missing cp arguments")?;
            cp::run(args, sub_matches, &config, cli.quiet)?
        }
        Commands::Config => config::run(&config)?,
    }

    Ok(())
}
