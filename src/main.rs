//! KOTA - MCP server registry and connection manager
//!
#![doc = "Main entry point for the kota binary."]

use std::process::ExitCode;

use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kota::cli::{Cli, Commands};
use kota::commands;
use kota::config::Config;
use kota::error::{kind_of, Result};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration
    let config = Config::load(&cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Mcp { command } => {
            tracing::debug!("Running mcp command: {:?}", command);
            commands::mcp::handle_mcp(command, &config).await
        }
    }
}

/// Print one `error:` line and, when there is one, a `hint:` line
fn report(err: &anyhow::Error) {
    eprintln!("{} {:#}", "error:".red().bold(), err);
    if let Some(hint) = kind_of(err).and_then(|k| k.hint()) {
        eprintln!("{} {}", "hint:".yellow(), hint);
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins; otherwise `kota=warn`, or `kota=debug` with `--verbose`.
/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing(verbose: bool) {
    let default_level = if verbose { "kota=debug" } else { "kota=warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
