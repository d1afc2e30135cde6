//! queuectl CLI entry point.

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
mod output;

use commands::{Cli, Commands, WorkerCommand};
use queuectl_core::config::AppConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            output::print_error(&format!("Failed to load configuration: {e}"));
            std::process::exit(1);
        }
    };

    init_logging(&cli, &config);

    if let Err(e) = cli.execute(config).await {
        output::print_error(&e.to_string());
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
///
/// Only `worker start` logs at the configured level; every other command
/// stays at `warn` so its output is not interleaved with log lines. Logs go
/// to stderr so `--format json` output stays parseable.
fn init_logging(cli: &Cli, config: &AppConfig) {
    let level = match &cli.command {
        Commands::Worker(args) if matches!(args.command, WorkerCommand::Start { .. }) => {
            config.logging.level.as_str()
        }
        _ => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.logging.is_json() {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}
