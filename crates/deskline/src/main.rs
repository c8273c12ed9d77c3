// SPDX-FileCopyrightText: 2026 Deskline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Deskline - customer-support messaging desk.
//!
//! This is the binary entry point: the long-running `serve` daemon and the
//! one-shot maintenance commands share one configuration and database.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod commands;
mod serve;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use deskline_config::DesklineConfig;
use serde::Serialize;

/// Deskline - customer-support messaging desk.
#[derive(Parser, Debug)]
#[command(name = "deskline", version, about, long_about = None)]
struct Cli {
    /// Read configuration from this file instead of the standard locations.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the queue worker and the HTTP gateway until SIGINT/SIGTERM.
    Serve,
    /// Run one queue pass and print its summary.
    ProcessQueue {
        /// Messages to attempt; defaults to `[queue].batch_size`.
        #[arg(long)]
        batch_size: Option<u32>,
    },
    /// Reset recently failed messages back to pending.
    RetryFailed {
        /// Only messages queued within this many hours.
        #[arg(long, default_value_t = 1)]
        hours: u32,
    },
    /// Print outgoing message counts by state.
    QueueStats,
    /// Re-evaluate delay state for every active ticket.
    SweepDelays,
    /// Recompute per-agent KPIs.
    Kpi {
        /// Number of days back from today, today included.
        #[arg(long, default_value_t = 1)]
        days: u32,
    },
    /// Ask the configured provider whether its session is connected.
    ProviderStatus,
    /// Configuration utilities.
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Validate configuration and print the effective values.
    Check,
}

fn load_config(path: Option<&PathBuf>) -> Option<DesklineConfig> {
    let loaded = match path {
        Some(path) => deskline_config::load_and_validate_path(path),
        None => deskline_config::load_and_validate(),
    };
    match loaded {
        Ok(config) => Some(config),
        Err(errors) => {
            deskline_config::render_errors(&errors);
            None
        }
    }
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("deskline={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<(), deskline_core::DesklineError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|e| deskline_core::DesklineError::Internal(format!("failed to render output: {e}")))?;
    println!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let Some(config) = load_config(cli.config.as_ref()) else {
        return ExitCode::FAILURE;
    };
    init_tracing(&config.desk.log_level);

    let result = match cli.command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::ProcessQueue { batch_size } => commands::process_queue(&config, batch_size)
            .await
            .and_then(|summary| print_json(&summary)),
        Commands::RetryFailed { hours } => commands::retry_failed(&config, hours).await.map(|reset| {
            println!("reset {reset} failed message(s) to pending");
        }),
        Commands::QueueStats => commands::queue_stats(&config).await.and_then(|stats| print_json(&stats)),
        Commands::SweepDelays => commands::sweep_delays(&config)
            .await
            .and_then(|report| print_json(&report)),
        Commands::Kpi { days } => commands::compute_kpis(&config, days)
            .await
            .and_then(|rows| print_json(&rows)),
        Commands::ProviderStatus => commands::provider_status(&config)
            .await
            .and_then(|status| print_json(&status)),
        Commands::Config {
            action: ConfigCommands::Check,
        } => {
            eprintln!("deskline: configuration is valid (desk.name={})", config.desk.name);
            print_json(&config)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    #[cfg(not(target_env = "msvc"))]
    fn jemalloc_is_active() {
        use tikv_jemalloc_ctl::{epoch, stats};
        epoch::advance().unwrap();
        let allocated = stats::allocated::read().unwrap();
        assert!(allocated > 0, "jemalloc should report non-zero allocation");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_maintenance_commands() {
        let cli = Cli::parse_from(["deskline", "process-queue", "--batch-size", "3"]);
        assert!(matches!(cli.command, Commands::ProcessQueue { batch_size: Some(3) }));

        let cli = Cli::parse_from(["deskline", "--config", "/tmp/d.toml", "retry-failed"]);
        assert!(matches!(cli.command, Commands::RetryFailed { hours: 1 }));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/d.toml")));

        let cli = Cli::parse_from(["deskline", "config", "check"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigCommands::Check
            }
        ));
    }
}
