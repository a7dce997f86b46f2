// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0

//! # Kestrel Agent CLI
//!
//! The `kestrel` binary runs the host's lock leader and gives build steps and
//! hook scripts access to machine-scoped locks and do-once sections.
//!
//! ## Commands
//!
//! - `kestrel lock acquire|release|get|do|done` - Lock and do-once operations
//! - `kestrel leader run|status` - Run or inspect the host's lock leader
//! - `kestrel config show|validate|generate` - Configuration management
//!
//! Command results go to stdout; logs and errors go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use kestrel_agent::commands::{self, ConfigCommand, LeaderCommand, LockCommand};

/// Kestrel build agent - machine-scoped locks and do-once coordination
#[derive(Parser)]
#[command(name = "kestrel")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "KESTREL_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "KESTREL_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Machine-scoped locks and do-once sections
    #[command(name = "lock")]
    Lock {
        #[command(subcommand)]
        command: LockCommand,
    },

    /// Run or inspect the host's lock leader
    #[command(name = "leader")]
    Leader {
        #[command(subcommand)]
        command: LeaderCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Lock { command } => commands::lock::handle_command(command, cli.config).await,
        Commands::Leader { command } => {
            commands::leader::handle_command(command, cli.config).await
        }
        Commands::Config { command } => {
            commands::config::handle_command(command, cli.config).await
        }
    }
}

/// Initialize tracing subscriber for logging. Logs go to stderr so that stdout
/// carries only command output.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
