// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0

//! Lock leader lifecycle commands
//!
//! Commands: run, status

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crate::daemon::{check_leader_running, start_leader, LeaderState};
use kestrel_core::AgentConfig;

#[derive(Subcommand, Debug)]
pub enum LeaderCommand {
    /// Run the lock leader in the foreground until Ctrl+C or SIGTERM
    Run {
        /// Directory for the leader socket (overrides configuration)
        #[arg(long, env = "KESTREL_SOCKETS_PATH", value_name = "DIR")]
        sockets_path: Option<PathBuf>,
    },

    /// Check whether a lock leader is serving this host
    Status {
        /// Directory for the leader socket (overrides configuration)
        #[arg(long, env = "KESTREL_SOCKETS_PATH", value_name = "DIR")]
        sockets_path: Option<PathBuf>,
    },
}

pub async fn handle_command(command: LeaderCommand, config_path: Option<PathBuf>) -> Result<()> {
    match command {
        LeaderCommand::Run { sockets_path } => {
            let config = load_config(config_path, sockets_path)?;
            start_leader(config).await
        }
        LeaderCommand::Status { sockets_path } => {
            let config = load_config(config_path, sockets_path)?;
            status(&config).await
        }
    }
}

fn load_config(config_path: Option<PathBuf>, sockets_path: Option<PathBuf>) -> Result<AgentConfig> {
    let mut config =
        AgentConfig::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(path) = sockets_path {
        config.spec.locks.sockets_path = path;
    }
    Ok(config)
}

async fn status(config: &AgentConfig) -> Result<()> {
    match check_leader_running(&config.spec.locks).await {
        Ok(LeaderState::Running { pid, status }) => {
            println!("{}", "✓ Lock leader is running".green());
            if let Some(pid) = pid {
                println!("  PID: {}", pid);
            }
            println!("  Socket: {}", config.spec.locks.socket_path().display());
            println!("  Uptime: {}", format_duration(status.uptime.as_secs()));
            if !status.enabled {
                println!("  {}", "Lock coordination is disabled".yellow());
            }
            println!("  Locks held: {}", status.stats.locks_held);
            println!(
                "  Do-once: {} in progress, {} done",
                status.stats.barriers_in_progress, status.stats.barriers_done
            );
            println!("  Waiters: {}", status.stats.waiters);
        }
        Ok(LeaderState::Stopped) => {
            println!("{}", "✗ Lock leader is not running".red());
        }
        Ok(LeaderState::Unhealthy { pid, error }) => {
            println!(
                "{}",
                format!("⚠ Lock leader unhealthy (PID: {})", pid).yellow()
            );
            println!("  Process exists but the socket check failed: {}", error);
        }
        Err(e) => {
            println!("{}", format!("✗ Failed to check status: {}", e).red());
            return Err(e);
        }
    }

    Ok(())
}

fn format_duration(secs: u64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(59), "0m");
        assert_eq!(format_duration(3 * 3600 + 120), "3h 2m");
        assert_eq!(format_duration(2 * 86400 + 3600), "2d 1h 0m");
    }

    #[test]
    fn test_sockets_path_flag_overrides_config() {
        let config = load_config(None, Some(PathBuf::from("/run/kestrel"))).unwrap();
        assert_eq!(
            config.spec.locks.socket_path(),
            PathBuf::from("/run/kestrel/lock-leader.sock")
        );
    }
}
