// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0

//! Lock leader process management
//!
//! Handles:
//! - PID file management next to the leader socket
//! - Health checks through the lock client's `ping`
//! - Graceful shutdown

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use kestrel_core::LocksConfig;
use kestrel_sdk::{ClientError, LeaderStatus, LockClient};

pub mod server;

pub use server::start_leader;

#[derive(Debug, Clone)]
pub enum LeaderState {
    Running {
        pid: Option<u32>,
        status: LeaderStatus,
    },
    Stopped,
    Unhealthy {
        pid: u32,
        error: String,
    },
}

/// Check whether a leader is serving `config.sockets_path`, via `ping`
/// (primary) or the PID file (secondary).
pub async fn check_leader_running(config: &LocksConfig) -> Result<LeaderState> {
    let pid_file = config.pid_path();
    let local_pid = read_pid_file(&pid_file);

    match LockClient::from_config(config).ping().await {
        Ok(status) => Ok(LeaderState::Running {
            pid: local_pid,
            status,
        }),
        Err(ClientError::Unavailable(error)) => match local_pid {
            Some(pid) if process_exists(pid) => Ok(LeaderState::Unhealthy { pid, error }),
            Some(_) => {
                // Stale PID file
                let _ = std::fs::remove_file(&pid_file);
                Ok(LeaderState::Stopped)
            }
            None => Ok(LeaderState::Stopped),
        },
        Err(e) => match local_pid {
            Some(pid) => Ok(LeaderState::Unhealthy {
                pid,
                error: e.to_string(),
            }),
            None => Err(e).context("Failed to query lock leader"),
        },
    }
}

pub fn read_pid_file(pid_file: &Path) -> Option<u32> {
    std::fs::read_to_string(pid_file)
        .ok()
        .and_then(|content| content.trim().parse::<u32>().ok())
}

/// Write PID file
pub fn write_pid_file(pid_file: &Path, pid: u32) -> Result<()> {
    std::fs::write(pid_file, pid.to_string())
        .with_context(|| format!("Failed to write PID file: {:?}", pid_file))?;
    info!("Wrote PID file: {:?}", pid_file);
    Ok(())
}

/// Remove PID file
pub fn remove_pid_file(pid_file: &Path) -> Result<()> {
    if pid_file.exists() {
        std::fs::remove_file(pid_file)
            .with_context(|| format!("Failed to remove PID file: {:?}", pid_file))?;
        info!("Removed PID file: {:?}", pid_file);
    }
    Ok(())
}

fn process_exists(pid: u32) -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}
