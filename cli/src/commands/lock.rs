// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0

//! Machine-scoped lock commands for build steps and hook scripts
//!
//! Commands: acquire, release, get, do, done
//!
//! ```text
//! token=$(kestrel lock acquire llama)
//! ...
//! kestrel lock release llama "$token"
//!
//! if [ "$(kestrel lock do build-cache)" = "do" ]; then
//!     ./warm-cache.sh
//!     kestrel lock done build-cache
//! fi
//! ```

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

use kestrel_core::AgentConfig;
use kestrel_sdk::{LockClient, LockScope};

/// Where and how to reach the lock leader.
#[derive(Args, Debug, Clone)]
pub struct LockTarget {
    /// Lock scope (only "machine" is supported)
    #[arg(
        long = "lock-scope",
        env = "KESTREL_LOCK_SCOPE",
        default_value = "machine",
        value_name = "SCOPE"
    )]
    pub scope: String,

    /// Directory holding the lock leader socket (overrides configuration)
    #[arg(long, env = "KESTREL_SOCKETS_PATH", value_name = "DIR")]
    pub sockets_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct WaitOptions {
    /// Give up after waiting this long, e.g. "2s" or "1m" (0 waits forever)
    #[arg(
        long = "lock-wait-timeout",
        env = "KESTREL_LOCK_WAIT_TIMEOUT",
        default_value = "0",
        value_parser = humantime::parse_duration,
        value_name = "DURATION"
    )]
    pub wait_timeout: Duration,
}

impl WaitOptions {
    fn deadline(&self) -> Option<Duration> {
        (!self.wait_timeout.is_zero()).then_some(self.wait_timeout)
    }
}

#[derive(Subcommand, Debug)]
pub enum LockCommand {
    /// Acquire a lock, waiting for the current holder, and print its token
    Acquire {
        key: String,

        #[command(flatten)]
        wait: WaitOptions,

        #[command(flatten)]
        target: LockTarget,
    },

    /// Release a lock held with TOKEN
    Release {
        key: String,

        token: String,

        #[command(flatten)]
        target: LockTarget,
    },

    /// Print the token currently holding a lock (empty if none)
    Get {
        key: String,

        #[command(flatten)]
        target: LockTarget,
    },

    /// Start a do-once section: prints "do" to exactly one caller, "done" to
    /// everyone else once it has finished
    Do {
        key: String,

        #[command(flatten)]
        wait: WaitOptions,

        #[command(flatten)]
        target: LockTarget,
    },

    /// Mark a do-once section as finished
    Done {
        key: String,

        #[command(flatten)]
        target: LockTarget,
    },
}

impl LockCommand {
    fn target(&self) -> &LockTarget {
        match self {
            LockCommand::Acquire { target, .. }
            | LockCommand::Release { target, .. }
            | LockCommand::Get { target, .. }
            | LockCommand::Do { target, .. }
            | LockCommand::Done { target, .. } => target,
        }
    }
}

pub async fn handle_command(command: LockCommand, config_path: Option<PathBuf>) -> Result<()> {
    let client = connect(command.target(), config_path)?;

    match command {
        LockCommand::Acquire { key, wait, .. } => {
            let token = client.acquire(&key, wait.deadline()).await?;
            println!("{}", token);
        }
        LockCommand::Release { key, token, .. } => {
            client.release(&key, &token).await?;
        }
        LockCommand::Get { key, .. } => {
            let value = client.get(&key).await?;
            println!("{}", value);
        }
        LockCommand::Do { key, wait, .. } => {
            let outcome = client.do_once_start(&key, wait.deadline()).await?;
            println!("{}", outcome);
        }
        LockCommand::Done { key, .. } => {
            client.do_once_finish(&key).await?;
        }
    }

    Ok(())
}

/// Build a client for `target`. The scope is checked before configuration is
/// read or any connection is made.
fn connect(target: &LockTarget, config_path: Option<PathBuf>) -> Result<LockClient> {
    let scope: LockScope = target.scope.parse()?;

    let sockets_path = match &target.sockets_path {
        Some(path) => path.clone(),
        None => {
            AgentConfig::load_or_default(config_path)
                .context("Failed to load configuration")?
                .spec
                .locks
                .sockets_path
        }
    };

    debug!(sockets_path = ?sockets_path, "Resolved lock leader location");
    Ok(LockClient::new(scope.as_str(), sockets_path)?)
}
