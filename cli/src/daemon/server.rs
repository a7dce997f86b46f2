// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Foreground lock leader

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use kestrel_core::application::{CoordinatorConfig, LockCoordinator};
use kestrel_core::infrastructure::LockLeader;
use kestrel_core::{AgentConfig, LockRegistry};

use super::{remove_pid_file, write_pid_file};

/// Run the host's lock leader until Ctrl+C or SIGTERM.
pub async fn start_leader(config: AgentConfig) -> Result<()> {
    config
        .validate()
        .context("Configuration validation failed")?;

    let locks = &config.spec.locks;
    if !locks.enabled {
        warn!("Lock coordination is disabled; every lock request will be answered with 'unavailable'");
    }

    let shutdown = CancellationToken::new();
    let (coordinator, serializer) = LockCoordinator::spawn(
        LockRegistry::new(),
        CoordinatorConfig::from(locks),
        shutdown.child_token(),
    );

    let leader = LockLeader::bind(locks, coordinator)
        .await
        .context("Failed to start lock leader")?;

    let pid = std::process::id();
    let pid_file = locks.pid_path();
    write_pid_file(&pid_file, pid)?;
    // Ensure PID file cleanup on exit
    let _guard = PidFileGuard(pid_file);

    info!(
        pid,
        agent = %config.metadata.name,
        socket = ?leader.socket_path(),
        "Lock leader started"
    );

    let server = tokio::spawn(leader.serve(shutdown.clone()));

    shutdown_signal().await;
    shutdown.cancel();
    server.await.context("Lock leader task failed")??;

    if let Err(e) = serializer.await {
        error!("Lock serializer task failed: {}", e);
    }

    info!("Lock leader stopped");
    Ok(())
}

struct PidFileGuard(PathBuf);

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let _ = remove_pid_file(&self.0);
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
