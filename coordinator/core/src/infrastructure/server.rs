// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Lock Leader - Unix socket transport listener
//!
//! Accepts connections on a filesystem-scoped socket, decodes requests and
//! forwards them to the [`LockCoordinator`]. Every connection runs on its own
//! task, so transport I/O is never serialized; only registry mutations are.
//!
//! While a request is parked the handler keeps reading the socket: EOF (or any
//! unexpected frame) means the caller is gone and its waiter is dropped.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::coordinator::LockCoordinator;
use crate::domain::agent_config::LocksConfig;
use crate::domain::error::LockError;
use crate::domain::lock::LockKey;
use crate::infrastructure::protocol::{self, ProtocolError, Request, Response};

type Transport = Framed<UnixStream, LengthDelimitedCodec>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The host's authoritative lock endpoint.
#[derive(Debug)]
pub struct LockLeader {
    listener: UnixListener,
    socket_path: PathBuf,
    coordinator: LockCoordinator,
    enabled: bool,
    max_frame_bytes: usize,
    started_at: Instant,
}

impl LockLeader {
    /// Bind the leader socket under `config.sockets_path`.
    ///
    /// A leftover socket file nobody is listening on is removed first; a live
    /// one means another leader owns this host and binding fails.
    pub async fn bind(config: &LocksConfig, coordinator: LockCoordinator) -> Result<Self> {
        std::fs::create_dir_all(&config.sockets_path).with_context(|| {
            format!("Failed to create sockets directory {:?}", config.sockets_path)
        })?;

        let socket_path = config.socket_path();
        if socket_path.exists() {
            match UnixStream::connect(&socket_path).await {
                Ok(_) => anyhow::bail!(
                    "Another lock leader is already listening on {:?}",
                    socket_path
                ),
                Err(e) if is_stale_socket(&e) => {
                    warn!("Removing stale lock leader socket {:?}", socket_path);
                    std::fs::remove_file(&socket_path).with_context(|| {
                        format!("Failed to remove stale socket {:?}", socket_path)
                    })?;
                }
                Err(e) => anyhow::bail!(
                    "Cannot check existing lock leader socket {:?}: {}",
                    socket_path,
                    e
                ),
            }
        }

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind lock leader socket {:?}", socket_path))?;

        info!(
            socket = ?socket_path,
            enabled = config.enabled,
            "Lock leader listening"
        );

        Ok(Self {
            listener,
            socket_path,
            coordinator,
            enabled: config.enabled,
            max_frame_bytes: config.max_frame_bytes,
            started_at: Instant::now(),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections until `shutdown` is cancelled, then remove the
    /// socket file.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        metrics::counter!("kestrel_lock_connections_total").increment(1);
                        let connection = Connection {
                            id: ConnectionId::new(),
                            transport: Framed::new(stream, protocol::frame_codec(self.max_frame_bytes)),
                            coordinator: self.coordinator.clone(),
                            enabled: self.enabled,
                            started_at: self.started_at,
                        };
                        tokio::spawn(connection.run(shutdown.child_token()));
                    }
                    Err(e) => {
                        error!("Failed to accept lock client connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, closing lock leader socket");
                    break;
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!("Failed to remove lock leader socket {:?}: {}", self.socket_path, e);
        }
        Ok(())
    }
}

enum Flow {
    Continue,
    Close,
}

struct Connection {
    id: ConnectionId,
    transport: Transport,
    coordinator: LockCoordinator,
    enabled: bool,
    started_at: Instant,
}

impl Connection {
    async fn run(mut self, shutdown: CancellationToken) {
        debug!(connection = %self.id, "Lock client connected");

        loop {
            let frame = tokio::select! {
                frame = self.transport.next() => frame,
                _ = shutdown.cancelled() => break,
            };

            let frame = match frame {
                None => break,
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!(connection = %self.id, error = %e, "Dropping lock client after transport error");
                    break;
                }
            };

            let flow = match protocol::decode::<Request>(&frame) {
                Ok(request) => self.handle(request, &shutdown).await,
                Err(e) => {
                    warn!(connection = %self.id, error = %e, "Malformed lock request");
                    self.respond(LockError::MalformedRequest(e.to_string()).into())
                        .await;
                    Flow::Close
                }
            };

            if let Flow::Close = flow {
                break;
            }
        }

        debug!(connection = %self.id, "Lock client disconnected");
    }

    async fn handle(&mut self, request: Request, shutdown: &CancellationToken) -> Flow {
        debug!(connection = %self.id, op = request.op(), "Lock request");

        if !self.enabled && request != Request::Ping {
            return self
                .respond(
                    LockError::Unavailable(
                        "lock coordination is disabled on this agent".to_string(),
                    )
                    .into(),
                )
                .await;
        }

        let wait_timeout = request.wait_timeout();
        match request {
            Request::Acquire { key, .. } => {
                let key = match LockKey::new(key) {
                    Ok(key) => key,
                    Err(e) => return self.respond(e.into()).await,
                };
                let outcome = self
                    .coordinator
                    .acquire(&key, wait_timeout, caller_gone(&mut self.transport, shutdown))
                    .await;
                match outcome {
                    Ok(grant) => {
                        let response = Response::Token {
                            token: grant.token().to_string(),
                        };
                        match self.send(&response).await {
                            Ok(()) => {
                                debug!(connection = %self.id, key = %grant.key(), "Lock grant delivered");
                                grant.redeem();
                                Flow::Continue
                            }
                            // Dropping the undelivered grant releases the lock.
                            Err(e) => {
                                warn!(connection = %self.id, key = %key, error = %e, "Could not deliver lock grant");
                                Flow::Close
                            }
                        }
                    }
                    Err(LockError::Abandoned) => {
                        debug!(connection = %self.id, key = %key, "Caller left while waiting for lock");
                        Flow::Close
                    }
                    Err(e) => self.respond(e.into()).await,
                }
            }
            Request::Release { key, token } => {
                let result = match LockKey::new(key) {
                    Ok(key) => self.coordinator.release(&key, &token).await,
                    Err(e) => Err(e),
                };
                self.respond(result.map_or_else(Response::from, |()| Response::Ok))
                    .await
            }
            Request::Get { key } => {
                let result = match LockKey::new(key) {
                    Ok(key) => self.coordinator.get(&key).await,
                    Err(e) => Err(e),
                };
                self.respond(result.map_or_else(Response::from, |value| Response::Value { value }))
                    .await
            }
            Request::DoStart { key, .. } => {
                let key = match LockKey::new(key) {
                    Ok(key) => key,
                    Err(e) => return self.respond(e.into()).await,
                };
                let outcome = self
                    .coordinator
                    .do_once_start(&key, wait_timeout, caller_gone(&mut self.transport, shutdown))
                    .await;
                match outcome {
                    Ok(outcome) => self.respond(Response::DoOnce { outcome }).await,
                    Err(LockError::Abandoned) => {
                        debug!(connection = %self.id, key = %key, "Caller left while waiting for do-once");
                        Flow::Close
                    }
                    Err(e) => self.respond(e.into()).await,
                }
            }
            Request::DoFinish { key } => {
                let result = match LockKey::new(key) {
                    Ok(key) => self.coordinator.do_once_finish(&key).await,
                    Err(e) => Err(e),
                };
                self.respond(result.map_or_else(Response::from, |()| Response::Ok))
                    .await
            }
            Request::Ping => {
                let response = match self.coordinator.stats().await {
                    Ok(stats) => Response::Pong {
                        enabled: self.enabled,
                        uptime_seconds: self.started_at.elapsed().as_secs(),
                        stats,
                    },
                    Err(e) => e.into(),
                };
                self.respond(response).await
            }
        }
    }

    async fn respond(&mut self, response: Response) -> Flow {
        match self.send(&response).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                debug!(connection = %self.id, error = %e, "Failed to write lock response");
                Flow::Close
            }
        }
    }

    async fn send(&mut self, response: &Response) -> Result<(), ProtocolError> {
        let frame = protocol::encode(response)?;
        self.transport.send(frame).await?;
        Ok(())
    }
}

/// Only a socket nobody accepts on may be replaced. Any other failure, such as
/// a permission error, may hide a live leader.
fn is_stale_socket(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
    )
}

/// Resolves once the parked caller can no longer receive an answer: the
/// connection closed, broke, sent another frame out of turn, or the leader is
/// shutting down.
async fn caller_gone(transport: &mut Transport, shutdown: &CancellationToken) {
    tokio::select! {
        frame = transport.next() => match frame {
            None => {}
            Some(Err(e)) => debug!(error = %e, "Transport failed while caller was parked"),
            Some(Ok(_)) => warn!("Lock client sent a request while another was parked; closing connection"),
        },
        _ = shutdown.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::coordinator::CoordinatorConfig;
    use crate::domain::registry::LockRegistry;

    #[test]
    fn test_only_refused_sockets_are_stale() {
        assert!(is_stale_socket(&io::Error::from(io::ErrorKind::ConnectionRefused)));
        assert!(is_stale_socket(&io::Error::from(io::ErrorKind::NotFound)));
        assert!(!is_stale_socket(&io::Error::from(io::ErrorKind::PermissionDenied)));
        assert!(!is_stale_socket(&io::Error::from(io::ErrorKind::TimedOut)));
    }

    #[tokio::test]
    async fn test_bind_keeps_socket_it_cannot_check() {
        let dir = tempfile::tempdir().unwrap();
        // Longer than sun_path allows, so connecting fails with InvalidInput
        // rather than ConnectionRefused.
        let config = LocksConfig {
            sockets_path: dir.path().join("s".repeat(120)),
            ..LocksConfig::default()
        };
        std::fs::create_dir_all(&config.sockets_path).unwrap();
        std::fs::write(config.socket_path(), b"").unwrap();

        let (coordinator, _serializer) = LockCoordinator::spawn(
            LockRegistry::new(),
            CoordinatorConfig::default(),
            CancellationToken::new(),
        );
        let err = LockLeader::bind(&config, coordinator).await.unwrap_err();
        assert!(err.to_string().contains("Cannot check"), "{err}");
        assert!(config.socket_path().exists());
    }
}
