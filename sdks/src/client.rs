// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;
use tracing::debug;

use kestrel_core::application::CoordinatorStats;
use kestrel_core::infrastructure::protocol::{self, ProtocolError, Request, Response};
use kestrel_core::{DoOnce, LockScope, LocksConfig, LEADER_SOCKET_NAME};

use crate::error::ClientError;

/// Extra time the client waits beyond a server-side wait timeout, so the
/// leader's own `timeout` answer normally arrives first.
const DEFAULT_TIMEOUT_GRACE: Duration = Duration::from_secs(1);
/// Upper bound for requests that never park.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Client for the host's lock leader.
///
/// Each call opens its own connection, sends one request and waits for one
/// response. Dropping a call that is parked (or letting its deadline expire)
/// closes the connection, which removes the waiter on the leader.
#[derive(Debug, Clone)]
pub struct LockClient {
    scope: LockScope,
    socket_path: PathBuf,
    max_frame_bytes: usize,
    timeout_grace: Duration,
    request_timeout: Duration,
}

/// Health report returned by [`LockClient::ping`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderStatus {
    pub enabled: bool,
    pub uptime: Duration,
    pub stats: CoordinatorStats,
}

impl LockClient {
    /// Create a client for `scope`, talking to the leader socket inside
    /// `sockets_path`. Unsupported scopes fail here, before any I/O.
    pub fn new(scope: &str, sockets_path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let scope: LockScope = scope.parse()?;
        Ok(Self {
            scope,
            socket_path: sockets_path.as_ref().join(LEADER_SOCKET_NAME),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            timeout_grace: DEFAULT_TIMEOUT_GRACE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn from_config(config: &LocksConfig) -> Self {
        Self {
            scope: config.scope,
            socket_path: config.socket_path(),
            max_frame_bytes: config.max_frame_bytes,
            timeout_grace: DEFAULT_TIMEOUT_GRACE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout_grace(mut self, grace: Duration) -> Self {
        self.timeout_grace = grace;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn scope(&self) -> LockScope {
        self.scope
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Acquire the lock on `key` and return its token, waiting for the current
    /// holder if there is one. `None` waits indefinitely.
    pub async fn acquire(
        &self,
        key: &str,
        wait_timeout: Option<Duration>,
    ) -> Result<String, ClientError> {
        let request = Request::Acquire {
            key: key.to_string(),
            wait_timeout_ms: wait_timeout.map(duration_ms),
        };
        match self.call(request).await? {
            Response::Token { token } => Ok(token),
            _ => Err(ClientError::UnexpectedResponse("acquire")),
        }
    }

    pub async fn release(&self, key: &str, token: &str) -> Result<(), ClientError> {
        let request = Request::Release {
            key: key.to_string(),
            token: token.to_string(),
        };
        match self.call(request).await? {
            Response::Ok => Ok(()),
            _ => Err(ClientError::UnexpectedResponse("release")),
        }
    }

    /// Current token for `key`, or an empty string when nobody holds it.
    pub async fn get(&self, key: &str) -> Result<String, ClientError> {
        let request = Request::Get {
            key: key.to_string(),
        };
        match self.call(request).await? {
            Response::Value { value } => Ok(value),
            _ => Err(ClientError::UnexpectedResponse("get")),
        }
    }

    /// Returns [`DoOnce::Do`] to exactly one caller per key, which must call
    /// [`LockClient::do_once_finish`] when its work is complete. Everyone
    /// else waits for that and gets [`DoOnce::Done`].
    pub async fn do_once_start(
        &self,
        key: &str,
        wait_timeout: Option<Duration>,
    ) -> Result<DoOnce, ClientError> {
        let request = Request::DoStart {
            key: key.to_string(),
            wait_timeout_ms: wait_timeout.map(duration_ms),
        };
        match self.call(request).await? {
            Response::DoOnce { outcome } => Ok(outcome),
            _ => Err(ClientError::UnexpectedResponse("do_start")),
        }
    }

    pub async fn do_once_finish(&self, key: &str) -> Result<(), ClientError> {
        let request = Request::DoFinish {
            key: key.to_string(),
        };
        match self.call(request).await? {
            Response::Ok => Ok(()),
            _ => Err(ClientError::UnexpectedResponse("do_finish")),
        }
    }

    pub async fn ping(&self) -> Result<LeaderStatus, ClientError> {
        match self.call(Request::Ping).await? {
            Response::Pong {
                enabled,
                uptime_seconds,
                stats,
            } => Ok(LeaderStatus {
                enabled,
                uptime: Duration::from_secs(uptime_seconds),
                stats,
            }),
            _ => Err(ClientError::UnexpectedResponse("ping")),
        }
    }

    /// One request, one response, bounded by a local deadline. Error
    /// responses are converted into [`ClientError`] here.
    async fn call(&self, request: Request) -> Result<Response, ClientError> {
        let op = request.op();
        let key = request.key().map(str::to_string);
        let wait_timeout = request.wait_timeout();
        let parks = matches!(request, Request::Acquire { .. } | Request::DoStart { .. });

        debug!(op, key = ?key, socket = ?self.socket_path, "Sending lock request");

        let limit = match (parks, wait_timeout) {
            (true, Some(wait)) => Some(wait.saturating_add(self.timeout_grace)),
            (true, None) => None,
            (false, _) => Some(self.request_timeout),
        };

        let outcome = match limit {
            Some(limit) => match tokio::time::timeout(limit, self.round_trip(&request)).await {
                Ok(outcome) => outcome,
                Err(_) if parks => {
                    debug!(op, key = ?key, "Local wait deadline expired");
                    return Err(ClientError::Timeout {
                        key: key.unwrap_or_default(),
                        waited: wait_timeout.unwrap_or(limit),
                    });
                }
                Err(_) => {
                    return Err(ClientError::Unavailable(format!(
                        "lock leader did not answer '{}' within {:?}",
                        op, limit
                    )))
                }
            },
            None => self.round_trip(&request).await,
        }?;

        match outcome {
            Response::Error { kind, message } => {
                debug!(op, key = ?key, %kind, "Lock leader returned an error");
                Err(ClientError::from_leader(
                    kind,
                    message,
                    key.as_deref(),
                    wait_timeout,
                ))
            }
            response => Ok(response),
        }
    }

    async fn round_trip(&self, request: &Request) -> Result<Response, ClientError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| self.connect_error(e))?;
        let mut transport = Framed::new(stream, protocol::frame_codec(self.max_frame_bytes));

        transport
            .send(protocol::encode(request)?)
            .await
            .map_err(ProtocolError::from)?;

        match transport.next().await {
            Some(Ok(frame)) => Ok(protocol::decode(&frame)?),
            Some(Err(e)) => Err(ProtocolError::from(e).into()),
            None => Err(ProtocolError::from(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "lock leader closed the connection without answering",
            ))
            .into()),
        }
    }

    fn connect_error(&self, err: io::Error) -> ClientError {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused => {
                ClientError::Unavailable(format!(
                    "no lock leader is listening on {:?}",
                    self.socket_path
                ))
            }
            _ => ClientError::Transport(ProtocolError::Io(err)),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
