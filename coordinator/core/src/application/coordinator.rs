// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Lock Coordinator - serializer actor for the lock registry
//!
//! Every registry mutation goes through one task that owns the
//! [`LockRegistry`] and the [`WaiterNotifier`]. Connection handlers talk to it
//! through [`LockCoordinator`], a cheap cloneable handle backed by a command
//! channel. Check-and-set sequences therefore never interleave, while
//! blocking only ever happens on the caller's side of the channel.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Serializer + wait/recheck loop for acquire and do-once

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::notification::{Transition, Waiter, WaiterNotifier};
use crate::domain::agent_config::LocksConfig;
use crate::domain::barrier::{DoOnce, StartOutcome};
use crate::domain::error::LockError;
use crate::domain::lock::{LockKey, LockToken};
use crate::domain::registry::{AcquireOutcome, LockRegistry};

/// Configuration for the coordinator task
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How often idle waiter signals are swept
    pub sweep_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl From<&LocksConfig> for CoordinatorConfig {
    fn from(config: &LocksConfig) -> Self {
        Self {
            sweep_interval: Duration::from_secs(config.sweep_interval_seconds),
        }
    }
}

/// Snapshot of the leader's state, for health checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    pub locks_held: usize,
    pub barriers_in_progress: usize,
    pub barriers_done: usize,
    pub waiters: usize,
}

/// Outcome of one pass through the serializer.
#[derive(Debug)]
enum Attempt<T> {
    Ready(T),
    Park(Waiter),
}

/// A granted lock that has not been handed to its caller yet.
///
/// If a grant is dropped without [`LockGrant::redeem`] (the caller vanished
/// between the grant and its delivery) the lock is released again, so an
/// abandoned acquire never leaves a held lock nobody knows the token for.
pub struct LockGrant {
    key: LockKey,
    token: LockToken,
    delivered: bool,
    commands: mpsc::UnboundedSender<Command>,
}

impl LockGrant {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Hand the token over to the caller for good.
    pub fn redeem(mut self) -> LockToken {
        self.delivered = true;
        self.token.clone()
    }
}

impl fmt::Debug for LockGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGrant")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("delivered", &self.delivered)
            .finish()
    }
}

impl Drop for LockGrant {
    fn drop(&mut self) {
        if !self.delivered {
            let _ = self.commands.send(Command::Revoke {
                key: self.key.clone(),
                token: self.token.clone(),
            });
        }
    }
}

enum Command {
    Acquire {
        key: LockKey,
        reply: oneshot::Sender<Attempt<LockGrant>>,
    },
    Release {
        key: LockKey,
        token: String,
        reply: oneshot::Sender<Result<(), LockError>>,
    },
    Revoke {
        key: LockKey,
        token: LockToken,
    },
    Get {
        key: LockKey,
        reply: oneshot::Sender<String>,
    },
    StartOnce {
        key: LockKey,
        reply: oneshot::Sender<Attempt<DoOnce>>,
    },
    FinishOnce {
        key: LockKey,
        reply: oneshot::Sender<Result<(), LockError>>,
    },
    Stats {
        reply: oneshot::Sender<CoordinatorStats>,
    },
}

impl Command {
    fn op(&self) -> &'static str {
        match self {
            Command::Acquire { .. } => "acquire",
            Command::Release { .. } => "release",
            Command::Revoke { .. } => "revoke",
            Command::Get { .. } => "get",
            Command::StartOnce { .. } => "do_start",
            Command::FinishOnce { .. } => "do_finish",
            Command::Stats { .. } => "stats",
        }
    }
}

/// Handle to the serializer task.
#[derive(Debug, Clone)]
pub struct LockCoordinator {
    commands: mpsc::UnboundedSender<Command>,
}

impl LockCoordinator {
    /// Start the serializer task owning `registry`. The task stops when
    /// `shutdown` is cancelled or every handle and outstanding grant has been
    /// dropped; the registry is dropped with it.
    pub fn spawn(
        registry: LockRegistry,
        config: CoordinatorConfig,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let serializer = Serializer {
            registry,
            notifier: WaiterNotifier::new(),
            commands: commands.downgrade(),
        };
        let handle = tokio::spawn(serializer.run(receiver, config, shutdown));
        (Self { commands }, handle)
    }

    /// Acquire the lock on `key`, parking until it is released by its holder.
    ///
    /// Gives up with [`LockError::Timeout`] once `wait_timeout` elapses and
    /// with [`LockError::Abandoned`] as soon as `abandoned` resolves. Neither
    /// affects ownership of the lock.
    pub async fn acquire<A>(
        &self,
        key: &LockKey,
        wait_timeout: Option<Duration>,
        abandoned: A,
    ) -> Result<LockGrant, LockError>
    where
        A: Future<Output = ()>,
    {
        self.park_until(key, wait_timeout, abandoned, move || {
            self.call(|reply| Command::Acquire {
                key: key.clone(),
                reply,
            })
        })
        .await
    }

    pub async fn release(&self, key: &LockKey, token: &str) -> Result<(), LockError> {
        self.call(|reply| Command::Release {
            key: key.clone(),
            token: token.to_string(),
            reply,
        })
        .await?
    }

    /// Advisory read of the current token. The answer may be stale as soon as
    /// it is returned.
    pub async fn get(&self, key: &LockKey) -> Result<String, LockError> {
        self.call(|reply| Command::Get {
            key: key.clone(),
            reply,
        })
        .await
    }

    /// Begin a do-once section. Exactly one caller per key gets
    /// [`DoOnce::Do`]; everyone else waits for the barrier to finish and gets
    /// [`DoOnce::Done`].
    pub async fn do_once_start<A>(
        &self,
        key: &LockKey,
        wait_timeout: Option<Duration>,
        abandoned: A,
    ) -> Result<DoOnce, LockError>
    where
        A: Future<Output = ()>,
    {
        self.park_until(key, wait_timeout, abandoned, move || {
            self.call(|reply| Command::StartOnce {
                key: key.clone(),
                reply,
            })
        })
        .await
    }

    pub async fn do_once_finish(&self, key: &LockKey) -> Result<(), LockError> {
        self.call(|reply| Command::FinishOnce {
            key: key.clone(),
            reply,
        })
        .await?
    }

    pub async fn stats(&self) -> Result<CoordinatorStats, LockError> {
        self.call(|reply| Command::Stats { reply }).await
    }

    /// Wake-all-and-recheck loop shared by acquire and do-once start.
    async fn park_until<T, A, F, Fut>(
        &self,
        key: &LockKey,
        wait_timeout: Option<Duration>,
        abandoned: A,
        mut attempt: F,
    ) -> Result<T, LockError>
    where
        A: Future<Output = ()>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>, LockError>>,
    {
        let started = Instant::now();
        let deadline = wait_timeout.map(|timeout| started + timeout);
        tokio::pin!(abandoned);

        loop {
            let waiter = match attempt().await? {
                Attempt::Ready(value) => return Ok(value),
                Attempt::Park(waiter) => waiter,
            };
            debug!(key = %waiter.key(), transition = ?waiter.transition(), "Parked waiter");

            tokio::select! {
                _ = waiter.notified() => {
                    debug!(key = %key, "Waiter woken, rechecking");
                }
                _ = deadline_elapsed(deadline) => {
                    return Err(LockError::Timeout {
                        key: key.clone(),
                        waited: started.elapsed(),
                    });
                }
                _ = &mut abandoned => {
                    return Err(LockError::Abandoned);
                }
            }
        }
    }

    async fn call<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, LockError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| coordinator_stopped())?;
        response.await.map_err(|_| coordinator_stopped())
    }
}

fn coordinator_stopped() -> LockError {
    LockError::Unavailable("lock coordinator has stopped".to_string())
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The single owner of registry state.
struct Serializer {
    registry: LockRegistry,
    notifier: WaiterNotifier,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl Serializer {
    async fn run(
        mut self,
        mut receiver: mpsc::UnboundedReceiver<Command>,
        config: CoordinatorConfig,
        shutdown: CancellationToken,
    ) {
        info!(
            sweep_interval_seconds = config.sweep_interval.as_secs(),
            "Lock coordinator started"
        );

        let mut sweep = interval(config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = receiver.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = sweep.tick() => {
                    let swept = self.notifier.sweep();
                    if swept > 0 {
                        debug!(swept, "Swept idle waiter signals");
                    }
                    self.record_waiters();
                }
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping lock coordinator");
                    break;
                }
            }
        }

        let stats = self.registry.stats();
        info!(
            locks_held = stats.locks_held,
            barriers_in_progress = stats.barriers_in_progress,
            "Lock coordinator stopped; in-memory lock state discarded"
        );
    }

    fn handle(&mut self, command: Command) {
        metrics::counter!("kestrel_lock_operations_total", "op" => command.op()).increment(1);

        match command {
            Command::Acquire { key, reply } => match self.registry.try_acquire(&key) {
                AcquireOutcome::Granted(token) => {
                    let Some(commands) = self.commands.upgrade() else {
                        // Every handle is gone; nobody can receive the grant.
                        let _ = self.registry.release(&key, token.as_str());
                        return;
                    };
                    debug!(key = %key, "Lock granted");
                    // An undeliverable grant is dropped here and revokes itself.
                    let _ = reply.send(Attempt::Ready(LockGrant {
                        key,
                        token,
                        delivered: false,
                        commands,
                    }));
                }
                AcquireOutcome::Held => {
                    let waiter = self.notifier.park(&key, Transition::Release);
                    self.record_waiters();
                    let _ = reply.send(Attempt::Park(waiter));
                }
            },
            Command::Release { key, token, reply } => {
                let result = self.release(&key, &token);
                if let Err(e) = &result {
                    debug!(key = %key, error = %e, "Release rejected");
                }
                let _ = reply.send(result);
            }
            Command::Revoke { key, token } => {
                warn!(key = %key, "Releasing lock whose grant was never delivered");
                if let Err(e) = self.release(&key, token.as_str()) {
                    debug!(key = %key, error = %e, "Revoked grant was already released");
                }
            }
            Command::Get { key, reply } => {
                let _ = reply.send(self.registry.get(&key));
            }
            Command::StartOnce { key, reply } => {
                let attempt = match self.registry.start_once(&key) {
                    StartOutcome::Ready(outcome) => {
                        debug!(key = %key, outcome = %outcome, "Do-once started");
                        Attempt::Ready(outcome)
                    }
                    StartOutcome::InProgress => {
                        let waiter = self.notifier.park(&key, Transition::BarrierDone);
                        self.record_waiters();
                        Attempt::Park(waiter)
                    }
                };
                if let Err(Attempt::Ready(DoOnce::Do)) = reply.send(attempt) {
                    warn!(key = %key, "Do-once assignment was not delivered; barrier stays in progress");
                }
            }
            Command::FinishOnce { key, reply } => {
                let result = self.registry.finish_once(&key);
                match &result {
                    Ok(()) => {
                        let woken = self.notifier.notify(&key, Transition::BarrierDone);
                        self.record_waiters();
                        debug!(key = %key, woken, "Do-once finished");
                    }
                    Err(e) => warn!(key = %key, error = %e, "Rejected do-once finish"),
                }
                let _ = reply.send(result);
            }
            Command::Stats { reply } => {
                let registry = self.registry.stats();
                let _ = reply.send(CoordinatorStats {
                    locks_held: registry.locks_held,
                    barriers_in_progress: registry.barriers_in_progress,
                    barriers_done: registry.barriers_done,
                    waiters: self.notifier.parked(),
                });
            }
        }
    }

    fn release(&mut self, key: &LockKey, token: &str) -> Result<(), LockError> {
        self.registry.release(key, token)?;
        let woken = self.notifier.notify(key, Transition::Release);
        self.record_waiters();
        debug!(key = %key, woken, "Lock released");
        Ok(())
    }

    fn record_waiters(&self) {
        metrics::gauge!("kestrel_lock_waiters").set(self.notifier.parked() as f64);
    }
}
