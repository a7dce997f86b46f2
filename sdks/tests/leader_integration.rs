// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! End-to-end tests: a real leader on a temporary socket, driven through the
//! client library.

use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio_util::bytes::Bytes;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use kestrel_core::application::{CoordinatorConfig, LockCoordinator};
use kestrel_core::infrastructure::protocol::{self, Response};
use kestrel_core::infrastructure::LockLeader;
use kestrel_core::{ErrorKind, LockRegistry, LocksConfig};
use kestrel_sdk::{ClientError, DoOnce, LockClient};

struct TestLeader {
    _dir: TempDir,
    config: LocksConfig,
    shutdown: CancellationToken,
    server: JoinHandle<anyhow::Result<()>>,
}

impl TestLeader {
    async fn start(enabled: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = LocksConfig {
            enabled,
            sockets_path: dir.path().to_path_buf(),
            ..LocksConfig::default()
        };
        let shutdown = CancellationToken::new();
        let (coordinator, _serializer) = LockCoordinator::spawn(
            LockRegistry::new(),
            CoordinatorConfig::default(),
            shutdown.child_token(),
        );
        let leader = LockLeader::bind(&config, coordinator).await.unwrap();
        let server = tokio::spawn(leader.serve(shutdown.clone()));
        Self {
            _dir: dir,
            config,
            shutdown,
            server,
        }
    }

    fn client(&self) -> LockClient {
        LockClient::new("machine", &self.config.sockets_path).unwrap()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        self.server.await.unwrap().unwrap();
    }
}

async fn wait_for_waiters(client: &LockClient, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if client.ping().await.unwrap().stats.waiters == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {expected} parked waiters"));
}

#[tokio::test]
async fn test_acquire_get_release_round_trip() {
    let leader = TestLeader::start(true).await;
    let client = leader.client();

    let token = client.acquire("llama", None).await.unwrap();
    assert_eq!(token.len(), 32);
    assert_eq!(client.get("llama").await.unwrap(), token);

    client.release("llama", &token).await.unwrap();
    assert_eq!(client.get("llama").await.unwrap(), "");

    leader.stop().await;
}

#[tokio::test]
async fn test_mismatched_release_keeps_owner() {
    let leader = TestLeader::start(true).await;
    let client = leader.client();

    let token = client.acquire("llama", None).await.unwrap();
    let err = client.release("llama", "zzz").await.unwrap_err();
    assert!(matches!(err, ClientError::TokenMismatch(_)), "got {err:?}");
    assert_eq!(client.get("llama").await.unwrap(), token);

    let err = client.release("alpaca", &token).await.unwrap_err();
    assert!(matches!(err, ClientError::NotHeld(_)), "got {err:?}");

    leader.stop().await;
}

#[tokio::test]
async fn test_get_on_unknown_key_is_empty() {
    let leader = TestLeader::start(true).await;
    assert_eq!(leader.client().get("never-used").await.unwrap(), "");
    leader.stop().await;
}

#[tokio::test]
async fn test_blocked_acquire_resumes_after_release() {
    let leader = TestLeader::start(true).await;
    let client = leader.client();
    let token = client.acquire("llama", None).await.unwrap();

    let waiter = {
        let client = client.clone();
        tokio::spawn(async move { client.acquire("llama", None).await })
    };
    wait_for_waiters(&client, 1).await;

    client.release("llama", &token).await.unwrap();
    let second = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_ne!(second, token);
    assert_eq!(client.get("llama").await.unwrap(), second);

    leader.stop().await;
}

#[tokio::test]
async fn test_acquire_times_out_without_disturbing_holder() {
    let leader = TestLeader::start(true).await;
    let client = leader.client();
    let holder = client.acquire("llama", None).await.unwrap();

    let started = Instant::now();
    let err = client
        .acquire("llama", Some(Duration::from_millis(500)))
        .await
        .unwrap_err();
    let waited = started.elapsed();

    assert!(
        matches!(&err, ClientError::Timeout { key, .. } if key == "llama"),
        "got {err:?}"
    );
    assert!(err.is_retryable());
    assert!(waited >= Duration::from_millis(500));
    assert!(waited < Duration::from_secs(3));

    assert_eq!(client.get("llama").await.unwrap(), holder);
    wait_for_waiters(&client, 0).await;

    client.release("llama", &holder).await.unwrap();
    leader.stop().await;
}

#[tokio::test]
async fn test_concurrent_do_once_runs_exactly_once() {
    let leader = TestLeader::start(true).await;
    let client = leader.client();
    let doers = Arc::new(AtomicUsize::new(0));

    let mut participants = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        let doers = doers.clone();
        participants.push(tokio::spawn(async move {
            let outcome = client.do_once_start("build-cache", None).await.unwrap();
            if outcome == DoOnce::Do {
                doers.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                client.do_once_finish("build-cache").await.unwrap();
            }
            outcome
        }));
    }

    let mut outcomes = Vec::new();
    for participant in participants {
        outcomes.push(
            tokio::time::timeout(Duration::from_secs(5), participant)
                .await
                .unwrap()
                .unwrap(),
        );
    }

    assert_eq!(doers.load(Ordering::SeqCst), 1);
    assert_eq!(outcomes.iter().filter(|o| **o == DoOnce::Do).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| **o == DoOnce::Done).count(), 2);

    // Later arrivals return immediately.
    assert_eq!(
        client.do_once_start("build-cache", None).await.unwrap(),
        DoOnce::Done
    );
    leader.stop().await;
}

#[tokio::test]
async fn test_finish_without_start_is_misuse() {
    let leader = TestLeader::start(true).await;
    let client = leader.client();

    let err = client.do_once_finish("build-cache").await.unwrap_err();
    assert!(matches!(err, ClientError::BarrierMisuse(_)), "got {err:?}");

    assert_eq!(
        client.do_once_start("build-cache", None).await.unwrap(),
        DoOnce::Do
    );
    client.do_once_finish("build-cache").await.unwrap();
    let err = client.do_once_finish("build-cache").await.unwrap_err();
    assert!(matches!(err, ClientError::BarrierMisuse(_)), "got {err:?}");

    leader.stop().await;
}

#[tokio::test]
async fn test_disconnected_waiter_leaves_no_grant_behind() {
    let leader = TestLeader::start(true).await;
    let client = leader.client();
    let holder = client.acquire("llama", None).await.unwrap();

    let parked = {
        let client = client.clone();
        tokio::spawn(async move { client.acquire("llama", None).await })
    };
    wait_for_waiters(&client, 1).await;

    parked.abort();
    wait_for_waiters(&client, 0).await;

    client.release("llama", &holder).await.unwrap();
    assert_eq!(client.get("llama").await.unwrap(), "");

    let next = tokio::time::timeout(Duration::from_secs(1), client.acquire("llama", None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(client.get("llama").await.unwrap(), next);

    leader.stop().await;
}

#[tokio::test]
async fn test_do_once_waiters_that_give_up_are_removed() {
    let leader = TestLeader::start(true).await;
    let client = leader.client();
    assert_eq!(client.do_once_start("build-cache", None).await.unwrap(), DoOnce::Do);

    let parked = {
        let client = client.clone();
        tokio::spawn(async move { client.do_once_start("build-cache", None).await })
    };
    wait_for_waiters(&client, 1).await;

    parked.abort();
    wait_for_waiters(&client, 0).await;

    let err = client
        .do_once_start("build-cache", Some(Duration::from_millis(300)))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }), "{err:?}");
    wait_for_waiters(&client, 0).await;

    client.do_once_finish("build-cache").await.unwrap();
    assert_eq!(
        client.do_once_start("build-cache", None).await.unwrap(),
        DoOnce::Done
    );
    assert_eq!(client.ping().await.unwrap().stats.barriers_in_progress, 0);

    leader.stop().await;
}

#[tokio::test]
async fn test_many_clients_hold_the_lock_one_at_a_time() {
    let leader = TestLeader::start(true).await;
    let client = leader.client();
    let inside = Arc::new(AtomicBool::new(false));

    let mut workers = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        let inside = inside.clone();
        workers.push(tokio::spawn(async move {
            for _ in 0..3 {
                let token = client.acquire("shared", None).await.unwrap();
                assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                tokio::task::yield_now().await;
                inside.store(false, Ordering::SeqCst);
                client.release("shared", &token).await.unwrap();
            }
        }));
    }

    for worker in workers {
        tokio::time::timeout(Duration::from_secs(10), worker)
            .await
            .unwrap()
            .unwrap();
    }
    leader.stop().await;
}

#[tokio::test]
async fn test_disabled_leader_answers_unavailable() {
    let leader = TestLeader::start(false).await;
    let client = leader.client();

    let err = client.acquire("llama", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Unavailable(_)), "got {err:?}");

    let status = client.ping().await.unwrap();
    assert!(!status.enabled);
    leader.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_leader_keeps_serving() {
    let leader = TestLeader::start(true).await;

    let stream = UnixStream::connect(leader.config.socket_path()).await.unwrap();
    let mut transport = Framed::new(stream, protocol::frame_codec(64 * 1024));
    transport
        .send(Bytes::from_static(b"{\"op\":\"steal\"}"))
        .await
        .unwrap();
    let frame = transport.next().await.unwrap().unwrap();
    match protocol::decode::<Response>(&frame).unwrap() {
        Response::Error { kind, .. } => assert_eq!(kind, ErrorKind::MalformedRequest),
        other => panic!("unexpected response {other:?}"),
    }
    assert!(transport.next().await.is_none(), "connection should be closed");

    let err = leader.client().get("").await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)), "got {err:?}");
    assert_eq!(leader.client().get("llama").await.unwrap(), "");

    leader.stop().await;
}

#[tokio::test]
async fn test_second_leader_is_refused_and_socket_removed_on_shutdown() {
    let leader = TestLeader::start(true).await;
    let socket = leader.config.socket_path();

    let (coordinator, _serializer) = LockCoordinator::spawn(
        LockRegistry::new(),
        CoordinatorConfig::default(),
        CancellationToken::new(),
    );
    assert!(LockLeader::bind(&leader.config, coordinator).await.is_err());
    assert!(socket.exists());

    leader.stop().await;
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let config = LocksConfig {
        sockets_path: dir.path().to_path_buf(),
        ..LocksConfig::default()
    };
    // A bound-then-dropped listener leaves its socket file behind.
    drop(std::os::unix::net::UnixListener::bind(config.socket_path()).unwrap());
    assert!(config.socket_path().exists());

    let (coordinator, _serializer) = LockCoordinator::spawn(
        LockRegistry::new(),
        CoordinatorConfig::default(),
        CancellationToken::new(),
    );
    let leader = LockLeader::bind(&config, coordinator).await.unwrap();
    assert_eq!(leader.socket_path(), config.socket_path());
}
