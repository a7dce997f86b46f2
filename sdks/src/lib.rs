// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Kestrel Lock SDK
//!
//! Talk to the host's lock leader from agent code, hook helpers and the
//! `kestrel lock` commands.
//!
//! ```no_run
//! # async fn run() -> Result<(), kestrel_sdk::ClientError> {
//! use std::time::Duration;
//! use kestrel_sdk::{DoOnce, LockClient};
//!
//! let client = LockClient::new("machine", "/var/lib/kestrel/sockets")?;
//!
//! let token = client.acquire("llama", Some(Duration::from_secs(30))).await?;
//! // ... exclusive work ...
//! client.release("llama", &token).await?;
//!
//! if client.do_once_start("build-cache", None).await? == DoOnce::Do {
//!     // ... initialize the cache ...
//!     client.do_once_finish("build-cache").await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;

pub use client::{LeaderStatus, LockClient};
pub use error::ClientError;
pub use kestrel_core::{DoOnce, LockScope};
