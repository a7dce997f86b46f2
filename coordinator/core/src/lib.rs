// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! # `kestrel-coordinator-core`: Machine-Scoped Lock & Do-Once Coordination
//!
//! A local broker that lets agent processes (and the hook scripts they spawn)
//! on one host serialize access to shared resources and run initialization
//! work exactly once.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `LockRegistry`, `LockToken`, `BarrierState`, `LockError`, `AgentConfig` |
//! | [`application`] | Application | `LockCoordinator` serializer actor, waiter notification |
//! | [`infrastructure`] | Infrastructure | wire protocol, `LockLeader` Unix socket listener |

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
