// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! # Coordination Domain Layer
//!
//! Pure domain types for lock and do-once coordination. No I/O dependencies
//! apart from configuration file loading.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`lock`] | `LockKey`, `LockToken`, `LockEntry` |
//! | [`barrier`] | `BarrierState`, `BarrierEntry`, `DoOnce` |
//! | [`registry`] | `LockRegistry`, `RegistryStats` |
//! | [`scope`] | `LockScope` |
//! | [`error`] | `LockError`, `ErrorKind` |
//! | [`agent_config`] | `AgentConfig`, `LocksConfig` |

pub mod agent_config;
pub mod barrier;
pub mod error;
pub mod lock;
pub mod registry;
pub mod scope;

pub use agent_config::*;
pub use barrier::*;
pub use error::*;
pub use lock::*;
pub use registry::*;
pub use scope::*;
