// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Kestrel CLI

pub mod config;
pub mod leader;
pub mod lock;

pub use self::config::ConfigCommand;
pub use self::leader::LeaderCommand;
pub use self::lock::LockCommand;
