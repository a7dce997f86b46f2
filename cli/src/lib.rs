// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Kestrel agent CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** `kestrel lock`, `kestrel leader` and `kestrel config` commands

pub mod commands;
pub mod daemon;
