// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure layer: wire protocol and the Unix socket leader.

pub mod protocol;
pub mod server;

pub use protocol::{frame_codec, ProtocolError, Request, Response};
pub use server::{ConnectionId, LockLeader};
