// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Lock Leader Wire Protocol
//!
//! Each message is a 4-byte big-endian length prefix followed by a JSON
//! payload:
//!
//! ```text
//! -> {"op":"acquire","key":"llama","wait_timeout_ms":2000}
//! <- {"status":"token","token":"9f2c…"}
//! -> {"op":"release","key":"llama","token":"zzz"}
//! <- {"status":"error","kind":"token_mismatch","message":"…"}
//! ```
//!
//! A connection carries requests strictly one after another.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::LengthDelimitedCodec;

use crate::application::coordinator::CoordinatorStats;
use crate::domain::barrier::DoOnce;
use crate::domain::error::{ErrorKind, LockError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Acquire {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_timeout_ms: Option<u64>,
    },
    Release {
        key: String,
        token: String,
    },
    Get {
        key: String,
    },
    DoStart {
        key: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_timeout_ms: Option<u64>,
    },
    DoFinish {
        key: String,
    },
    Ping,
}

impl Request {
    pub fn op(&self) -> &'static str {
        match self {
            Request::Acquire { .. } => "acquire",
            Request::Release { .. } => "release",
            Request::Get { .. } => "get",
            Request::DoStart { .. } => "do_start",
            Request::DoFinish { .. } => "do_finish",
            Request::Ping => "ping",
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Request::Acquire { key, .. }
            | Request::Release { key, .. }
            | Request::Get { key }
            | Request::DoStart { key, .. }
            | Request::DoFinish { key } => Some(key.as_str()),
            Request::Ping => None,
        }
    }

    /// Server-side bound on how long the request may stay parked.
    pub fn wait_timeout(&self) -> Option<Duration> {
        match self {
            Request::Acquire { wait_timeout_ms, .. } | Request::DoStart { wait_timeout_ms, .. } => {
                wait_timeout_ms.map(Duration::from_millis)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Token {
        token: String,
    },
    Value {
        value: String,
    },
    DoOnce {
        outcome: DoOnce,
    },
    Ok,
    Pong {
        enabled: bool,
        uptime_seconds: u64,
        stats: CoordinatorStats,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl From<LockError> for Response {
    fn from(err: LockError) -> Self {
        Response::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Length-prefixed framing shared by the leader and its clients.
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

pub fn encode<T: Serialize>(message: &T) -> Result<Bytes, ProtocolError> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(ProtocolError::Encode)
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(frame).map_err(ProtocolError::Decode)
}
