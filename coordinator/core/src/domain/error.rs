// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy shared by the leader, the wire protocol and the client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::barrier::BarrierState;
use crate::domain::lock::LockKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("lock coordination is unavailable: {0}")]
    Unavailable(String),

    #[error("only '{supported}' scope for locks is supported in this version (requested '{requested}')")]
    ScopeUnsupported {
        requested: String,
        supported: &'static str,
    },

    #[error("timed out after {waited:?} waiting on '{key}'")]
    Timeout { key: LockKey, waited: Duration },

    #[error("token does not match the current holder of lock '{0}'")]
    TokenMismatch(LockKey),

    #[error("lock '{0}' is not held")]
    NotHeld(LockKey),

    #[error("do-once '{key}' cannot be marked done while {state}")]
    BarrierMisuse { key: LockKey, state: BarrierState },

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The caller went away (deadline on its side, or connection dropped)
    /// while parked.
    #[error("request abandoned by caller")]
    Abandoned,
}

/// Stable, wire-safe classification of a [`LockError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unavailable,
    ScopeUnsupported,
    Timeout,
    TokenMismatch,
    NotHeld,
    BarrierMisuse,
    MalformedRequest,
    Abandoned,
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::Unavailable(_) => ErrorKind::Unavailable,
            LockError::ScopeUnsupported { .. } => ErrorKind::ScopeUnsupported,
            LockError::Timeout { .. } => ErrorKind::Timeout,
            LockError::TokenMismatch(_) => ErrorKind::TokenMismatch,
            LockError::NotHeld(_) => ErrorKind::NotHeld,
            LockError::BarrierMisuse { .. } => ErrorKind::BarrierMisuse,
            LockError::MalformedRequest(_) => ErrorKind::MalformedRequest,
            LockError::Abandoned => ErrorKind::Abandoned,
        }
    }

    /// Whether a caller may reasonably retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::Abandoned)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::ScopeUnsupported => "scope_unsupported",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TokenMismatch => "token_mismatch",
            ErrorKind::NotHeld => "not_held",
            ErrorKind::BarrierMisuse => "barrier_misuse",
            ErrorKind::MalformedRequest => "malformed_request",
            ErrorKind::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}
