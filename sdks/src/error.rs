// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Client-side failure classification.

use std::time::Duration;
use thiserror::Error;

use kestrel_core::infrastructure::ProtocolError;
use kestrel_core::{ErrorKind, LockError};

#[derive(Debug, Error)]
pub enum ClientError {
    /// Raised before any connection is attempted.
    #[error("{0}")]
    ScopeUnsupported(String),

    /// No leader is listening, or locks are disabled on this agent.
    #[error("lock coordination is unavailable: {0}")]
    Unavailable(String),

    #[error("timed out after {waited:?} waiting on '{key}'")]
    Timeout { key: String, waited: Duration },

    #[error("{0}")]
    TokenMismatch(String),

    #[error("{0}")]
    NotHeld(String),

    #[error("{0}")]
    BarrierMisuse(String),

    /// The leader refused the request as malformed.
    #[error("{0}")]
    Rejected(String),

    #[error("transport failure: {0}")]
    Transport(#[from] ProtocolError),

    #[error("unexpected response from lock leader to '{0}'")]
    UnexpectedResponse(&'static str),
}

impl ClientError {
    /// Map an error response from the leader onto the client taxonomy.
    pub(crate) fn from_leader(
        kind: ErrorKind,
        message: String,
        key: Option<&str>,
        wait_timeout: Option<Duration>,
    ) -> Self {
        match kind {
            ErrorKind::Unavailable => ClientError::Unavailable(message),
            ErrorKind::ScopeUnsupported => ClientError::ScopeUnsupported(message),
            ErrorKind::Timeout => ClientError::Timeout {
                key: key.unwrap_or_default().to_string(),
                waited: wait_timeout.unwrap_or_default(),
            },
            ErrorKind::TokenMismatch => ClientError::TokenMismatch(message),
            ErrorKind::NotHeld => ClientError::NotHeld(message),
            ErrorKind::BarrierMisuse => ClientError::BarrierMisuse(message),
            ErrorKind::MalformedRequest | ErrorKind::Abandoned => ClientError::Rejected(message),
        }
    }

    /// Timeouts and broken transports may succeed on a later attempt; every
    /// other failure will repeat until the caller changes something.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout { .. } | ClientError::Transport(_))
    }
}

impl From<LockError> for ClientError {
    fn from(err: LockError) -> Self {
        let key = match &err {
            LockError::Timeout { key, .. } => Some(key.to_string()),
            _ => None,
        };
        let wait = match &err {
            LockError::Timeout { waited, .. } => Some(*waited),
            _ => None,
        };
        ClientError::from_leader(err.kind(), err.to_string(), key.as_deref(), wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::LockKey;

    #[test]
    fn test_leader_kinds_are_classified() {
        let err = ClientError::from_leader(
            ErrorKind::Timeout,
            "timed out".to_string(),
            Some("llama"),
            Some(Duration::from_secs(2)),
        );
        assert!(matches!(
            &err,
            ClientError::Timeout { key, waited } if key == "llama" && *waited == Duration::from_secs(2)
        ));
        assert!(err.is_retryable());

        let err = ClientError::from_leader(ErrorKind::TokenMismatch, "nope".into(), None, None);
        assert!(matches!(err, ClientError::TokenMismatch(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_scope_error_keeps_message() {
        let err: ClientError = "cluster"
            .parse::<kestrel_core::LockScope>()
            .unwrap_err()
            .into();
        assert!(matches!(err, ClientError::ScopeUnsupported(_)));
        assert!(err.to_string().contains("only 'machine' scope"));
    }

    #[test]
    fn test_not_held_maps_from_domain_error() {
        let err: ClientError = LockError::NotHeld(LockKey::new("llama").unwrap()).into();
        assert!(matches!(err, ClientError::NotHeld(ref m) if m.contains("llama")));
    }
}
