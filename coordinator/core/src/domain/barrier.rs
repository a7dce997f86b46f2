// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! # Do-Once Barrier
//!
//! Exactly one participant is told to `do` the work; everyone else is told the
//! work is `done`, after it actually is.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::LockError;
use crate::domain::lock::LockKey;

/// Lifecycle of a do-once key. Transitions only move forward:
/// `NotStarted → InProgress → Done`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
    #[default]
    NotStarted,
    InProgress,
    Done,
}

impl fmt::Display for BarrierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarrierState::NotStarted => f.write_str("not started"),
            BarrierState::InProgress => f.write_str("in progress"),
            BarrierState::Done => f.write_str("done"),
        }
    }
}

/// Answer handed to a `lock do` caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DoOnce {
    /// Caller owns the work and must finish the barrier afterwards.
    Do,
    /// Work has completed.
    Done,
}

impl fmt::Display for DoOnce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoOnce::Do => f.write_str("do"),
            DoOnce::Done => f.write_str("done"),
        }
    }
}

/// Result of one start attempt against a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Ready(DoOnce),
    /// Someone else is doing the work; park until it is done.
    InProgress,
}

#[derive(Debug, Clone, Default)]
pub struct BarrierEntry {
    state: BarrierState,
}

impl BarrierEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BarrierState {
        self.state
    }

    pub fn start(&mut self) -> StartOutcome {
        match self.state {
            BarrierState::NotStarted => {
                self.state = BarrierState::InProgress;
                StartOutcome::Ready(DoOnce::Do)
            }
            BarrierState::InProgress => StartOutcome::InProgress,
            BarrierState::Done => StartOutcome::Ready(DoOnce::Done),
        }
    }

    /// `InProgress → Done`. Any other state is a caller error and leaves the
    /// entry unchanged.
    pub fn finish(&mut self, key: &LockKey) -> Result<(), LockError> {
        match self.state {
            BarrierState::InProgress => {
                self.state = BarrierState::Done;
                Ok(())
            }
            state => Err(LockError::BarrierMisuse {
                key: key.clone(),
                state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_start_is_told_to_do() {
        let mut barrier = BarrierEntry::new();
        assert_eq!(barrier.start(), StartOutcome::Ready(DoOnce::Do));
        assert_eq!(barrier.state(), BarrierState::InProgress);
        assert_eq!(barrier.start(), StartOutcome::InProgress);
    }

    #[test]
    fn test_finish_moves_to_done() {
        let key = LockKey::new("build-cache").unwrap();
        let mut barrier = BarrierEntry::new();
        barrier.start();
        barrier.finish(&key).unwrap();
        assert_eq!(barrier.state(), BarrierState::Done);
        assert_eq!(barrier.start(), StartOutcome::Ready(DoOnce::Done));
    }

    #[test]
    fn test_finish_outside_in_progress_is_misuse() {
        let key = LockKey::new("build-cache").unwrap();
        let mut barrier = BarrierEntry::new();

        let err = barrier.finish(&key).unwrap_err();
        assert_eq!(
            err,
            LockError::BarrierMisuse {
                key: key.clone(),
                state: BarrierState::NotStarted
            }
        );
        assert_eq!(barrier.state(), BarrierState::NotStarted);

        barrier.start();
        barrier.finish(&key).unwrap();
        assert!(matches!(
            barrier.finish(&key),
            Err(LockError::BarrierMisuse {
                state: BarrierState::Done,
                ..
            })
        ));
        assert_eq!(barrier.state(), BarrierState::Done);
    }

    #[test]
    fn test_do_once_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&DoOnce::Do).unwrap(), "\"do\"");
        assert_eq!(DoOnce::Done.to_string(), "done");
    }
}
