// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! # Lock Registry
//!
//! Authoritative in-memory map of keys to lock and barrier state. The registry
//! is plain synchronous data: it is owned by exactly one serializer task (see
//! `application::coordinator`) which gives every check-and-set its atomicity.
//!
//! Entries are created lazily on first reference. A released lock entry is
//! dropped straight away because an unheld entry is indistinguishable from an
//! absent one; barrier entries are kept for the lifetime of the registry since
//! `Done` must stay observable.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::barrier::{BarrierEntry, BarrierState, StartOutcome};
use crate::domain::error::LockError;
use crate::domain::lock::{LockEntry, LockKey, LockToken};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Granted(LockToken),
    /// Someone else holds the key; park until it is released.
    Held,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub locks_held: usize,
    pub barriers_in_progress: usize,
    pub barriers_done: usize,
}

#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: HashMap<LockKey, LockEntry>,
    barriers: HashMap<LockKey, BarrierEntry>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&mut self, key: &LockKey) -> AcquireOutcome {
        let entry = self.locks.entry(key.clone()).or_default();
        match entry.try_acquire() {
            Some(token) => AcquireOutcome::Granted(token),
            None => AcquireOutcome::Held,
        }
    }

    pub fn release(&mut self, key: &LockKey, token: &str) -> Result<(), LockError> {
        let entry = self
            .locks
            .get_mut(key)
            .ok_or_else(|| LockError::NotHeld(key.clone()))?;
        entry.release(key, token)?;
        self.locks.remove(key);
        Ok(())
    }

    /// Advisory read of the current token; `""` when unheld or never used.
    pub fn get(&self, key: &LockKey) -> String {
        self.locks
            .get(key)
            .map(|entry| entry.value().to_string())
            .unwrap_or_default()
    }

    pub fn start_once(&mut self, key: &LockKey) -> StartOutcome {
        self.barriers.entry(key.clone()).or_default().start()
    }

    pub fn finish_once(&mut self, key: &LockKey) -> Result<(), LockError> {
        match self.barriers.get_mut(key) {
            Some(barrier) => barrier.finish(key),
            None => Err(LockError::BarrierMisuse {
                key: key.clone(),
                state: BarrierState::NotStarted,
            }),
        }
    }

    pub fn barrier_state(&self, key: &LockKey) -> BarrierState {
        self.barriers
            .get(key)
            .map(BarrierEntry::state)
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            locks_held: self.locks.values().filter(|e| e.is_held()).count(),
            ..RegistryStats::default()
        };
        for barrier in self.barriers.values() {
            match barrier.state() {
                BarrierState::InProgress => stats.barriers_in_progress += 1,
                BarrierState::Done => stats.barriers_done += 1,
                BarrierState::NotStarted => {}
            }
        }
        stats
    }
}
