// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! # Lock Value Objects
//!
//! - [`LockKey`]: opaque name within the machine-scoped namespace.
//! - [`LockToken`]: bearer credential minted on every unlocked → locked transition.
//! - [`LockEntry`]: per-key mutex state held by the registry.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::error::LockError;

/// Number of random bytes behind every token (hex encoded to 32 characters).
pub const TOKEN_BYTES: usize = 16;

/// Opaque key naming a lock or a do-once barrier. No hierarchy, no expiry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockKey(String);

impl LockKey {
    /// Build a key, rejecting the empty string.
    pub fn new(key: impl Into<String>) -> Result<Self, LockError> {
        let key = key.into();
        if key.is_empty() {
            return Err(LockError::MalformedRequest(
                "lock key cannot be empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Bearer capability returned by a successful acquire.
///
/// Tokens are compared as plain strings: whoever holds the string may release
/// the lock, which lets `lock acquire` and `lock release` run as separate
/// invocations of a shell script.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    /// Mint a fresh unguessable token.
    pub fn mint() -> Self {
        let bytes: [u8; TOKEN_BYTES] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for LockToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Tokens are credentials; keep them out of debug logs.
impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "LockToken({}…)", prefix)
    }
}

/// Mutex state for one key.
///
/// # Invariants
///
/// - `token.is_none()` exactly when the lock is not held.
/// - At most one token is valid for a key at any instant.
#[derive(Debug, Clone, Default)]
pub struct LockEntry {
    token: Option<LockToken>,
}

impl LockEntry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.token.is_some()
    }

    /// Current token, or `""` when unheld.
    pub fn value(&self) -> &str {
        self.token.as_ref().map(LockToken::as_str).unwrap_or("")
    }

    /// Take the lock if it is free. Returns `None` while someone else holds it.
    pub fn try_acquire(&mut self) -> Option<LockToken> {
        if self.is_held() {
            return None;
        }
        let token = LockToken::mint();
        self.token = Some(token.clone());
        Some(token)
    }

    /// Clear the lock if `token` matches the stored token exactly.
    /// On failure the entry is left untouched.
    pub fn release(&mut self, key: &LockKey, token: &str) -> Result<(), LockError> {
        match &self.token {
            None => Err(LockError::NotHeld(key.clone())),
            Some(current) if current.as_str() != token => {
                Err(LockError::TokenMismatch(key.clone()))
            }
            Some(_) => {
                self.token = None;
                Ok(())
            }
        }
    }
}
