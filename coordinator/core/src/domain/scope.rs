// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Lock scopes. Only the host-local `machine` namespace exists today; the type
//! is here so callers validate the scope before reaching for the transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::error::LockError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    #[default]
    Machine,
}

impl LockScope {
    pub const MACHINE: &'static str = "machine";

    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Machine => Self::MACHINE,
        }
    }
}

impl FromStr for LockScope {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            Self::MACHINE => Ok(LockScope::Machine),
            other => Err(LockError::ScopeUnsupported {
                requested: other.to_string(),
                supported: Self::MACHINE,
            }),
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
