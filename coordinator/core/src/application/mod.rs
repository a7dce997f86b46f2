// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Application layer: the serializer actor and waiter notification.

pub mod coordinator;
pub mod notification;

pub use coordinator::{CoordinatorConfig, CoordinatorStats, LockCoordinator, LockGrant};
pub use notification::{Transition, Waiter, WaiterNotifier};
