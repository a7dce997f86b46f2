// Copyright (c) 2026 Kestrel Build Agent Authors
// SPDX-License-Identifier: AGPL-3.0
//! Waiter Notification
//!
//! Per-key, per-transition broadcast signals built on tokio `watch` channels.
//! A waiter is a subscribed receiver: it is registered by the serializer in the
//! same step that found the key busy, so no wakeup can be lost between the
//! failed check and the wait. Dropping a [`Waiter`] deregisters it.
//!
//! Every transition wakes *all* waiters on that key. A woken waiter only knows
//! that something changed and must re-run its check.

use std::collections::HashMap;
use tokio::sync::watch;

use crate::domain::lock::LockKey;

/// State change a waiter is parked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    /// The lock on the key was released.
    Release,
    /// The do-once barrier on the key reached `Done`.
    BarrierDone,
}

#[derive(Debug, Default)]
pub struct WaiterNotifier {
    signals: HashMap<(LockKey, Transition), watch::Sender<()>>,
}

impl WaiterNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for the next `transition` on `key`.
    pub fn park(&mut self, key: &LockKey, transition: Transition) -> Waiter {
        let sender = self
            .signals
            .entry((key.clone(), transition))
            .or_insert_with(|| watch::channel(()).0);
        Waiter {
            key: key.clone(),
            transition,
            receiver: sender.subscribe(),
        }
    }

    /// Wake every waiter parked on `transition` for `key`. Returns how many
    /// waiters were registered at that moment.
    pub fn notify(&mut self, key: &LockKey, transition: Transition) -> usize {
        // Removing the signal is safe: receivers observe the version bump
        // before they observe the closed sender.
        let Some(sender) = self.signals.remove(&(key.clone(), transition)) else {
            return 0;
        };
        let woken = sender.receiver_count();
        sender.send_replace(());
        woken
    }

    /// Drop signals whose waiters have all gone away (timed out or
    /// disconnected). Returns the number of signals removed.
    pub fn sweep(&mut self) -> usize {
        let before = self.signals.len();
        self.signals.retain(|_, sender| sender.receiver_count() > 0);
        before - self.signals.len()
    }

    /// Waiters currently parked across all keys.
    pub fn parked(&self) -> usize {
        self.signals.values().map(watch::Sender::receiver_count).sum()
    }

    pub fn parked_on(&self, key: &LockKey, transition: Transition) -> usize {
        self.signals
            .get(&(key.clone(), transition))
            .map(watch::Sender::receiver_count)
            .unwrap_or(0)
    }
}

/// A blocked request parked against one key and one transition.
#[derive(Debug)]
pub struct Waiter {
    key: LockKey,
    transition: Transition,
    receiver: watch::Receiver<()>,
}

impl Waiter {
    pub fn key(&self) -> &LockKey {
        &self.key
    }

    pub fn transition(&self) -> Transition {
        self.transition
    }

    /// Resolve on the next transition. Also resolves if the notifier itself
    /// goes away; the caller's re-check then reports why.
    pub async fn notified(mut self) {
        let _ = self.receiver.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(name: &str) -> LockKey {
        LockKey::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_notify_wakes_every_waiter() {
        let mut notifier = WaiterNotifier::new();
        let first = notifier.park(&key("llama"), Transition::Release);
        let second = notifier.park(&key("llama"), Transition::Release);
        assert_eq!(notifier.parked(), 2);

        assert_eq!(notifier.notify(&key("llama"), Transition::Release), 2);

        tokio::time::timeout(Duration::from_secs(1), async {
            first.notified().await;
            second.notified().await;
        })
        .await
        .expect("both waiters should wake");
    }

    #[tokio::test]
    async fn test_notification_before_wait_is_not_lost() {
        let mut notifier = WaiterNotifier::new();
        let waiter = notifier.park(&key("llama"), Transition::Release);
        notifier.notify(&key("llama"), Transition::Release);

        tokio::time::timeout(Duration::from_secs(1), waiter.notified())
            .await
            .expect("an earlier notification must still be observed");
    }

    #[tokio::test]
    async fn test_transitions_and_keys_are_isolated() {
        let mut notifier = WaiterNotifier::new();
        let waiter = notifier.park(&key("llama"), Transition::BarrierDone);

        assert_eq!(notifier.notify(&key("llama"), Transition::Release), 0);
        assert_eq!(notifier.notify(&key("alpaca"), Transition::BarrierDone), 0);

        let still_waiting =
            tokio::time::timeout(Duration::from_millis(50), waiter.notified()).await;
        assert!(still_waiting.is_err());
    }

    #[test]
    fn test_dropped_waiters_are_swept() {
        let mut notifier = WaiterNotifier::new();
        let waiter = notifier.park(&key("llama"), Transition::Release);
        let other = notifier.park(&key("alpaca"), Transition::Release);
        assert_eq!(notifier.parked_on(&key("llama"), Transition::Release), 1);

        drop(waiter);
        assert_eq!(notifier.parked(), 1);
        assert_eq!(notifier.sweep(), 1);
        assert_eq!(notifier.parked_on(&key("llama"), Transition::Release), 0);
        assert_eq!(other.key(), &key("alpaca"));
        assert_eq!(other.transition(), Transition::Release);
    }
}
