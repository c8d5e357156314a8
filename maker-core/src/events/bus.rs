//! The Notifier: best-effort-latest snapshot delivery (spec §4.2).
//!
//! The teacher's `EventBus` broadcasts a growing enum of domain events over
//! a `tokio::sync::broadcast` channel, queueing one entry per event for each
//! subscriber. The spec's Notifier has different semantics: subscribers
//! only ever observe the *latest* engine snapshot, never a backlog — so
//! this is built on `tokio::sync::watch` instead, which drops intermediate
//! values by construction and never errors on a full queue.

use super::types::EngineSnapshot;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Shared reference to the Notifier.
pub type SharedNotifier = Arc<Notifier>;

/// Publishes engine snapshots to any number of subscribers.
pub struct Notifier {
    sender: watch::Sender<Option<EngineSnapshot>>,
}

impl Notifier {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    pub fn shared(self) -> SharedNotifier {
        Arc::new(self)
    }

    /// Publish a new snapshot. Subscribers that haven't polled since the
    /// last publish simply see the newest value on their next poll.
    pub fn publish(&self, snapshot: EngineSnapshot) {
        let receivers = self.sender.receiver_count();
        debug!(receivers, emitted_at = %snapshot.emitted_at, "engine snapshot published");
        // A closed channel (zero receivers) is not an error for a
        // best-effort notifier; there is simply nobody to tell.
        let _ = self.sender.send(Some(snapshot));
    }

    /// Subscribe to snapshot updates. The returned receiver immediately
    /// yields the latest snapshot (or `None` if nothing has been published
    /// yet) and then blocks until the next `publish`.
    pub fn subscribe(&self) -> watch::Receiver<Option<EngineSnapshot>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{EngineStateSnapshot, MakerConfig};

    #[tokio::test]
    async fn subscriber_sees_latest_snapshot_only() {
        let notifier = Notifier::new();
        let mut rx = notifier.subscribe();

        notifier.publish(EngineSnapshot::new(EngineStateSnapshot::default(), MakerConfig::default()));
        notifier.publish(EngineSnapshot::new(EngineStateSnapshot::default(), MakerConfig::default()));

        rx.changed().await.unwrap();
        let snapshot = rx.borrow().clone();
        assert!(snapshot.is_some());
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let notifier = Notifier::new();
        notifier.publish(EngineSnapshot::new(EngineStateSnapshot::default(), MakerConfig::default()));
    }
}
