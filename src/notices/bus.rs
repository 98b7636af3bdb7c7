//! # Notice bus for broadcasting runtime notices.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking publishing from the distributor, its link readers and timers.
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: a single ring buffer stores recent notices for all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: notices are lost if there are no active subscribers at send time.

use tokio::sync::broadcast;

use super::notice::Notice;

/// Broadcast channel for runtime notices.
///
/// Cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Notice>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (clamped to at least 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Notice>(capacity);
        Self { tx }
    }

    /// Publishes a notice to all active receivers.
    ///
    /// If there are no receivers the notice is dropped.
    pub fn publish(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }

    /// Creates a new receiver that observes subsequent notices.
    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notices::NoticeKind;

    #[tokio::test]
    async fn receiver_sees_notices_published_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Notice::new(NoticeKind::EventPosted));

        let mut rx = bus.subscribe();
        bus.publish(Notice::new(NoticeKind::EventCompleted));
        let got = rx.recv().await.unwrap();
        assert_eq!(got.kind, NoticeKind::EventCompleted);
    }
}
