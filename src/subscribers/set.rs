//! # SubscriberSet: non-blocking fan-out over multiple subscribers
//!
//! [`SubscriberSet`] distributes each [`Notice`] to multiple subscribers
//! **without awaiting** their processing.
//!
//! ## What it guarantees
//! - `emit(&Notice)` returns immediately.
//! - Per-subscriber FIFO (queue order).
//! - Panics inside subscribers are caught and published as `SubscriberPanicked`.
//! - Subscriber fault notices (`SubscriberPanicked`, `SubscriberOverflow`) are
//!   never delivered back to subscribers.
//!
//! ## What it does **not** guarantee
//! - No global ordering across different subscribers.
//! - No retries on per-subscriber queue overflow (notices are dropped for that subscriber).
//!
//! ```text
//!    emit(&Notice)
//!        ├────────► [queue S1] ─► worker S1 ─► on_notice()
//!        └────────► [queue SN] ─► worker SN ─► on_notice()
//! ```

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::notices::{Bus, Notice};

use super::Subscribe;

struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Notice>>,
}

/// Composite fan-out with per-subscriber bounded queues and worker tasks.
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker per subscriber.
    ///
    /// Overflow and panic notices are published on `bus`.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let cap = sub.queue_capacity().max(1);
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Notice>>(cap);
            let s = Arc::clone(&sub);
            let panic_bus = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(n) = rx.recv().await {
                    let fut = s.on_notice(n.as_ref());
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = panic_message(&*panic_err);
                        tracing::error!(subscriber = s.name(), %info, "subscriber panicked");
                        panic_bus.publish(Notice::subscriber_panicked(s.name(), info));
                    }
                }
            });

            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }

        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Fan-out one notice to all subscribers (non-blocking).
    ///
    /// Subscriber fault notices are dropped here: a subscriber that panics on
    /// every notice would otherwise feed on its own panic reports.
    pub fn emit(&self, notice: &Notice) {
        if notice.kind.is_subscriber_fault() {
            return;
        }
        let n = Arc::new(notice.clone());
        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&n)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            tracing::warn!(subscriber = channel.name, reason, "subscriber dropped notice");
            self.bus
                .publish(Notice::subscriber_overflow(channel.name, reason));
        }
    }

    /// Graceful shutdown: close all queues and await worker completion.
    pub async fn shutdown(self) {
        drop(self.channels);
        for h in self.workers {
            let _ = h.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }
}

pub(crate) fn panic_message(err: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notices::NoticeKind;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<NoticeKind>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_notice(&self, n: &Notice) {
            self.seen.lock().await.push(n.kind);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Exploding;

    #[async_trait]
    impl Subscribe for Exploding {
        async fn on_notice(&self, _n: &Notice) {
            panic!("kaboom");
        }

        fn name(&self) -> &'static str {
            "exploding"
        }
    }

    #[tokio::test]
    async fn fans_out_in_order() {
        let bus = Bus::new(16);
        let rec = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let set = SubscriberSet::new(vec![rec.clone() as Arc<dyn Subscribe>], bus);
        assert_eq!(set.len(), 1);

        set.emit(&Notice::new(NoticeKind::EventPosted));
        set.emit(&Notice::new(NoticeKind::EventCompleted));
        set.shutdown().await;

        let seen = rec.seen.lock().await.clone();
        assert_eq!(seen, vec![NoticeKind::EventPosted, NoticeKind::EventCompleted]);
    }

    #[tokio::test]
    async fn panics_are_isolated_and_reported() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Exploding) as Arc<dyn Subscribe>], bus);

        set.emit(&Notice::new(NoticeKind::EventPosted));
        let got = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.kind, NoticeKind::SubscriberPanicked);
        assert_eq!(got.reason.as_deref(), Some("kaboom"));
    }

    #[tokio::test]
    async fn fault_notices_are_not_fanned_out() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let rec = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let set = SubscriberSet::new(
            vec![rec.clone() as Arc<dyn Subscribe>, Arc::new(Exploding)],
            bus,
        );

        set.emit(&Notice::subscriber_panicked("exploding", "kaboom".into()));
        set.emit(&Notice::subscriber_overflow("recorder", "full"));
        set.emit(&Notice::new(NoticeKind::EventPosted));
        set.shutdown().await;

        assert_eq!(rec.seen.lock().await.clone(), vec![NoticeKind::EventPosted]);
        // Only the panic caused by EventPosted reaches the bus.
        let got = rx.try_recv().unwrap();
        assert_eq!(got.kind, NoticeKind::SubscriberPanicked);
        assert!(rx.try_recv().is_err());
    }
}
