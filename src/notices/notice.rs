//! # Runtime notices emitted by the distributor and its workers.
//!
//! [`NoticeKind`] classifies what happened to events, polls, workers and graphs.
//! The [`Notice`] struct carries the metadata (event id and key, correlation
//! id, worker, reason, delay).
//!
//! ## Ordering guarantees
//! Each notice has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use eventvisor::{Notice, NoticeKind, WorkerId};
//!
//! let n = Notice::new(NoticeKind::EventQueued)
//!     .with_event_id("pool.resize")
//!     .with_worker(WorkerId(1));
//!
//! assert_eq!(n.kind, NoticeKind::EventQueued);
//! assert_eq!(n.event_id.as_deref(), Some("pool.resize"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::model::{DescriptorFlag, Event, WorkerId};

/// Global sequence counter for notice ordering.
static NOTICE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime notices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    // === Event flow ===
    /// Event accepted by `post_event`.
    EventPosted,
    /// Event parked behind an in-flight event with the same binding key.
    EventQueued,
    /// Event written to a worker stream.
    EventDispatched,
    /// Worker acknowledged a `SCHEDULE` delivery.
    EventAcked,
    /// Handler signalled completion.
    EventCompleted,
    /// Handler returned an error or panicked; `reason` is set.
    EventFailed,
    /// Event cancelled; `reason` is the cancel reason.
    EventCancelled,

    // === Polling ===
    /// Poll re-armed; `delay_ms` is the spacing.
    PollRearmed,
    /// Poll ended; `reason` is the cancel reason.
    PollEnded,

    // === Workers ===
    WorkerStarted,
    /// Worker stream closed or failed.
    WorkerLost,

    // === Graphs ===
    GraphStarted,
    GraphCompleted,
    /// Graph dropped because one of its nodes was lost with a worker.
    GraphAbandoned,

    // === Subscribers ===
    SubscriberPanicked,
    SubscriberOverflow,

    // === Shutdown ===
    ShutdownRequested,
    AllStoppedWithin,
    GraceExceeded,
}

impl NoticeKind {
    /// Notices about the subscriber layer itself.
    #[inline]
    pub fn is_subscriber_fault(&self) -> bool {
        matches!(
            self,
            NoticeKind::SubscriberPanicked | NoticeKind::SubscriberOverflow
        )
    }
}

/// Runtime notice with optional metadata.
#[derive(Clone, Debug)]
pub struct Notice {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    pub kind: NoticeKind,

    /// Event-type name, if applicable.
    pub event_id: Option<Arc<str>>,
    /// Entity key of the event, if any.
    pub key: Option<Arc<str>>,
    /// Correlation id of the event.
    pub uuid: Option<Uuid>,
    /// Descriptor progress flag at the time of the notice.
    pub flag: Option<DescriptorFlag>,
    pub worker: Option<WorkerId>,
    /// Human-readable reason (cancel reason, error, overflow details).
    pub reason: Option<Arc<str>>,
    /// Delay in milliseconds (poll spacing).
    pub delay_ms: Option<u64>,
    /// Remaining poll budget.
    pub remaining: Option<u32>,
}

impl Notice {
    /// Creates a new notice with current timestamp and next sequence number.
    pub fn new(kind: NoticeKind) -> Self {
        Self {
            seq: NOTICE_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            event_id: None,
            key: None,
            uuid: None,
            flag: None,
            worker: None,
            reason: None,
            delay_ms: None,
            remaining: None,
        }
    }

    /// Creates a notice describing `event` (id, key, uuid, worker and poll budget).
    pub fn for_event(kind: NoticeKind, event: &Event) -> Self {
        let mut n = Self::new(kind).with_event_id(event.id.as_str());
        n.key = event.key.as_deref().map(Arc::from);
        n.uuid = event.uuid();
        n.flag = event.flag();
        n.worker = event.worker_attached;
        n.remaining = event
            .descriptor
            .as_ref()
            .and_then(|d| d.poll.as_ref())
            .map(|p| p.max_times);
        n
    }

    #[inline]
    pub fn with_event_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.event_id = Some(id.into());
        self
    }

    #[inline]
    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Creates a subscriber overflow notice.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Notice::new(NoticeKind::SubscriberOverflow)
            .with_event_id(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic notice.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Notice::new(NoticeKind::SubscriberPanicked)
            .with_event_id(subscriber)
            .with_reason(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventDescriptor, PollDescriptor};

    #[test]
    fn sequence_is_monotonic() {
        let a = Notice::new(NoticeKind::EventPosted);
        let b = Notice::new(NoticeKind::EventPosted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn for_event_copies_poll_budget() {
        let mut ev = Event::new("sensor").with_key("dev-1").on_worker(WorkerId(3));
        ev.descriptor = Some(EventDescriptor::poll(
            None,
            PollDescriptor::new(Duration::from_secs(1), 2, Uuid::new_v4()),
        ));

        let n = Notice::for_event(NoticeKind::PollRearmed, &ev);
        assert_eq!(n.event_id.as_deref(), Some("sensor"));
        assert_eq!(n.key.as_deref(), Some("dev-1"));
        assert_eq!(n.worker, Some(WorkerId(3)));
        assert_eq!(n.remaining, Some(2));
        assert_eq!(n.uuid, ev.uuid());
        assert_eq!(n.flag, Some(DescriptorFlag::New));
    }
}
