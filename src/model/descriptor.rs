//! # Scheduling metadata attached to an [`Event`](crate::Event).
//!
//! A descriptor is stamped by the distributor the first time an event is
//! scheduled. It travels with the event across the worker stream and tells the
//! worker loop what to do with a delivery:
//!
//! ```text
//! type      meaning on the worker side
//! ───────── ──────────────────────────────────────────────
//! Schedule  ack, then handler.handle_event()
//! Poll      handler.handle_poll_event(), re-arm or end
//! Stash     never delivered (parked in the sequencer)
//! Expired   handler.event_cancelled(reason)
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::WorkerId;

/// How a delivery must be treated by the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DescriptorType {
    /// One-shot dispatch to `handle_event`.
    Schedule,
    /// Repeating dispatch to `handle_poll_event`.
    Poll,
    /// Parked behind an in-flight event with the same binding key.
    Stash,
    /// Cancellation delivery; `reason` is set.
    Expired,
}

/// Progress flag of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DescriptorFlag {
    New,
    Ack,
    Complete,
}

/// Why an event was abandoned.
///
/// All cancellation paths converge on `Handler::event_cancelled` with one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    /// The handler stopped polling, or the event outlived its `lifetime`.
    Expired,
    /// The poll retry budget reached zero.
    MaxTimedOut,
    /// The worker executing the event disappeared.
    WorkerLost,
}

impl CancelReason {
    /// Stable wire label.
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Expired => "EXPIRED",
            CancelReason::MaxTimedOut => "MAX_TIMED_OUT",
            CancelReason::WorkerLost => "WORKER_LOST",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Poll parameters carried by `Poll` deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollDescriptor {
    /// Delay between re-deliveries, in milliseconds.
    pub spacing_ms: u64,
    /// Remaining retry budget.
    pub max_times: u32,
    /// Correlation id of the originating (non-poll) event.
    #[serde(rename = "ref")]
    pub origin: Uuid,
}

impl PollDescriptor {
    pub fn new(spacing: Duration, max_times: u32, origin: Uuid) -> Self {
        let spacing_ms = spacing.as_millis().min(u128::from(u64::MAX)) as u64;
        Self {
            spacing_ms,
            max_times,
            origin,
        }
    }

    #[inline]
    pub fn spacing(&self) -> Duration {
        Duration::from_millis(self.spacing_ms)
    }
}

/// Scheduling metadata for one scheduled event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    #[serde(rename = "type")]
    pub kind: DescriptorType,
    pub flag: DescriptorFlag,
    /// Worker that posted the event (`None` = the distributor itself).
    pub owner: Option<WorkerId>,
    /// Unique correlation id.
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll: Option<PollDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<CancelReason>,
}

impl EventDescriptor {
    /// Fresh `{SCHEDULE, NEW}` descriptor with a new correlation id.
    pub fn schedule(owner: Option<WorkerId>) -> Self {
        Self {
            kind: DescriptorType::Schedule,
            flag: DescriptorFlag::New,
            owner,
            uuid: Uuid::new_v4(),
            poll: None,
            reason: None,
        }
    }

    /// Fresh `{POLL, NEW}` descriptor referring back to `poll.origin`.
    pub fn poll(owner: Option<WorkerId>, poll: PollDescriptor) -> Self {
        Self {
            kind: DescriptorType::Poll,
            poll: Some(poll),
            ..Self::schedule(owner)
        }
    }

    /// The uuid the poll registry tracks this delivery under.
    ///
    /// Poll deliveries are tracked by their originating event, everything else by its own id.
    #[inline]
    pub fn tracking_id(&self) -> Uuid {
        self.poll.as_ref().map_or(self.uuid, |p| p.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_descriptor_tracks_origin() {
        let origin = Uuid::new_v4();
        let d = EventDescriptor::poll(None, PollDescriptor::new(Duration::from_secs(2), 3, origin));
        assert_eq!(d.kind, DescriptorType::Poll);
        assert_eq!(d.flag, DescriptorFlag::New);
        assert_ne!(d.uuid, origin);
        assert_eq!(d.tracking_id(), origin);
        assert_eq!(d.poll.as_ref().map(|p| p.spacing()), Some(Duration::from_secs(2)));
    }

    #[test]
    fn wire_labels_match_protocol_names() {
        let json = serde_json::to_string(&DescriptorType::Expired).unwrap();
        assert_eq!(json, "\"EXPIRED\"");
        let json = serde_json::to_string(&CancelReason::MaxTimedOut).unwrap();
        assert_eq!(json, "\"MAX_TIMED_OUT\"");
        assert_eq!(CancelReason::MaxTimedOut.to_string(), "MAX_TIMED_OUT");
    }
}
