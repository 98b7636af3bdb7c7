//! # Active poll and lifetime bookkeeping.
//!
//! The [`PollRegistry`] lives inside the distributor state. It tracks every
//! originating event that is being polled or guarded by a `lifetime`, keyed by
//! the originating event's correlation id.
//!
//! ## Rules
//! - A tracked id ends **once**: [`PollRegistry::finish`] returns the entry the
//!   first time and `None` afterwards. This is what makes
//!   `Handler::event_cancelled` fire at most once per originating event, even
//!   when a lifetime timer races the worker's own exhaustion report.
//! - A poll stays bound to the worker that received its first delivery.

use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

use crate::model::{Event, WorkerId};

/// What keeps an id alive in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tracking {
    /// Repeating delivery every `spacing`.
    Poll { spacing: Duration },
    /// One-shot expiry guard armed from `Event::lifetime`.
    Lifetime { after: Duration },
}

/// One tracked originating event.
#[derive(Debug, Clone)]
pub struct ActivePoll {
    pub worker: WorkerId,
    pub tracking: Tracking,
    /// Deliveries made so far (poll only).
    pub deliveries: u32,
    /// An expiry guard armed alongside a poll.
    pub lifetime: Option<Duration>,
    /// Latest copy of the tracked event; delivered back on cancellation.
    pub event: Event,
}

/// Registry of active polls and lifetime guards.
#[derive(Debug, Default)]
pub struct PollRegistry {
    active: HashMap<Uuid, ActivePoll>,
}

impl PollRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a poll for `origin` on `worker`.
    ///
    /// Re-polling an already polled origin rebinds it (the new spacing wins).
    /// An existing entry keeps its stored event and lifetime guard.
    pub fn start_poll(&mut self, origin: Uuid, worker: WorkerId, spacing: Duration, event: Event) {
        let (lifetime, event) = match self.active.remove(&origin) {
            Some(p) => {
                let after = match p.tracking {
                    Tracking::Lifetime { after } => Some(after),
                    Tracking::Poll { .. } => p.lifetime,
                };
                (after, p.event)
            }
            None => (None, event),
        };
        self.active.insert(
            origin,
            ActivePoll {
                worker,
                tracking: Tracking::Poll { spacing },
                deliveries: 0,
                lifetime,
                event,
            },
        );
    }

    /// Arms a lifetime guard for `origin`.
    ///
    /// If `origin` is already polled the guard is attached to the poll.
    pub fn start_lifetime(&mut self, origin: Uuid, worker: WorkerId, after: Duration, event: Event) {
        match self.active.get_mut(&origin) {
            Some(p) => p.lifetime = Some(after),
            None => {
                self.active.insert(
                    origin,
                    ActivePoll {
                        worker,
                        tracking: Tracking::Lifetime { after },
                        deliveries: 0,
                        lifetime: None,
                        event,
                    },
                );
            }
        }
    }

    /// Counts a delivery for a polled origin; returns the new total.
    pub fn record_delivery(&mut self, origin: Uuid) -> Option<u32> {
        let p = self.active.get_mut(&origin)?;
        p.deliveries += 1;
        Some(p.deliveries)
    }

    /// Whether `origin` is still polled (lifetime-only guards do not count).
    pub fn is_polling(&self, origin: Uuid) -> bool {
        matches!(
            self.active.get(&origin).map(|p| p.tracking),
            Some(Tracking::Poll { .. })
        )
    }

    pub fn is_active(&self, origin: Uuid) -> bool {
        self.active.contains_key(&origin)
    }

    pub fn get(&self, origin: Uuid) -> Option<&ActivePoll> {
        self.active.get(&origin)
    }

    /// Ends tracking for `origin`. Only the first call returns the entry.
    pub fn finish(&mut self, origin: Uuid) -> Option<ActivePoll> {
        self.active.remove(&origin)
    }

    /// Ends every entry bound to `worker`.
    pub fn evict_worker(&mut self, worker: WorkerId) -> Vec<(Uuid, ActivePoll)> {
        let ids: Vec<Uuid> = self
            .active
            .iter()
            .filter(|(_, p)| p.worker == worker)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.active.remove(&id).map(|p| (id, p)))
            .collect()
    }

    /// Number of active polls (lifetime guards excluded).
    pub fn polls_len(&self) -> usize {
        self.active
            .values()
            .filter(|p| matches!(p.tracking, Tracking::Poll { .. }))
            .count()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
