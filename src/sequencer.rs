//! # Per-key event sequencer.
//!
//! Serialized events are grouped into **entries** identified by
//! `(worker, binding key)`. At any given time **one** event per entry may be in
//! flight; later arrivals for the same entry wait behind it in FIFO order.
//!
//! ```text
//! add(e1) ─► no entry        ─► {in_use: true,  queue: [e1]}       → dispatch now
//! add(e2) ─► entry exists    ─► {in_use: true,  queue: [e1, e2]}   → wait
//! remove(e1)                 ─► {in_use: false, queue: [e2]}
//! get()   ─► first idle head ─► {in_use: true,  queue: [e2]}       → dispatch e2
//! remove(e2)                 ─► entry dropped
//! ```
//!
//! ## Rules
//! - Entries iterate in `(worker, key)` order, so `get()` is deterministic.
//! - Empty entries are dropped; the next `add` for that key dispatches immediately.
//! - The sequencer is owned by the distributor and mutated under its state lock only.

use std::collections::{BTreeMap, VecDeque};

use uuid::Uuid;

use crate::model::{DescriptorType, Event, WorkerId};

/// State of one `(worker, binding key)` entry.
#[derive(Debug, Default)]
struct SequencerEntry {
    /// Head of `queue` is currently dispatched.
    in_use: bool,
    /// Events in arrival order; the head is the in-flight one when `in_use`.
    queue: VecDeque<Event>,
}

type EntryKey = (WorkerId, String);

/// FIFO gate enforcing mutual exclusion per `(worker, binding key)`.
#[derive(Debug, Default)]
pub struct EventSequencer {
    entries: BTreeMap<EntryKey, SequencerEntry>,
}

impl EventSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry_key(event: &Event) -> EntryKey {
        (
            event.worker_attached.unwrap_or(WorkerId(0)),
            event.binding().to_owned(),
        )
    }

    /// Registers `event`; returns `true` when it was queued behind another event.
    ///
    /// A `false` return means the caller owns the slot and must dispatch the event now.
    pub fn add(&mut self, mut event: Event) -> bool {
        let key = Self::entry_key(&event);
        match self.entries.get_mut(&key) {
            Some(entry) => {
                event.set_kind(DescriptorType::Stash);
                entry.queue.push_back(event);
                true
            }
            None => {
                let mut entry = SequencerEntry {
                    in_use: true,
                    queue: VecDeque::with_capacity(1),
                };
                entry.queue.push_back(event);
                self.entries.insert(key, entry);
                false
            }
        }
    }

    /// Pops the next runnable head (an idle entry with waiting events) and marks it in use.
    pub fn get(&mut self) -> Option<Event> {
        let entry = self
            .entries
            .values_mut()
            .find(|e| !e.in_use && !e.queue.is_empty())?;
        entry.in_use = true;
        let mut event = entry.queue.front()?.clone();
        event.set_kind(DescriptorType::Schedule);
        Some(event)
    }

    /// Releases the slot held by `event` (matched by correlation id).
    ///
    /// Returns `false` if the event was not tracked.
    pub fn remove(&mut self, event: &Event) -> bool {
        let key = Self::entry_key(event);
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };

        let uuid = event.uuid();
        let Some(pos) = entry.queue.iter().position(|e| e.uuid() == uuid) else {
            return false;
        };
        entry.queue.remove(pos);
        if pos == 0 {
            entry.in_use = false;
        }
        if entry.queue.is_empty() {
            self.entries.remove(&key);
        }
        true
    }

    /// Drops every entry of `worker`, returning events that were still waiting.
    ///
    /// In-use heads are not returned: they were already dispatched.
    pub fn evict_worker(&mut self, worker: WorkerId) -> Vec<Event> {
        let keys: Vec<EntryKey> = self
            .entries
            .range((worker, String::new())..)
            .take_while(|((w, _), _)| *w == worker)
            .map(|(k, _)| k.clone())
            .collect();

        let mut waiting = Vec::new();
        for key in keys {
            if let Some(mut entry) = self.entries.remove(&key) {
                if entry.in_use {
                    entry.queue.pop_front();
                }
                waiting.extend(entry.queue);
            }
        }
        waiting
    }

    /// Whether `uuid` is waiting (not in flight) in any entry.
    pub fn is_waiting(&self, uuid: Uuid) -> bool {
        self.entries.values().any(|e| {
            e.queue
                .iter()
                .skip(usize::from(e.in_use))
                .any(|ev| ev.uuid() == Some(uuid))
        })
    }

    /// Number of events waiting behind an in-flight one.
    pub fn queued_len(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.queue.len() - usize::from(e.in_use))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(name: &str, binding: &str, worker: usize) -> Event {
        let mut e = Event::new(name)
            .with_binding_key(binding)
            .serialized()
            .on_worker(WorkerId(worker));
        e.stamp(None);
        e
    }

    #[test]
    fn first_add_owns_the_slot() {
        let mut seq = EventSequencer::new();
        assert!(!seq.add(ev("e1", "pool", 0)));
        assert!(seq.add(ev("e2", "pool", 0)));
        assert_eq!(seq.queued_len(), 1);
    }

    #[test]
    fn queued_event_is_stashed() {
        let mut seq = EventSequencer::new();
        let e1 = ev("e1", "pool", 0);
        let e2 = ev("e2", "pool", 0);
        seq.add(e1.clone());
        seq.add(e2.clone());
        assert!(seq.is_waiting(e2.uuid().unwrap()));
        assert!(!seq.is_waiting(e1.uuid().unwrap()));

        seq.remove(&e1);
        let next = seq.get().unwrap();
        assert_eq!(next.kind(), Some(DescriptorType::Schedule));
    }

    #[test]
    fn fifo_per_key() {
        let mut seq = EventSequencer::new();
        let e1 = ev("e1", "pool", 0);
        let e2 = ev("e2", "pool", 0);
        let e3 = ev("e3", "pool", 0);
        seq.add(e1.clone());
        seq.add(e2.clone());
        seq.add(e3.clone());

        // Head still in use: nothing runnable.
        assert!(seq.get().is_none());

        assert!(seq.remove(&e1));
        let next = seq.get().unwrap();
        assert_eq!(next.id, "e2");
        assert!(seq.get().is_none());

        assert!(seq.remove(&next));
        assert_eq!(seq.get().unwrap().id, "e3");
        assert!(seq.remove(&e3));
        assert!(seq.is_empty());
    }

    #[test]
    fn different_keys_do_not_block() {
        let mut seq = EventSequencer::new();
        assert!(!seq.add(ev("a", "k1", 0)));
        assert!(!seq.add(ev("b", "k2", 0)));
        // Same key on another worker is a different entry.
        assert!(!seq.add(ev("c", "k1", 1)));
    }

    #[test]
    fn empty_entry_is_dropped() {
        let mut seq = EventSequencer::new();
        let e1 = ev("e1", "pool", 0);
        seq.add(e1.clone());
        seq.remove(&e1);
        assert!(seq.is_empty());
        assert!(!seq.add(ev("e2", "pool", 0)));
    }

    #[test]
    fn get_is_deterministic_across_keys() {
        let mut seq = EventSequencer::new();
        let heads: Vec<Event> = ["b", "a"]
            .iter()
            .map(|k| ev(&format!("{k}1"), k, 0))
            .collect();
        for h in &heads {
            seq.add(h.clone());
        }
        seq.add(ev("b2", "b", 0));
        seq.add(ev("a2", "a", 0));
        for h in &heads {
            seq.remove(h);
        }
        // Keys iterate in order: "a" before "b".
        assert_eq!(seq.get().unwrap().id, "a2");
        assert_eq!(seq.get().unwrap().id, "b2");
    }

    #[test]
    fn remove_unknown_is_noop() {
        let mut seq = EventSequencer::new();
        assert!(!seq.remove(&ev("x", "k", 0)));
    }

    #[test]
    fn evict_worker_returns_waiting_only() {
        let mut seq = EventSequencer::new();
        seq.add(ev("a1", "k", 1));
        seq.add(ev("a2", "k", 1));
        seq.add(ev("b1", "j", 1));
        seq.add(ev("c1", "k", 2));

        let waiting = seq.evict_worker(WorkerId(1));
        let ids: Vec<&str> = waiting.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a2"]);
        assert!(!seq.is_empty());
        assert!(seq.add(ev("c2", "k", 2)));
    }
}
