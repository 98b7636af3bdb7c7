//! # Distributor state guarded by one mutex.
//!
//! Everything the distributor knows lives here: the sequencer, active polls,
//! registered graphs, deliveries in flight and the live worker links.
//! Frames to workers go through unbounded link queues, so sending while the
//! lock is held never waits on a worker.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::WireError;
use crate::graph::Graph;
use crate::model::{Event, WorkerId};
use crate::poll::PollRegistry;
use crate::sequencer::EventSequencer;
use crate::wire::Frame;

/// A `SCHEDULE` delivery that has not completed yet.
///
/// The event's descriptor flag moves `NEW` → `ACK` when the worker acknowledges it.
#[derive(Debug, Clone)]
pub(crate) struct InFlight {
    pub event: Event,
    pub worker: WorkerId,
}

/// Distributor end of one worker stream.
pub(crate) struct WorkerLink {
    pub tx: mpsc::UnboundedSender<Frame>,
    pub token: CancellationToken,
    /// Worker task; taken by shutdown or `kill_worker`.
    pub join: Option<JoinHandle<Result<(), WireError>>>,
}

#[derive(Default)]
pub(crate) struct State {
    pub sequencer: EventSequencer,
    pub polls: PollRegistry,
    pub graphs: HashMap<Uuid, Graph>,
    pub in_flight: HashMap<Uuid, InFlight>,
    pub links: BTreeMap<WorkerId, WorkerLink>,
    pub closed: bool,
    rr: usize,
}

impl State {
    pub fn with_links(links: BTreeMap<WorkerId, WorkerLink>) -> Self {
        Self {
            links,
            ..Self::default()
        }
    }

    /// Picks the worker for a new event.
    ///
    /// Pinned events keep their worker while it is alive. Serialized events hash
    /// their binding key over the live workers so one key always lands on one
    /// worker; the rest go round-robin.
    pub fn route(&mut self, event: &Event) -> Option<WorkerId> {
        if let Some(w) = event.worker_attached.filter(|w| self.links.contains_key(w)) {
            return Some(w);
        }
        if self.links.is_empty() {
            return None;
        }
        if event.serialize {
            let mut h = DefaultHasher::new();
            event.binding().hash(&mut h);
            let idx = (h.finish() % self.links.len() as u64) as usize;
            return self.links.keys().nth(idx).copied();
        }
        self.next_live()
    }

    /// `prefer` when alive, otherwise the next worker round-robin.
    pub fn live_or_next(&mut self, prefer: Option<WorkerId>) -> Option<WorkerId> {
        match prefer.filter(|w| self.links.contains_key(w)) {
            Some(w) => Some(w),
            None => self.next_live(),
        }
    }

    fn next_live(&mut self) -> Option<WorkerId> {
        if self.links.is_empty() {
            return None;
        }
        let idx = self.rr % self.links.len();
        self.rr = self.rr.wrapping_add(1);
        self.links.keys().nth(idx).copied()
    }

    /// Queues `frame` for `worker`; `false` if the link is gone.
    pub fn send(&self, worker: WorkerId, frame: Frame) -> bool {
        match self.links.get(&worker) {
            Some(link) => link.tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn live_workers(&self) -> Vec<WorkerId> {
        self.links.keys().copied().collect()
    }

    /// Removes and returns every delivery in flight on `worker`.
    pub fn take_in_flight_of(&mut self, worker: WorkerId) -> Vec<InFlight> {
        let ids: Vec<Uuid> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.worker == worker)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.in_flight.remove(&id))
            .collect()
    }
}
