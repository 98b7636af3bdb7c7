//! # Distributor core: every state transition, run under the state lock.
//!
//! ```text
//! post ──► stamp ─► route ─► lifetime guard? ─► serialized? ─► sequencer.add
//!                                                   │ queued: stop (drain delivers later)
//!                                                   ▼
//!                                               dispatch ─► in_flight ─► Deliver(SCHEDULE)
//!
//! Complete ─► finish polls/guards ─► release slot ─► executor hook ─► drain
//! Failed   ─► finish polls/guards ─► release slot ─► abandon graph ─► drain
//! Rearm    ─► sleep(spacing) ─► still polling? ─► Deliver(POLL)
//! PollEnded / lifetime / lost worker ─► polls.finish (first wins) ─► Deliver(EXPIRED)
//!   (the key stays taken until the cancelled event is completed or failed)
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::state::{InFlight, State};
use crate::config::Config;
use crate::error::RuntimeError;
use crate::graph::{Executor, Graph};
use crate::handlers::Registry;
use crate::model::{
    CancelReason, DescriptorFlag, DescriptorType, Event, EventDescriptor, PollDescriptor,
    WorkerId,
};
use crate::notices::{Bus, Notice, NoticeKind};
use crate::poll::Tracking;
use crate::wire::Frame;

pub(crate) struct Inner {
    pub cfg: Config,
    pub registry: Arc<Registry>,
    pub bus: Bus,
    pub token: CancellationToken,
    pub state: Mutex<State>,
}

impl Inner {
    #[inline]
    pub fn publish(&self, notice: Notice) {
        self.bus.publish(notice);
    }

    /// Stamps, routes and dispatches (or queues) a new event.
    pub fn post_locked(
        self: &Arc<Self>,
        st: &mut State,
        mut event: Event,
        owner: Option<WorkerId>,
    ) -> Result<Uuid, RuntimeError> {
        if st.closed {
            return Err(RuntimeError::Closed);
        }
        let uuid = event.stamp(owner);
        let worker = st.route(&event).ok_or(RuntimeError::NoWorkers)?;
        event.worker_attached = Some(worker);
        self.publish(Notice::for_event(NoticeKind::EventPosted, &event));

        if let Some(after) = event.lifetime_duration() {
            st.polls.start_lifetime(uuid, worker, after, event.clone());
            self.arm_lifetime(uuid, after);
        }

        if event.serialize && st.sequencer.add(event.clone()) {
            tracing::debug!(event = %event.id, binding = event.binding(), %worker, "queued behind same key");
            self.publish(Notice::for_event(NoticeKind::EventQueued, &event));
            return Ok(uuid);
        }
        self.dispatch_locked(st, event);
        Ok(uuid)
    }

    /// Sends a `SCHEDULE` delivery and records it as in flight.
    fn dispatch_locked(&self, st: &mut State, event: Event) {
        let (Some(uuid), Some(worker)) = (event.uuid(), event.worker_attached) else {
            tracing::error!(event = %event.id, "dispatch of an unrouted event");
            return;
        };
        st.in_flight.insert(
            uuid,
            InFlight {
                event: event.clone(),
                worker,
            },
        );
        let notice = Notice::for_event(NoticeKind::EventDispatched, &event);
        if st.send(worker, Frame::Deliver { event }) {
            self.publish(notice);
        } else {
            tracing::warn!(%worker, %uuid, "link closed; delivery left for loss handling");
        }
    }

    /// Dispatches every queued event whose key became free.
    fn drain_locked(&self, st: &mut State) {
        while let Some(event) = st.sequencer.get() {
            self.dispatch_locked(st, event);
        }
    }

    /// Starts a poll of `event` on the worker owning it.
    pub fn poll_locked(
        self: &Arc<Self>,
        st: &mut State,
        mut event: Event,
        spacing: Duration,
        max_times: Option<u32>,
        owner: Option<WorkerId>,
    ) -> Result<Uuid, RuntimeError> {
        if st.closed {
            return Err(RuntimeError::Closed);
        }
        let origin = event.ensure_stamped(owner);
        let worker = st.route(&event).ok_or(RuntimeError::NoWorkers)?;
        // Poll frames from a stream peer are not validated on the sending side.
        let max_times = max_times.unwrap_or(self.cfg.default_max_times).max(1);

        event.descriptor = Some(EventDescriptor::poll(
            owner,
            PollDescriptor::new(spacing, max_times, origin),
        ));
        event.worker_attached = Some(worker);

        st.polls.start_poll(origin, worker, spacing, event.clone());
        st.polls.record_delivery(origin);
        let notice = Notice::for_event(NoticeKind::EventDispatched, &event).with_delay(spacing);
        if st.send(worker, Frame::Deliver { event }) {
            self.publish(notice);
        }
        Ok(origin)
    }

    /// Registers a graph and posts its initial frontier.
    pub fn post_graph_locked(
        self: &Arc<Self>,
        st: &mut State,
        mut graph: Graph,
        owner: Option<WorkerId>,
    ) -> Result<Uuid, RuntimeError> {
        if st.closed {
            return Err(RuntimeError::Closed);
        }
        if st.links.is_empty() {
            return Err(RuntimeError::NoWorkers);
        }
        let id = graph.id;
        let ready = Executor::start(&mut graph);
        let root = graph.root.to_string();
        st.graphs.insert(id, graph);
        self.publish(Notice::new(NoticeKind::GraphStarted).with_event_id(root));

        for event in ready {
            if let Err(e) = self.post_locked(st, event, owner) {
                st.graphs.remove(&id);
                return Err(e);
            }
        }
        Ok(id)
    }

    /// Handler finished with `event`.
    pub fn complete_locked(self: &Arc<Self>, st: &mut State, mut event: Event) {
        if event.descriptor.is_none() {
            tracing::warn!(event = %event.id, "completion of an event that was never scheduled");
            return;
        }
        event.set_flag(DescriptorFlag::Complete);
        self.finish_tracking(st, &event);
        self.release_locked(st, &event);
        self.publish(Notice::for_event(NoticeKind::EventCompleted, &event));

        if let Some(gid) = event.graph {
            self.advance_graph(st, gid, &event);
        }
        self.drain_locked(st);
    }

    /// Handler errored or panicked: no retry, the slot is released.
    pub fn failed_locked(&self, st: &mut State, event: Event, reason: String) {
        self.publish(Notice::for_event(NoticeKind::EventFailed, &event).with_reason(reason));
        self.finish_tracking(st, &event);
        self.release_locked(st, &event);
        if let Some(gid) = event.graph {
            self.abandon_graph(st, gid, "node failed");
        }
        self.drain_locked(st);
    }

    /// Cancels `event` once by delivering `EXPIRED` with `reason`.
    ///
    /// Callers must have won `polls.finish` (or otherwise own the cancellation).
    /// A started event keeps its sequencer slot until the handler completes or
    /// fails it; slots of a lost worker are cleared by eviction instead.
    fn cancel_locked(
        &self,
        st: &mut State,
        mut event: Event,
        reason: CancelReason,
        prefer: Option<WorkerId>,
    ) {
        if let Some(gid) = event.graph {
            self.abandon_graph(st, gid, reason.as_str());
        }

        event.ensure_stamped(None);
        event.set_kind(DescriptorType::Expired);
        if let Some(d) = event.descriptor.as_mut() {
            d.reason = Some(reason);
        }

        match st.live_or_next(prefer.or(event.worker_attached)) {
            Some(worker) => {
                event.worker_attached = Some(worker);
                self.publish(
                    Notice::for_event(NoticeKind::EventCancelled, &event).with_reason(reason.as_str()),
                );
                st.send(worker, Frame::Deliver { event });
            }
            None => {
                tracing::warn!(event = %event.id, %reason, "no live worker to deliver cancellation");
            }
        }
        self.drain_locked(st);
    }

    /// Stops polls and lifetime guards tied to `event`, silently.
    fn finish_tracking(&self, st: &mut State, event: &Event) {
        if let Some(d) = &event.descriptor {
            st.polls.finish(d.uuid);
            st.polls.finish(d.tracking_id());
        }
    }

    /// Drops the in-flight records of `event` and of the event it polls for,
    /// releasing their sequencer slots.
    fn release_locked(&self, st: &mut State, event: &Event) {
        let Some(d) = &event.descriptor else {
            return;
        };
        for id in [d.uuid, d.tracking_id()] {
            if let Some(f) = st.in_flight.remove(&id) {
                if f.event.serialize {
                    st.sequencer.remove(&f.event);
                }
            }
        }
    }

    fn advance_graph(self: &Arc<Self>, st: &mut State, gid: Uuid, event: &Event) {
        let Some(graph) = st.graphs.get_mut(&gid) else {
            return;
        };
        let done = Executor::complete(graph, &event.event_key(), event.data.clone());
        if done.finished {
            if let Some(g) = st.graphs.remove(&gid) {
                self.publish(Notice::new(NoticeKind::GraphCompleted).with_event_id(g.root.to_string()));
            }
        }
        for next in done.ready {
            if let Err(e) = self.post_locked(st, next, None) {
                tracing::warn!(graph = %gid, error = %e, "could not schedule graph node");
                self.abandon_graph(st, gid, e.as_label());
                return;
            }
        }
    }

    fn abandon_graph(&self, st: &mut State, gid: Uuid, reason: &str) {
        if let Some(g) = st.graphs.remove(&gid) {
            tracing::warn!(graph = %gid, root = %g.root, reason, "graph abandoned");
            self.publish(
                Notice::new(NoticeKind::GraphAbandoned)
                    .with_event_id(g.root.to_string())
                    .with_reason(reason.to_string()),
            );
        }
    }

    /// One-shot expiry timer for a posted event.
    fn arm_lifetime(self: &Arc<Self>, uuid: Uuid, after: Duration) {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = me.token.cancelled() => return,
                _ = tokio::time::sleep(after) => {}
            }
            let mut st = me.state.lock().await;
            let Some(entry) = st.polls.finish(uuid) else {
                return;
            };
            tracing::debug!(%uuid, ?after, "lifetime elapsed");
            if st.sequencer.is_waiting(uuid) {
                st.sequencer.remove(&entry.event);
            }
            me.cancel_locked(&mut st, entry.event, CancelReason::Expired, Some(entry.worker));
        });
    }

    /// Redelivers a poll to its worker after the spacing, unless it ended meanwhile.
    fn rearm(self: &Arc<Self>, event: Event) {
        let Some(p) = event.descriptor.as_ref().and_then(|d| d.poll.clone()) else {
            tracing::warn!(event = %event.id, "rearm without poll descriptor");
            return;
        };
        let origin = p.origin;
        let spacing = p.spacing();
        self.publish(Notice::for_event(NoticeKind::PollRearmed, &event).with_delay(spacing));

        let me = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = me.token.cancelled() => return,
                _ = tokio::time::sleep(spacing) => {}
            }
            let mut st = me.state.lock().await;
            if !st.polls.is_polling(origin) {
                return;
            }
            let Some(worker) = st.polls.get(origin).map(|p| p.worker) else {
                return;
            };
            st.polls.record_delivery(origin);
            let mut event = event;
            event.worker_attached = Some(worker);
            st.send(worker, Frame::Deliver { event });
        });
    }

    /// Applies one frame received from `worker`.
    pub async fn on_frame(self: &Arc<Self>, worker: WorkerId, frame: Frame) {
        let mut st = self.state.lock().await;
        match frame {
            Frame::Ack { uuid } => {
                if let Some(f) = st.in_flight.get_mut(&uuid) {
                    f.event.set_flag(DescriptorFlag::Ack);
                    let n = Notice::for_event(NoticeKind::EventAcked, &f.event);
                    self.publish(n);
                }
            }
            Frame::Post { event } => {
                if let Err(e) = self.post_locked(&mut st, event, Some(worker)) {
                    tracing::warn!(%worker, error = %e, "post from worker rejected");
                }
            }
            Frame::Poll {
                event,
                spacing_ms,
                max_times,
            } => {
                let spacing = Duration::from_millis(spacing_ms.max(1));
                if let Err(e) = self.poll_locked(&mut st, event, spacing, max_times, Some(worker)) {
                    tracing::warn!(%worker, error = %e, "poll from worker rejected");
                }
            }
            Frame::PostGraph { graph } => {
                if let Err(e) = self.post_graph_locked(&mut st, graph, Some(worker)) {
                    tracing::warn!(%worker, error = %e, "graph from worker rejected");
                }
            }
            Frame::Complete { event } => self.complete_locked(&mut st, event),
            Frame::Failed { event, reason } => self.failed_locked(&mut st, event, reason),
            Frame::Rearm { event } => {
                let polling = event
                    .descriptor
                    .as_ref()
                    .is_some_and(|d| st.polls.is_polling(d.tracking_id()));
                if polling {
                    self.rearm(event);
                }
            }
            Frame::PollEnded { event, reason } => {
                let Some(origin) = event.descriptor.as_ref().map(EventDescriptor::tracking_id) else {
                    return;
                };
                if st.polls.finish(origin).is_some() {
                    self.publish(
                        Notice::for_event(NoticeKind::PollEnded, &event).with_reason(reason.as_str()),
                    );
                    self.cancel_locked(&mut st, event, reason, Some(worker));
                }
            }
            Frame::Deliver { .. } => {
                tracing::warn!(%worker, "worker sent a deliver frame; ignored");
            }
        }
    }

    /// Handles a worker whose stream ended.
    ///
    /// Waiting events move to survivors; in-flight events and polls of the lost
    /// worker are cancelled with `WORKER_LOST`.
    pub async fn worker_lost(self: &Arc<Self>, worker: WorkerId, reason: String) {
        let mut st = self.state.lock().await;
        let Some(mut link) = st.links.remove(&worker) else {
            return;
        };
        link.token.cancel();
        if let Some(join) = link.join.take() {
            join.abort();
        }
        if st.closed {
            tracing::debug!(%worker, "worker stopped");
            return;
        }

        tracing::warn!(%worker, %reason, "worker lost");
        self.publish(
            Notice::new(NoticeKind::WorkerLost)
                .with_worker(worker)
                .with_reason(reason),
        );

        let lost = st.take_in_flight_of(worker);
        let polls = st.polls.evict_worker(worker);
        let waiting = st.sequencer.evict_worker(worker);

        let mut handled: HashSet<Uuid> = HashSet::new();
        for mut event in waiting {
            let Some(uuid) = event.uuid() else { continue };
            handled.insert(uuid);
            event.worker_attached = None;
            event.set_kind(DescriptorType::Schedule);
            let guard = polls.iter().find_map(|(id, p)| match p.tracking {
                Tracking::Lifetime { after } if *id == uuid => Some(after),
                _ => None,
            });
            self.reroute_locked(&mut st, event, guard);
        }

        for f in lost {
            if let Some(uuid) = f.event.uuid() {
                handled.insert(uuid);
            }
            self.cancel_locked(&mut st, f.event, CancelReason::WorkerLost, None);
        }

        for (origin, p) in polls {
            if handled.insert(origin) {
                self.cancel_locked(&mut st, p.event, CancelReason::WorkerLost, None);
            }
        }
        self.drain_locked(&mut st);
    }

    /// Moves a never-started event to a surviving worker, keeping its stamp.
    fn reroute_locked(&self, st: &mut State, mut event: Event, guard: Option<Duration>) {
        let Some(worker) = st.route(&event) else {
            tracing::warn!(event = %event.id, "no live worker left; event dropped");
            return;
        };
        event.worker_attached = Some(worker);
        if let (Some(uuid), Some(after)) = (event.uuid(), guard) {
            // The original timer is still running and will find this entry.
            st.polls.start_lifetime(uuid, worker, after, event.clone());
        }
        if event.serialize && st.sequencer.add(event.clone()) {
            self.publish(Notice::for_event(NoticeKind::EventQueued, &event));
            return;
        }
        self.dispatch_locked(st, event);
    }
}
