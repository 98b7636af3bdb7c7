//! # Distributor: routes events to workers and owns all scheduling state.
//!
//! The distributor is the parent side of the runtime. It owns the sequencer,
//! the poll registry, in-flight deliveries and registered graphs behind one
//! mutex, and talks to each worker over a dedicated byte stream.
//!
//! ## Architecture
//! ```text
//! caller / handler Context
//!        │ post_event · poll_event · event_complete · post_event_graph
//!        ▼
//! ┌──────────────── Distributor ────────────────┐
//! │ State { sequencer, polls, graphs,           │──► Bus ──► SubscriberSet ──► LogWriter, ...
//! │         in_flight, links }                  │
//! └──────┬───────────────────────┬──────────────┘
//!        │ JSON lines            │ JSON lines
//!        ▼                       ▼
//!    Worker 0 (pool)  ...    Worker N-1 (pool)
//! ```
//!
//! ## Shutdown
//! ```text
//! shutdown() ─► ShutdownRequested ─► cancel workers ─► wait up to cfg.grace
//!                                      ├─ all joined ─► AllStoppedWithin
//!                                      └─ timeout    ─► GraceExceeded (stuck workers aborted)
//! ```
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use eventvisor::{Config, Context, Distributor, Event, HandlerError, HandlerFn};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dist = Distributor::builder(Config::default())
//!         .with_handler(
//!             "pool.resize",
//!             HandlerFn::arc("resize", |ctx: Context, ev: Event| async move {
//!                 ctx.event_complete(ev).await.map_err(|e| HandlerError::fail(e.to_string()))
//!             }),
//!         )
//!         .start();
//!
//!     dist.post_event(Event::new("pool.resize").with_key("pool-7").serialized()).await?;
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     dist.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod builder;
mod inner;
mod link;
mod signals;
mod state;


use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use uuid::Uuid;

pub use builder::DistributorBuilder;
pub use signals::wait_for_shutdown_signal;

use crate::config::Config;
use crate::error::RuntimeError;
use crate::graph::Graph;
use crate::handlers::Registry;
use crate::model::{Event, WorkerId};
use crate::notices::{Bus, Notice, NoticeKind};
use crate::subscribers::SubscriberSet;
use inner::Inner;

/// Handle to a running distributor.
pub struct Distributor {
    inner: Arc<Inner>,
    subs: Arc<SubscriberSet>,
}

impl Distributor {
    /// Starts building a distributor with `cfg`.
    pub fn builder(cfg: Config) -> DistributorBuilder {
        DistributorBuilder::new(cfg)
    }

    /// Posts an event for immediate dispatch.
    ///
    /// Serialized events wait behind an in-flight event with the same binding
    /// key. Returns the correlation id stamped on the event.
    ///
    /// # Panics
    /// If no handler is registered for the event.
    pub async fn post_event(&self, event: Event) -> Result<Uuid, RuntimeError> {
        self.inner.registry.require_handler(&event);
        let mut st = self.inner.state.lock().await;
        self.inner.post_locked(&mut st, event, None)
    }

    /// Starts a repeating delivery of `event`.
    ///
    /// The poll refers to `event`'s correlation id (stamped if missing) and stops
    /// after `max_times` deliveries, when the handler says so, or when that
    /// event completes. Returns the referred correlation id.
    ///
    /// `max_times` of `None` uses [`Config::default_max_times`].
    ///
    /// # Panics
    /// If no handler is registered, no spacing is given or registered, or
    /// `max_times` is `Some(0)`.
    pub async fn poll_event(
        &self,
        event: Event,
        spacing: Option<Duration>,
        max_times: Option<u32>,
    ) -> Result<Uuid, RuntimeError> {
        self.inner.registry.require_handler(&event);
        let spacing = self.inner.registry.resolve_spacing(&event.id, spacing);
        Registry::check_max_times(&event.id, max_times);
        let mut st = self.inner.state.lock().await;
        self.inner.poll_locked(&mut st, event, spacing, max_times, None)
    }

    /// Marks `event` finished: frees its key, stops its polls and advances its graph.
    pub async fn event_complete(&self, event: Event) {
        let mut st = self.inner.state.lock().await;
        self.inner.complete_locked(&mut st, event);
    }

    /// Alias of [`Distributor::event_complete`].
    pub async fn event_done(&self, event: Event) {
        self.event_complete(event).await;
    }

    /// Registers a workflow graph and schedules its ready nodes.
    ///
    /// # Panics
    /// If any node has no registered handler.
    pub async fn post_event_graph(&self, graph: Graph) -> Result<Uuid, RuntimeError> {
        for node in graph.nodes() {
            self.inner.registry.require_handler(&node.event);
        }
        let mut st = self.inner.state.lock().await;
        self.inner.post_graph_locked(&mut st, graph, None)
    }

    /// Kills a worker as if it crashed. Returns `false` if it was not alive.
    ///
    /// Loss handling runs once its stream closes.
    pub async fn kill_worker(&self, id: WorkerId) -> bool {
        let mut st = self.inner.state.lock().await;
        let Some(link) = st.links.get_mut(&id) else {
            return false;
        };
        link.token.cancel();
        if let Some(join) = link.join.take() {
            join.abort();
        }
        true
    }

    /// Stops all workers, waiting up to `cfg.grace`.
    ///
    /// Later posts fail with [`RuntimeError::Closed`]. A zero grace aborts the
    /// workers without waiting.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        let mut joins = {
            let mut st = self.inner.state.lock().await;
            if st.closed {
                return Ok(());
            }
            st.closed = true;
            st.links
                .iter_mut()
                .filter_map(|(id, l)| l.join.take().map(|j| (*id, j)))
                .collect::<Vec<_>>()
        };

        self.inner.publish(Notice::new(NoticeKind::ShutdownRequested));
        self.inner.token.cancel();

        let grace = self.inner.cfg.grace;
        if grace.is_zero() {
            for (_, j) in &joins {
                j.abort();
            }
            self.inner.publish(Notice::new(NoticeKind::AllStoppedWithin));
            return Ok(());
        }

        let done = async {
            for (_, j) in joins.iter_mut() {
                let _ = j.await;
            }
        };
        let waited = tokio::time::timeout(grace, done).await;
        match waited {
            Ok(()) => {
                self.inner.publish(Notice::new(NoticeKind::AllStoppedWithin));
                tracing::info!("all workers stopped within grace");
                Ok(())
            }
            Err(_) => {
                let stuck: Vec<WorkerId> = joins
                    .iter()
                    .filter(|(_, j)| !j.is_finished())
                    .map(|(id, _)| *id)
                    .collect();
                for (_, j) in &joins {
                    j.abort();
                }
                self.inner.publish(Notice::new(NoticeKind::GraceExceeded));
                tracing::warn!(?grace, ?stuck, "shutdown grace exceeded");
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    /// Runs until SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then shuts down.
    pub async fn serve_until_signal(&self) -> Result<(), RuntimeError> {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::warn!(error = %e, "signal registration failed; shutting down");
        }
        self.shutdown().await
    }

    /// Notice bus; subscribe to observe the runtime.
    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.inner.bus.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Number of attached subscribers.
    pub fn subscribers(&self) -> usize {
        self.subs.len()
    }

    /// Workers whose stream is still open, in id order.
    pub async fn live_workers(&self) -> Vec<WorkerId> {
        self.inner.state.lock().await.live_workers()
    }

    /// Events waiting behind an in-flight event with the same key.
    pub async fn queued_len(&self) -> usize {
        self.inner.state.lock().await.sequencer.queued_len()
    }

    pub async fn active_polls(&self) -> usize {
        self.inner.state.lock().await.polls.polls_len()
    }

    pub async fn graph_count(&self) -> usize {
        self.inner.state.lock().await.graphs.len()
    }

    /// `SCHEDULE` deliveries not completed yet.
    pub async fn in_flight_len(&self) -> usize {
        self.inner.state.lock().await.in_flight.len()
    }
}
