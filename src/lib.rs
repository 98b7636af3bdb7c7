//! # eventvisor
//!
//! **Eventvisor** is a multi-worker event orchestration core for tokio.
//!
//! Callers post named events with opaque JSON payloads. A distributor routes
//! them to a fixed set of workers, guaranteeing that events sharing a binding
//! key never run concurrently and run in arrival order. Events can be polled a
//! bounded number of times, guarded by a lifetime, and composed into
//! dependency graphs whose nodes run only after their children complete.
//!
//! ## Architecture
//! ```text
//!  post_event / poll_event / post_event_graph / event_complete
//!                              │
//!                              ▼
//! ┌────────────────────────────────────────────────────────────────┐
//! │  Distributor                                                   │
//! │  - EventSequencer (per (worker, key) FIFO, one in flight)      │
//! │  - PollRegistry   (active polls and lifetime guards)           │
//! │  - Graphs + Executor (ready nodes are posted as plain events)  │
//! │  - in-flight table, worker links                               │
//! └──────┬──────────────────────┬───────────────────────┬──────────┘
//!        │ JSON lines           │ JSON lines            │
//!        ▼                      ▼                       │ publish(Notice)
//!   ┌──────────┐           ┌──────────┐                 ▼
//!   │ Worker 0 │    ...    │ Worker N │        Bus ──► SubscriberSet
//!   │  pool    │           │  pool    │                 ├─► LogWriter
//!   │ Handler  │           │ Handler  │                 └─► custom
//!   └──────────┘           └──────────┘
//! ```
//!
//! ### Event lifecycle
//! ```text
//! post ─► stamp {SCHEDULE, NEW, uuid} ─► route ─► (queued as STASH) ─► Deliver
//!   worker: Ack ─► handle_event ─► ctx.event_complete ─► next same-key event
//!
//! poll ─► Deliver{POLL} ─► handle_poll_event ─► Rearm after spacing
//!                                             └► PollEnded ─► Deliver{EXPIRED} ─► event_cancelled
//! ```
//!
//! ## Features
//! | Area          | Description                                               | Key types / traits                        |
//! |---------------|-----------------------------------------------------------|-------------------------------------------|
//! | **Events**    | Events, descriptors and identities.                       | [`Event`], [`EventDescriptor`]            |
//! | **Handlers**  | User callbacks and their channel back to the distributor. | [`Handler`], [`HandlerFn`], [`Context`]   |
//! | **Runtime**   | Routing, serialization, polling, shutdown.                | [`Distributor`], [`Worker`]               |
//! | **Graphs**    | Dependency workflows.                                     | [`Graph`], [`Executor`]                   |
//! | **Notices**   | Runtime observability.                                    | [`Notice`], [`Subscribe`], [`LogWriter`]  |
//! | **Errors**    | Typed errors with stable labels.                          | [`RuntimeError`], [`HandlerError`]        |
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use eventvisor::{Config, Context, Distributor, Event, Graph, HandlerError, HandlerFn, Registry};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let done = HandlerFn::arc("done", |ctx: Context, ev: Event| async move {
//!         ctx.event_done(ev).await.map_err(|e| HandlerError::fail(e.to_string()))
//!     });
//!
//!     let mut registry = Registry::new();
//!     registry.register_events(
//!         [("image.pull", done.clone()), ("svc.deploy", done)],
//!         [("image.pull", Duration::from_secs(1))],
//!     );
//!
//!     let dist = Distributor::builder(Config::default())
//!         .with_registry(registry)
//!         .start();
//!
//!     let deploy = Event::new("svc.deploy").with_key("svc-1");
//!     let mut graph = Graph::new(deploy.clone());
//!     graph.add_node(Event::new("image.pull").with_key("nginx"), &deploy)?;
//!     dist.post_event_graph(graph).await?;
//!
//!     tokio::time::sleep(Duration::from_millis(100)).await;
//!     dist.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod config;
mod distributor;
mod error;
mod graph;
mod handlers;
mod model;
mod notices;
mod poll;
mod sequencer;
mod subscribers;
mod wire;
mod worker;

// ---- Public re-exports ----

pub use config::Config;
pub use distributor::{Distributor, DistributorBuilder, wait_for_shutdown_signal};
pub use error::{GraphError, HandlerError, RuntimeError, WireError};
pub use graph::{Completion, Executor, Graph, GraphNode};
pub use handlers::{Context, Handler, HandlerFn, HandlerRef, PollOutcome, Registry};
pub use model::{
    CancelReason, DescriptorFlag, DescriptorType, Event, EventDescriptor, EventKey, PollDescriptor,
    WorkerId,
};
pub use notices::{Bus, Notice, NoticeKind};
pub use poll::{ActivePoll, PollRegistry, Tracking};
pub use sequencer::EventSequencer;
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use wire::{Frame, FrameReader, FrameWriter, MAX_FRAME_LEN};
pub use worker::Worker;
