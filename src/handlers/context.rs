//! # Handler-side view of the distributor.
//!
//! A [`Context`] is handed to every handler call. Its operations mirror the
//! distributor's public API but travel as frames over the worker's stream, so
//! a handler never touches distributor state directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::Registry;
use crate::error::RuntimeError;
use crate::graph::Graph;
use crate::model::{Event, WorkerId};
use crate::wire::Frame;

#[derive(Clone)]
pub struct Context {
    worker: WorkerId,
    registry: Arc<Registry>,
    outbox: mpsc::Sender<Frame>,
}

impl Context {
    pub(crate) fn new(worker: WorkerId, registry: Arc<Registry>, outbox: mpsc::Sender<Frame>) -> Self {
        Self {
            worker,
            registry,
            outbox,
        }
    }

    /// Worker this handler runs on.
    #[inline]
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    #[inline]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Posts an event for immediate dispatch.
    ///
    /// # Panics
    /// If no handler is registered for the event.
    pub async fn post_event(&self, event: Event) -> Result<(), RuntimeError> {
        self.registry.require_handler(&event);
        self.send(Frame::Post { event }).await
    }

    /// Starts polling `event` on this worker.
    ///
    /// The poll refers back to `event`'s correlation id; when that event is
    /// completed the poll stops.
    ///
    /// `max_times` of `None` uses the distributor's `default_max_times`.
    ///
    /// # Panics
    /// If no handler is registered, no spacing is given or registered, or
    /// `max_times` is `Some(0)`.
    pub async fn poll_event(
        &self,
        mut event: Event,
        spacing: Option<Duration>,
        max_times: Option<u32>,
    ) -> Result<(), RuntimeError> {
        self.registry.require_handler(&event);
        let spacing = self.registry.resolve_spacing(&event.id, spacing);
        Registry::check_max_times(&event.id, max_times);
        event.worker_attached.get_or_insert(self.worker);
        self.send(Frame::Poll {
            event,
            spacing_ms: spacing.as_millis().min(u128::from(u64::MAX)) as u64,
            max_times,
        })
        .await
    }

    /// Signals that the handler is finished with `event`.
    pub async fn event_complete(&self, event: Event) -> Result<(), RuntimeError> {
        self.send(Frame::Complete { event }).await
    }

    /// Alias of [`Context::event_complete`].
    pub async fn event_done(&self, event: Event) -> Result<(), RuntimeError> {
        self.event_complete(event).await
    }

    /// Registers a workflow graph and schedules its ready nodes.
    pub async fn post_event_graph(&self, graph: Graph) -> Result<(), RuntimeError> {
        for node in graph.nodes() {
            self.registry.require_handler(&node.event);
        }
        self.send(Frame::PostGraph { graph }).await
    }

    pub(crate) async fn send(&self, frame: Frame) -> Result<(), RuntimeError> {
        self.outbox.send(frame).await.map_err(|_| RuntimeError::Closed)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").field("worker", &self.worker).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handlers::HandlerFn;

    fn registry() -> Arc<Registry> {
        let mut r = Registry::new();
        r.register_handler(
            "sensor",
            HandlerFn::arc("sensor", |_c: Context, _e: Event| async { Ok::<_, HandlerError>(()) }),
        );
        r.register_poll_spacing("sensor", Duration::from_millis(250));
        Arc::new(r)
    }

    #[tokio::test]
    async fn poll_resolves_spacing_and_pins_worker() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = Context::new(WorkerId(2), registry(), tx);

        ctx.poll_event(Event::new("sensor"), None, Some(3)).await.unwrap();

        let Some(Frame::Poll { event, spacing_ms, max_times }) = rx.recv().await else {
            panic!("expected a poll frame");
        };
        assert_eq!(spacing_ms, 250);
        assert_eq!(max_times, Some(3));
        assert_eq!(event.worker_attached, Some(WorkerId(2)));
    }

    #[tokio::test]
    async fn closed_outbox_is_reported() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let ctx = Context::new(WorkerId(0), registry(), tx);
        let err = ctx.event_done(Event::new("sensor")).await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_closed");
    }

    #[tokio::test]
    #[should_panic(expected = "max_times for event `sensor` must be greater than zero")]
    async fn zero_poll_budget_panics() {
        let (tx, _rx) = mpsc::channel(1);
        let ctx = Context::new(WorkerId(0), registry(), tx);
        let _ = ctx.poll_event(Event::new("sensor"), None, Some(0)).await;
    }

    #[tokio::test]
    #[should_panic(expected = "no handler registered")]
    async fn post_of_unknown_event_panics() {
        let (tx, _rx) = mpsc::channel(1);
        let ctx = Context::new(WorkerId(0), registry(), tx);
        let _ = ctx.post_event(Event::new("ghost")).await;
    }
}
