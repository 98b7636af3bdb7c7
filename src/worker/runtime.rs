//! # Worker: the stream-side half of the runtime.
//!
//! A worker owns one end of a full-duplex byte stream and a bounded pool.
//! It shares nothing with the distributor: every event arrives and leaves as
//! a JSON frame.
//!
//! ```text
//!              ┌──────────── Worker::run(stream) ─────────────┐
//! stream rd ──►│ FrameReader ─► classify ─► Pool ─► Handler    │
//!              │                   │ Ack        │ Context      │
//!              │                   ▼            ▼              │
//! stream wr ◄──│ FrameWriter ◄──── outbox (mpsc) ◄─────────────│
//!              └──────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - `SCHEDULE` deliveries are acknowledged before the handler runs.
//! - The loop ends on cancellation, on EOF, or on a frame it cannot decode.
//! - On exit the worker waits for running jobs, then flushes the outbox.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::dispatch;
use super::pool::Pool;
use crate::config::Config;
use crate::error::WireError;
use crate::handlers::{Context, Registry};
use crate::model::{DescriptorType, Event, WorkerId};
use crate::wire::{Frame, FrameReader, FrameWriter};

pub struct Worker {
    id: WorkerId,
    registry: Arc<Registry>,
    pool_limit: Option<usize>,
    outbox_capacity: usize,
}

impl Worker {
    pub fn new(id: WorkerId, registry: Arc<Registry>, cfg: &Config) -> Self {
        Self {
            id,
            registry,
            pool_limit: cfg.pool_limit(),
            outbox_capacity: cfg.outbox_capacity_clamped(),
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Serves `stream` until it closes or `token` is cancelled.
    ///
    /// Returns an error only if an inbound frame could not be decoded.
    pub async fn run<S>(self, stream: S, token: CancellationToken) -> Result<(), WireError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (rd, wr) = tokio::io::split(stream);
        let mut reader = FrameReader::new(rd);
        let (outbox, mut rx) = mpsc::channel::<Frame>(self.outbox_capacity);

        let id = self.id();
        let writer = tokio::spawn(async move {
            let mut writer = FrameWriter::new(wr);
            while let Some(frame) = rx.recv().await {
                if let Err(e) = writer.send(&frame).await {
                    tracing::warn!(worker = %id, error = %e, op = frame.op(), "write failed");
                    break;
                }
            }
        });

        let ctx = Context::new(id, Arc::clone(&self.registry), outbox);
        let mut pool = Pool::new(self.pool_limit);
        tracing::debug!(worker = %id, pool = ?self.pool_limit, "worker started");

        let res = loop {
            tokio::select! {
                _ = token.cancelled() => break Ok(()),
                _ = pool.reap() => {}
                next = reader.next() => match next {
                    None => break Ok(()),
                    Some(Err(e)) => {
                        tracing::warn!(worker = %id, error = %e, "undecodable frame");
                        break Err(e);
                    }
                    Some(Ok(Frame::Deliver { event })) => self.deliver(&ctx, &mut pool, event).await,
                    Some(Ok(other)) => {
                        tracing::warn!(worker = %id, op = other.op(), "unexpected frame on worker side");
                    }
                },
            }
        };

        if pool.running() > 0 {
            tracing::debug!(worker = %id, running = pool.running(), "waiting for handlers");
        }
        pool.drain().await;
        drop(ctx);
        let _ = writer.await;
        tracing::debug!(worker = %id, "worker stopped");
        res
    }

    async fn deliver(&self, ctx: &Context, pool: &mut Pool, event: Event) {
        if let (Some(DescriptorType::Schedule), Some(uuid)) = (event.kind(), event.uuid()) {
            if ctx.send(Frame::Ack { uuid }).await.is_err() {
                tracing::debug!(worker = %self.id, "outbox closed; ack dropped");
            }
        }

        let Some(handler) = self.registry.handler_for(&event) else {
            let reason = format!("no handler registered for event `{}`", event.handler_name());
            tracing::error!(worker = %self.id, %reason);
            let _ = ctx.send(Frame::Failed { event, reason }).await;
            return;
        };

        match dispatch::job(ctx.clone(), handler, event) {
            Some(job) => pool.run(job).await,
            None => tracing::warn!(worker = %self.id, "delivery without descriptor; ignored"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handlers::{Handler, PollOutcome};
    use crate::model::{CancelReason, EventDescriptor, PollDescriptor};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio::io::{ReadHalf, WriteHalf};
    use tokio::time::timeout;
    use uuid::Uuid;

    struct Scripted {
        cancelled: mpsc::UnboundedSender<(String, CancelReason)>,
    }

    #[async_trait]
    impl Handler for Scripted {
        async fn handle_event(&self, ctx: &Context, event: Event) -> Result<(), HandlerError> {
            match event.id.as_str() {
                "boom" => panic!("sensor exploded"),
                "bad" => Err(HandlerError::fail("device offline")),
                _ => ctx
                    .event_complete(event)
                    .await
                    .map_err(|e| HandlerError::fail(e.to_string())),
            }
        }

        async fn handle_poll_event(
            &self,
            _ctx: &Context,
            event: Event,
        ) -> Result<PollOutcome, HandlerError> {
            if event.data["stop"] == json!(true) {
                Ok(PollOutcome::stop(event))
            } else {
                Ok(PollOutcome::repeat(event))
            }
        }

        async fn event_cancelled(&self, _ctx: &Context, event: Event, reason: CancelReason) {
            let _ = self.cancelled.send((event.id, reason));
        }
    }

    struct Peer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
        token: CancellationToken,
        cancelled: mpsc::UnboundedReceiver<(String, CancelReason)>,
    }

    impl Peer {
        async fn deliver(&mut self, event: Event) {
            self.writer.send(&Frame::Deliver { event }).await.unwrap();
        }

        async fn recv(&mut self) -> Frame {
            timeout(Duration::from_secs(5), self.reader.next())
                .await
                .expect("worker reply timed out")
                .expect("stream closed")
                .expect("decode failed")
        }
    }

    fn start(pool_size: usize) -> Peer {
        let (tx, cancelled) = mpsc::unbounded_channel();
        let handler: crate::handlers::HandlerRef = Arc::new(Scripted { cancelled: tx });
        let mut registry = Registry::new();
        for id in ["sync", "boom", "bad", "sensor"] {
            registry.register_handler(id, Arc::clone(&handler));
        }

        let cfg = Config {
            pool_size,
            ..Config::default()
        };
        let (ours, theirs) = tokio::io::duplex(cfg.channel_buffer);
        let token = CancellationToken::new();
        let worker = Worker::new(WorkerId(7), Arc::new(registry), &cfg);
        tokio::spawn(worker.run(theirs, token.clone()));

        let (rd, wr) = tokio::io::split(ours);
        Peer {
            reader: FrameReader::new(rd),
            writer: FrameWriter::new(wr),
            token,
            cancelled,
        }
    }

    fn scheduled(id: &str) -> Event {
        let mut ev = Event::new(id);
        ev.stamp(None);
        ev
    }

    fn polled(max_times: u32, data: serde_json::Value) -> Event {
        let mut ev = Event::new("sensor").with_data(data);
        ev.descriptor = Some(EventDescriptor::poll(
            None,
            PollDescriptor::new(Duration::from_millis(50), max_times, Uuid::new_v4()),
        ));
        ev
    }

    fn remaining(ev: &Event) -> u32 {
        ev.descriptor.as_ref().and_then(|d| d.poll.as_ref()).map(|p| p.max_times).unwrap()
    }

    #[tokio::test]
    async fn schedule_is_acked_before_completion() {
        let mut peer = start(0);
        let ev = scheduled("sync");
        let uuid = ev.uuid().unwrap();
        peer.deliver(ev).await;

        assert!(matches!(peer.recv().await, Frame::Ack { uuid: u } if u == uuid));
        let Frame::Complete { event } = peer.recv().await else {
            panic!("expected completion");
        };
        assert_eq!(event.uuid(), Some(uuid));
        peer.token.cancel();
    }

    #[tokio::test]
    async fn errors_and_panics_become_failures() {
        let mut peer = start(2);
        peer.deliver(scheduled("bad")).await;
        assert!(matches!(peer.recv().await, Frame::Ack { .. }));
        let Frame::Failed { reason, .. } = peer.recv().await else {
            panic!("expected failure");
        };
        assert!(reason.contains("device offline"));

        peer.deliver(scheduled("boom")).await;
        assert!(matches!(peer.recv().await, Frame::Ack { .. }));
        let Frame::Failed { reason, .. } = peer.recv().await else {
            panic!("expected failure");
        };
        assert!(reason.contains("sensor exploded"));
        peer.token.cancel();
    }

    #[tokio::test]
    async fn poll_with_budget_is_rearmed() {
        let mut peer = start(0);
        peer.deliver(polled(3, json!({}))).await;
        let Frame::Rearm { event } = peer.recv().await else {
            panic!("expected rearm");
        };
        assert_eq!(remaining(&event), 2);
        assert_eq!(event.kind(), Some(DescriptorType::Poll));
        peer.token.cancel();
    }

    #[tokio::test]
    async fn last_poll_delivery_ends_with_max_timed_out() {
        let mut peer = start(0);
        peer.deliver(polled(1, json!({}))).await;
        let Frame::PollEnded { event, reason } = peer.recv().await else {
            panic!("expected poll end");
        };
        assert_eq!(reason, CancelReason::MaxTimedOut);
        assert_eq!(remaining(&event), 0);
        peer.token.cancel();
    }

    #[tokio::test]
    async fn handler_stop_ends_poll_as_expired() {
        let mut peer = start(0);
        peer.deliver(polled(10, json!({"stop": true}))).await;
        let Frame::PollEnded { reason, .. } = peer.recv().await else {
            panic!("expected poll end");
        };
        assert_eq!(reason, CancelReason::Expired);
        peer.token.cancel();
    }

    #[tokio::test]
    async fn expired_delivery_runs_event_cancelled() {
        let mut peer = start(0);
        let mut ev = scheduled("sync");
        ev.set_kind(DescriptorType::Expired);
        if let Some(d) = ev.descriptor.as_mut() {
            d.reason = Some(CancelReason::WorkerLost);
        }
        peer.deliver(ev).await;

        let got = timeout(Duration::from_secs(5), peer.cancelled.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, ("sync".to_string(), CancelReason::WorkerLost));
        peer.token.cancel();
    }

    #[tokio::test]
    async fn unknown_handler_is_reported_as_failure() {
        let mut peer = start(0);
        peer.deliver(scheduled("ghost")).await;
        assert!(matches!(peer.recv().await, Frame::Ack { .. }));
        let Frame::Failed { reason, .. } = peer.recv().await else {
            panic!("expected failure");
        };
        assert!(reason.contains("ghost"));
        peer.token.cancel();
    }

    #[tokio::test]
    async fn garbage_ends_the_worker_with_an_error() {
        use tokio::io::AsyncWriteExt;

        let registry = Arc::new(Registry::new());
        let (mut ours, theirs) = tokio::io::duplex(1024);
        let worker = Worker::new(WorkerId(1), registry, &Config::default());
        let handle = tokio::spawn(worker.run(theirs, CancellationToken::new()));

        ours.write_all(b"][\n").await.unwrap();
        let res = timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(res.unwrap_err().as_label(), "wire_json");
    }
}
