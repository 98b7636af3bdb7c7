//! # Worker links: one in-process worker per duplex stream.
//!
//! ```text
//!           tokio::io::duplex(channel_buffer)
//! Distributor end ◄══════════════════════════► Worker end
//!   ├─ writer task: link queue ─► FrameWriter      Worker::run(stream, token)
//!   └─ reader task: FrameReader ─► Inner::on_frame
//!                   EOF / decode error ─► Inner::worker_lost
//! ```

use std::sync::Arc;

use anyhow::Context as _;
use tokio::io::{AsyncRead, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::inner::Inner;
use super::state::WorkerLink;
use crate::config::Config;
use crate::handlers::Registry;
use crate::model::WorkerId;
use crate::wire::{Frame, FrameReader, FrameWriter};
use crate::worker::Worker;

/// Distributor-side pieces of a freshly spawned worker, before I/O tasks start.
pub(crate) struct PendingLink {
    pub id: WorkerId,
    pub stream: DuplexStream,
    pub rx: mpsc::UnboundedReceiver<Frame>,
    pub token: CancellationToken,
}

/// Spawns worker `id` on its own stream.
pub(crate) fn spawn_worker(
    id: WorkerId,
    registry: &Arc<Registry>,
    cfg: &Config,
    parent: &CancellationToken,
) -> (WorkerLink, PendingLink) {
    let (ours, theirs) = tokio::io::duplex(cfg.channel_buffer.max(1));
    let token = parent.child_token();
    let worker = Worker::new(id, Arc::clone(registry), cfg);
    let join = tokio::spawn(worker.run(theirs, token.clone()));
    let (tx, rx) = mpsc::unbounded_channel();

    let link = WorkerLink {
        tx,
        token: token.clone(),
        join: Some(join),
    };
    let pending = PendingLink {
        id,
        stream: ours,
        rx,
        token,
    };
    (link, pending)
}

/// Starts the reader and writer tasks of a link.
pub(crate) fn start_io(inner: &Arc<Inner>, pending: PendingLink) {
    let PendingLink {
        id,
        stream,
        mut rx,
        token,
    } = pending;
    let (rd, wr) = tokio::io::split(stream);

    tokio::spawn(async move {
        let mut writer = FrameWriter::new(wr);
        while let Some(frame) = rx.recv().await {
            if let Err(e) = writer.send(&frame).await {
                tracing::warn!(worker = %id, error = %e, op = frame.op(), "link write failed");
                token.cancel();
                break;
            }
        }
    });

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let reason = match read_loop(&inner, id, rd).await {
            Ok(()) => "stream closed".to_string(),
            Err(e) => format!("{e:#}"),
        };
        inner.worker_lost(id, reason).await;
    });
}

async fn read_loop<R>(inner: &Arc<Inner>, id: WorkerId, rd: R) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = FrameReader::new(rd);
    while let Some(frame) = reader.next().await {
        let frame = frame.with_context(|| format!("reading frame from {id}"))?;
        tracing::trace!(worker = %id, op = frame.op(), "frame");
        inner.on_frame(id, frame).await;
    }
    Ok(())
}
