//! # Frames exchanged between the distributor and a worker.
//!
//! Each worker owns one full-duplex byte stream. Frames are JSON objects, one
//! per line, tagged by `op`:
//!
//! ```text
//! distributor ──► worker   {"op":"deliver","event":{...,"descriptor":{"type":"SCHEDULE",...}}}
//! worker ──► distributor   {"op":"ack","uuid":"..."}
//!                          {"op":"complete","event":{...}}
//!                          {"op":"rearm","event":{...}}
//!                          {"op":"poll_ended","event":{...},"reason":"MAX_TIMED_OUT"}
//!                          {"op":"post" | "poll" | "post_graph" | "failed", ...}
//! ```
//!
//! ## Rules
//! - Frames are self-contained; the event is copied on every hop.
//! - A frame that fails to decode is a transport error for that stream.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use uuid::Uuid;

use crate::error::WireError;
use crate::graph::Graph;
use crate::model::{CancelReason, Event};

/// Upper bound of one encoded frame.
pub const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// One message on a worker stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Frame {
    /// Distributor → worker: an event to process, classified by its descriptor type.
    Deliver { event: Event },

    /// Worker → distributor: a `SCHEDULE` delivery was received.
    Ack { uuid: Uuid },
    /// Worker → distributor: handler posted an event.
    Post { event: Event },
    /// Worker → distributor: handler started a poll (spacing already resolved).
    Poll {
        event: Event,
        spacing_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_times: Option<u32>,
    },
    /// Worker → distributor: handler posted a workflow graph.
    PostGraph { graph: Graph },
    /// Worker → distributor: handler signalled completion.
    Complete { event: Event },
    /// Worker → distributor: handler errored or panicked.
    Failed { event: Event, reason: String },
    /// Worker → distributor: poll wants another delivery after its spacing.
    Rearm { event: Event },
    /// Worker → distributor: poll stopped or exhausted.
    PollEnded { event: Event, reason: CancelReason },
}

impl Frame {
    pub fn op(&self) -> &'static str {
        match self {
            Frame::Deliver { .. } => "deliver",
            Frame::Ack { .. } => "ack",
            Frame::Post { .. } => "post",
            Frame::Poll { .. } => "poll",
            Frame::PostGraph { .. } => "post_graph",
            Frame::Complete { .. } => "complete",
            Frame::Failed { .. } => "failed",
            Frame::Rearm { .. } => "rearm",
            Frame::PollEnded { .. } => "poll_ended",
        }
    }
}

fn codec() -> LinesCodec {
    LinesCodec::new_with_max_length(MAX_FRAME_LEN)
}

/// Reading half of a worker stream.
pub struct FrameReader<R> {
    inner: FramedRead<R, LinesCodec>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: FramedRead::new(reader, codec()),
        }
    }

    /// Next frame; `None` once the peer closed the stream.
    ///
    /// Cancel-safe: dropping the future never loses a partially read line.
    pub async fn next(&mut self) -> Option<Result<Frame, WireError>> {
        let line = match self.inner.next().await? {
            Ok(line) => line,
            Err(e) => return Some(Err(e.into())),
        };
        Some(serde_json::from_str(&line).map_err(WireError::from))
    }
}

/// Writing half of a worker stream.
pub struct FrameWriter<W> {
    inner: FramedWrite<W, LinesCodec>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: FramedWrite::new(writer, codec()),
        }
    }

    /// Encodes and flushes one frame.
    pub async fn send(&mut self, frame: &Frame) -> Result<(), WireError> {
        let line = serde_json::to_string(frame)?;
        self.inner.send(line).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkerId;
    use serde_json::json;

    #[tokio::test]
    async fn event_survives_the_stream() {
        let (a, b) = tokio::io::duplex(1024);
        let mut writer = FrameWriter::new(a);
        let mut reader = FrameReader::new(b);

        let mut event = Event::new("svc.deploy")
            .with_key("svc-42")
            .with_data(json!({"image": "nginx:1.27", "replicas": [1, 2, 3], "note": "line\nbreak"}))
            .with_binding_key("pool-1")
            .serialized()
            .on_worker(WorkerId(1));
        event.stamp(None);

        writer
            .send(&Frame::Deliver {
                event: event.clone(),
            })
            .await
            .unwrap();

        let Some(Ok(Frame::Deliver { event: got })) = reader.next().await else {
            panic!("expected a deliver frame");
        };
        assert_eq!(got.id, event.id);
        assert_eq!(got.key, event.key);
        assert_eq!(got.data, event.data);
        assert_eq!(got.binding_key, event.binding_key);
        assert_eq!(got.serialize, event.serialize);
        assert_eq!(got, event);
    }

    #[tokio::test]
    async fn closed_stream_ends_reader() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut reader = FrameReader::new(b);
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn garbage_is_a_decode_error() {
        use tokio::io::AsyncWriteExt;

        let (mut a, b) = tokio::io::duplex(64);
        a.write_all(b"{not json}\n").await.unwrap();
        let mut reader = FrameReader::new(b);
        let err = reader.next().await.unwrap().unwrap_err();
        assert_eq!(err.as_label(), "wire_json");
    }

    #[test]
    fn frames_are_tagged_by_op() {
        let uuid = Uuid::nil();
        let v = serde_json::to_value(Frame::Ack { uuid }).unwrap();
        assert_eq!(v, json!({"op": "ack", "uuid": "00000000-0000-0000-0000-000000000000"}));
        assert_eq!(Frame::Ack { uuid }.op(), "ack");
    }
}
