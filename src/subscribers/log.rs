//! # LogWriter: renders notices through `tracing`.
//!
//! ## Example output
//! ```text
//! INFO eventvisor: [dispatched] event="pool.resize" key=Some("pool-7") worker=Some(WorkerId(1))
//! WARN eventvisor: [failed] event="dev.sync" reason=Some("handler failed: timeout")
//! INFO eventvisor: [poll-ended] event="sensor" reason=Some("MAX_TIMED_OUT")
//! ```

use async_trait::async_trait;

use crate::notices::{Notice, NoticeKind};
use crate::subscribers::Subscribe;

/// Notice writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn label(kind: NoticeKind) -> &'static str {
    match kind {
        NoticeKind::EventPosted => "posted",
        NoticeKind::EventQueued => "queued",
        NoticeKind::EventDispatched => "dispatched",
        NoticeKind::EventAcked => "acked",
        NoticeKind::EventCompleted => "completed",
        NoticeKind::EventFailed => "failed",
        NoticeKind::EventCancelled => "cancelled",
        NoticeKind::PollRearmed => "poll-rearmed",
        NoticeKind::PollEnded => "poll-ended",
        NoticeKind::WorkerStarted => "worker-started",
        NoticeKind::WorkerLost => "worker-lost",
        NoticeKind::GraphStarted => "graph-started",
        NoticeKind::GraphCompleted => "graph-completed",
        NoticeKind::GraphAbandoned => "graph-abandoned",
        NoticeKind::SubscriberPanicked => "subscriber-panicked",
        NoticeKind::SubscriberOverflow => "subscriber-overflow",
        NoticeKind::ShutdownRequested => "shutdown-requested",
        NoticeKind::AllStoppedWithin => "all-stopped-within-grace",
        NoticeKind::GraceExceeded => "grace-exceeded",
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_notice(&self, n: &Notice) {
        let tag = label(n.kind);
        match n.kind {
            NoticeKind::EventFailed
            | NoticeKind::WorkerLost
            | NoticeKind::GraphAbandoned
            | NoticeKind::SubscriberPanicked
            | NoticeKind::SubscriberOverflow
            | NoticeKind::GraceExceeded => {
                tracing::warn!(
                    "[{tag}] event={:?} worker={:?} reason={:?}",
                    n.event_id,
                    n.worker,
                    n.reason
                );
            }
            NoticeKind::PollRearmed => {
                tracing::debug!(
                    "[{tag}] event={:?} delay_ms={:?} remaining={:?}",
                    n.event_id,
                    n.delay_ms,
                    n.remaining
                );
            }
            NoticeKind::EventAcked => {
                tracing::debug!("[{tag}] event={:?} uuid={:?}", n.event_id, n.uuid);
            }
            _ => {
                tracing::info!(
                    "[{tag}] event={:?} key={:?} worker={:?} reason={:?}",
                    n.event_id,
                    n.key,
                    n.worker,
                    n.reason
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
