//! # Handling of one delivery on a worker.
//!
//! ```text
//! Deliver(event) ── descriptor.type ──┐
//!   SCHEDULE ─► Ack ─► handle_event ───────────────► (handler calls event_complete)
//!   POLL     ─► handle_poll_event ─► max_times - 1
//!                 ├─ poll && max_times > 0 ─► Rearm
//!                 ├─ !poll                 ─► PollEnded(EXPIRED)
//!                 └─ max_times == 0        ─► PollEnded(MAX_TIMED_OUT)
//!   EXPIRED  ─► event_cancelled(reason)
//!
//! error or panic in a handler ─► Failed(reason)
//! ```

use std::{future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;

use crate::error::HandlerError;
use crate::handlers::{Context, HandlerRef};
use crate::model::{CancelReason, DescriptorType, Event};
use crate::subscribers::panic_message;
use crate::wire::Frame;

/// Runs a handler future, turning errors and panics into a failure reason.
async fn guarded<T, F>(fut: F) -> Result<T, String>
where
    F: Future<Output = Result<T, HandlerError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(&*panic))),
    }
}

async fn report(ctx: &Context, frame: Frame) {
    let op = frame.op();
    if ctx.send(frame).await.is_err() {
        tracing::debug!(worker = %ctx.worker(), op, "outbox closed; frame dropped");
    }
}

async fn fail(ctx: &Context, event: Event, reason: String) {
    tracing::warn!(worker = %ctx.worker(), event = %event.id, %reason, "handler failed");
    report(ctx, Frame::Failed { event, reason }).await;
}

/// Builds the job for one delivery. `None` means nothing to run.
pub(crate) fn job(
    ctx: Context,
    handler: HandlerRef,
    event: Event,
) -> Option<impl Future<Output = ()> + Send + 'static> {
    let kind = event.kind()?;
    Some(async move {
        match kind {
            DescriptorType::Schedule => schedule(&ctx, handler, event).await,
            DescriptorType::Poll => poll(&ctx, handler, event).await,
            DescriptorType::Expired => expired(&ctx, handler, event).await,
            DescriptorType::Stash => {
                tracing::warn!(worker = %ctx.worker(), event = %event.id, "stashed event delivered; ignored");
            }
        }
    })
}

async fn schedule(ctx: &Context, handler: HandlerRef, event: Event) {
    if let Err(reason) = guarded(handler.handle_event(ctx, event.clone())).await {
        fail(ctx, event, reason).await;
    }
}

async fn poll(ctx: &Context, handler: HandlerRef, delivered: Event) {
    let outcome = match guarded(handler.handle_poll_event(ctx, delivered.clone())).await {
        Ok(o) => o,
        Err(reason) => return fail(ctx, delivered, reason).await,
    };

    let mut event = outcome.event;
    event.descriptor = delivered.descriptor;
    let remaining = match event.descriptor.as_mut().and_then(|d| d.poll.as_mut()) {
        Some(p) => {
            p.max_times = p.max_times.saturating_sub(1);
            p.max_times
        }
        None => 0,
    };

    let frame = if !outcome.poll {
        Frame::PollEnded {
            event,
            reason: CancelReason::Expired,
        }
    } else if remaining == 0 {
        Frame::PollEnded {
            event,
            reason: CancelReason::MaxTimedOut,
        }
    } else {
        Frame::Rearm { event }
    };
    report(ctx, frame).await;
}

async fn expired(ctx: &Context, handler: HandlerRef, event: Event) {
    let reason = event
        .descriptor
        .as_ref()
        .and_then(|d| d.reason)
        .unwrap_or(CancelReason::Expired);
    let fut = handler.event_cancelled(ctx, event, reason);
    if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
        tracing::error!(
            worker = %ctx.worker(),
            info = %panic_message(&*panic),
            "event_cancelled panicked"
        );
    }
}
