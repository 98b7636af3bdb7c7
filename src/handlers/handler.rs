//! # Handler abstraction and closure-backed implementation.
//!
//! A [`Handler`] processes events of one or more event ids. It runs on a
//! worker and talks back to the distributor through its [`Context`].
//!
//! Completion is explicit: a handler calls [`Context::event_complete`] when it
//! is finished. Returning from `handle_event` does not complete the event, so
//! a handler may hand the event to a follow-up step and complete it later.

use std::{borrow::Cow, future::Future, sync::Arc};

use async_trait::async_trait;

use super::Context;
use crate::error::HandlerError;
use crate::model::{CancelReason, Event};

/// # Shared handle to a handler object.
pub type HandlerRef = Arc<dyn Handler>;

/// What a poll delivery decided.
#[derive(Debug, Clone, PartialEq)]
pub struct PollOutcome {
    /// Keep polling (subject to the remaining budget).
    pub poll: bool,
    /// Event to carry into the next delivery; its `data` may have changed.
    pub event: Event,
}

impl PollOutcome {
    /// Poll again after the spacing.
    pub fn repeat(event: Event) -> Self {
        Self { poll: true, event }
    }

    /// Stop polling; the event is cancelled with `EXPIRED`.
    pub fn stop(event: Event) -> Self {
        Self { poll: false, event }
    }
}

/// # Event handler.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use eventvisor::{Context, Event, Handler, HandlerError};
///
/// struct Resize;
///
/// #[async_trait]
/// impl Handler for Resize {
///     async fn handle_event(&self, ctx: &Context, event: Event) -> Result<(), HandlerError> {
///         // resize the pool...
///         ctx.event_complete(event).await.map_err(|e| HandlerError::fail(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles a `SCHEDULE` delivery.
    async fn handle_event(&self, ctx: &Context, event: Event) -> Result<(), HandlerError>;

    /// Handles one `POLL` delivery. Defaults to polling again with the same event.
    async fn handle_poll_event(
        &self,
        _ctx: &Context,
        event: Event,
    ) -> Result<PollOutcome, HandlerError> {
        Ok(PollOutcome::repeat(event))
    }

    /// Called once per originating event when it is cancelled.
    ///
    /// A started serialized event keeps its binding key until it is completed;
    /// call `ctx.event_complete(event)` here to release it.
    async fn event_cancelled(&self, _ctx: &Context, _event: Event, _reason: CancelReason) {}
}

/// # Closure-backed handler.
///
/// Wraps `Fn(Context, Event) -> Fut`. Only `handle_event` is customized; polls
/// use the default behavior.
///
/// # Example
/// ```
/// use eventvisor::{Context, Event, HandlerError, HandlerFn, HandlerRef};
///
/// let h: HandlerRef = HandlerFn::arc("echo", |ctx: Context, event: Event| async move {
///     ctx.event_complete(event).await.map_err(|e| HandlerError::fail(e.to_string()))
/// });
/// ```
pub struct HandlerFn<Fnc, Fut>
where
    Fnc: Fn(Context, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    name: Cow<'static, str>,
    func: Fnc,
}

impl<Fnc, Fut> HandlerFn<Fnc, Fut>
where
    Fnc: Fn(Context, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    pub fn new(name: impl Into<Cow<'static, str>>, func: Fnc) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    /// Creates the handler and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, func: Fnc) -> HandlerRef {
        Arc::new(Self::new(name, func))
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<Fnc, Fut> Handler for HandlerFn<Fnc, Fut>
where
    Fnc: Fn(Context, Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle_event(&self, ctx: &Context, event: Event) -> Result<(), HandlerError> {
        (self.func)(ctx.clone(), event).await
    }
}
