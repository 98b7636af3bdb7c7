//! # Handlers: user code that processes events on a worker.
//!
//! - [`Handler`] / [`HandlerFn`]: the callback surface.
//! - [`Registry`]: event id → handler and poll spacing.
//! - [`Context`]: the handler's channel back to the distributor.

mod context;
mod handler;
mod registry;

pub use context::Context;
pub use handler::{Handler, HandlerFn, HandlerRef, PollOutcome};
pub use registry::Registry;
