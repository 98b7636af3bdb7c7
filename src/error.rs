//! Error types used by the eventvisor runtime and handlers.
//!
//! - [`RuntimeError`]: failures of the distributor itself.
//! - [`HandlerError`]: failures reported by handler callbacks.
//! - [`GraphError`]: invalid workflow graph construction.
//! - [`WireError`]: frame encode/decode failures on a worker stream.
//!
//! All of them provide `as_label` for logs/metrics.
//!
//! Configuration mistakes (an unregistered event id, a poll without spacing)
//! are not represented here: they panic at the call site.

use std::time::Duration;

use thiserror::Error;

use crate::model::{EventKey, WorkerId};

/// # Errors produced by the distributor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some workers were still running.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Workers that did not stop in time.
        stuck: Vec<WorkerId>,
    },

    /// No worker is alive to take the event.
    #[error("no live worker available")]
    NoWorkers,

    /// The distributor has been shut down.
    #[error("distributor closed")]
    Closed,
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use eventvisor::RuntimeError;
    ///
    /// assert_eq!(RuntimeError::NoWorkers.as_label(), "runtime_no_workers");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::NoWorkers => "runtime_no_workers",
            RuntimeError::Closed => "runtime_closed",
        }
    }
}

/// # Errors produced by handler callbacks.
///
/// A failed event is abandoned: it is logged and its serialization slot is released.
/// Recovery is the handler's business (e.g. posting a compensating event).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Processing failed.
    #[error("handler failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The handler cannot process this payload.
    #[error("invalid payload: {error}")]
    InvalidPayload { error: String },
}

impl HandlerError {
    pub fn fail(error: impl Into<String>) -> Self {
        HandlerError::Fail {
            error: error.into(),
        }
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Fail { .. } => "handler_failed",
            HandlerError::InvalidPayload { .. } => "handler_invalid_payload",
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        HandlerError::InvalidPayload {
            error: e.to_string(),
        }
    }
}

/// # Errors raised while building a workflow graph.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("parent node {parent} is not part of the graph")]
    UnknownParent { parent: EventKey },

    #[error("node {node} is already a child of {parent}")]
    DuplicateEdge { node: EventKey, parent: EventKey },

    #[error("linking {node} under {parent} would create a cycle")]
    Cycle { node: EventKey, parent: EventKey },
}

impl GraphError {
    pub fn as_label(&self) -> &'static str {
        match self {
            GraphError::UnknownParent { .. } => "graph_unknown_parent",
            GraphError::DuplicateEdge { .. } => "graph_duplicate_edge",
            GraphError::Cycle { .. } => "graph_cycle",
        }
    }
}

/// # Errors raised by the frame codec.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WireError {
    #[error("stream error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

impl WireError {
    pub fn as_label(&self) -> &'static str {
        match self {
            WireError::Codec(_) => "wire_codec",
            WireError::Json(_) => "wire_json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let err = RuntimeError::GraceExceeded {
            grace: Duration::from_secs(1),
            stuck: vec![WorkerId(2)],
        };
        assert_eq!(err.as_label(), "runtime_grace_exceeded");
        assert!(err.to_string().contains("WorkerId(2)"));

        assert_eq!(HandlerError::fail("boom").as_label(), "handler_failed");
        let err = GraphError::Cycle {
            node: EventKey::new("a", None),
            parent: EventKey::new("b", Some("1".into())),
        };
        assert_eq!(err.to_string(), "linking a under b[1] would create a cycle");
    }

    #[test]
    fn json_errors_become_invalid_payload() {
        let err: HandlerError = serde_json::from_str::<u32>("\"x\"").unwrap_err().into();
        assert_eq!(err.as_label(), "handler_invalid_payload");
    }
}
