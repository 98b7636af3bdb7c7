//! # Event dependency graphs.
//!
//! [`Graph`] describes a workflow; [`Executor`] decides which nodes are ready.

mod executor;
#[allow(clippy::module_inception)]
mod graph;

pub use executor::{Completion, Executor};
pub use graph::{Graph, GraphNode};
