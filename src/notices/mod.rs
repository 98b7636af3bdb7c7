//! Runtime notices: types and broadcast bus.
//!
//! ## Contents
//! - [`NoticeKind`], [`Notice`] classification and metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Distributor` (post/queue/dispatch/complete, poll timers,
//!   worker supervision, graph executor hooks, shutdown), `SubscriberSet` workers.
//! - **Consumers**: the distributor's fan-out listener (forwards to `SubscriberSet`)
//!   and any receiver obtained through `Distributor::bus()`.

mod bus;
mod notice;

pub use bus::Bus;
pub use notice::{Notice, NoticeKind};
