//! # Notice subscribers.
//!
//! ```text
//! Distributor ── publish(Notice) ──► Bus ──► fan-out listener ──► SubscriberSet
//!                                                              ┌──────┴──────┐
//!                                                              ▼             ▼
//!                                                          LogWriter      Custom
//! ```

mod log;
mod set;
mod subscriber;

pub use log::LogWriter;
pub(crate) use set::panic_message;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
