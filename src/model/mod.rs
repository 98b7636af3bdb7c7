//! Event and descriptor data model.
//!
//! ## Contents
//! - [`Event`], [`EventKey`], [`WorkerId`] the unit of work and its identities
//! - [`EventDescriptor`], [`PollDescriptor`] scheduling metadata stamped by the distributor
//! - [`DescriptorType`], [`DescriptorFlag`], [`CancelReason`] descriptor vocabulary

mod descriptor;
mod event;

pub use descriptor::{CancelReason, DescriptorFlag, DescriptorType, EventDescriptor, PollDescriptor};
pub use event::{Event, EventKey, WorkerId};
