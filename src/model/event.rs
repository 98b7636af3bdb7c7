//! # Event: a named unit of work with an opaque payload.
//!
//! Events are plain values. They are copied across the worker stream on every
//! hop, so everything here is `Serialize + Deserialize` and nothing is shared.
//!
//! ## Example
//! ```rust
//! use eventvisor::Event;
//! use serde_json::json;
//!
//! let ev = Event::new("pool.resize")
//!     .with_key("pool-7")
//!     .with_data(json!({ "size": 4 }))
//!     .serialized();
//!
//! assert_eq!(ev.binding(), "pool-7");
//! assert!(ev.serialize);
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::descriptor::{DescriptorFlag, DescriptorType, EventDescriptor};

/// Identifier of a worker attached to the distributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// `(id, key)` identity of an event; addresses a node inside a graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl EventKey {
    pub fn new(id: impl Into<String>, key: Option<String>) -> Self {
        Self { id: id.into(), key }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(k) => write!(f, "{}[{}]", self.id, k),
            None => f.write_str(&self.id),
        }
    }
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event-type name; selects the handler.
    pub id: String,
    /// Optional entity identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Opaque payload.
    #[serde(default)]
    pub data: Value,
    /// Serialization key (see [`Event::binding`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binding_key: Option<String>,
    /// Participate in per-key mutual exclusion.
    #[serde(default)]
    pub serialize: bool,
    /// Timeout in seconds after scheduling; the event is cancelled with `EXPIRED` when it elapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u64>,
    /// Name of a registered handler to use instead of the one registered for `id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Graph this event is a node of.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<Uuid>,
    /// Worker the event is routed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_attached: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub descriptor: Option<EventDescriptor>,
}

impl Event {
    /// Creates an event of type `id` with a null payload.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: None,
            data: Value::Null,
            binding_key: None,
            serialize: false,
            lifetime: None,
            handler: None,
            graph: None,
            worker_attached: None,
            descriptor: None,
        }
    }

    #[inline]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[inline]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }

    #[inline]
    pub fn with_binding_key(mut self, binding: impl Into<String>) -> Self {
        self.binding_key = Some(binding.into());
        self
    }

    /// Marks the event for per-key serialization.
    #[inline]
    pub fn serialized(mut self) -> Self {
        self.serialize = true;
        self
    }

    #[inline]
    pub fn with_serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }

    #[inline]
    pub fn with_lifetime(mut self, secs: u64) -> Self {
        self.lifetime = Some(secs);
        self
    }

    #[inline]
    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }

    /// Pins the event to a worker.
    #[inline]
    pub fn on_worker(mut self, worker: WorkerId) -> Self {
        self.worker_attached = Some(worker);
        self
    }

    /// Effective serialization key: `binding_key`, else `key`, else `id`.
    pub fn binding(&self) -> &str {
        self.binding_key
            .as_deref()
            .or(self.key.as_deref())
            .unwrap_or(&self.id)
    }

    /// Name used to look up the handler.
    #[inline]
    pub fn handler_name(&self) -> &str {
        self.handler.as_deref().unwrap_or(&self.id)
    }

    pub fn event_key(&self) -> EventKey {
        EventKey::new(self.id.clone(), self.key.clone())
    }

    /// Correlation id, once scheduled.
    #[inline]
    pub fn uuid(&self) -> Option<Uuid> {
        self.descriptor.as_ref().map(|d| d.uuid)
    }

    #[inline]
    pub fn kind(&self) -> Option<DescriptorType> {
        self.descriptor.as_ref().map(|d| d.kind)
    }

    #[inline]
    pub fn flag(&self) -> Option<DescriptorFlag> {
        self.descriptor.as_ref().map(|d| d.flag)
    }

    #[inline]
    pub fn lifetime_duration(&self) -> Option<Duration> {
        self.lifetime.map(Duration::from_secs)
    }

    /// Stamps a fresh `{SCHEDULE, NEW}` descriptor.
    pub(crate) fn stamp(&mut self, owner: Option<WorkerId>) -> Uuid {
        let descriptor = EventDescriptor::schedule(owner);
        let uuid = descriptor.uuid;
        self.descriptor = Some(descriptor);
        uuid
    }

    /// Returns the correlation id, stamping a descriptor first if the event has none.
    pub(crate) fn ensure_stamped(&mut self, owner: Option<WorkerId>) -> Uuid {
        match self.uuid() {
            Some(uuid) => uuid,
            None => self.stamp(owner),
        }
    }

    pub(crate) fn set_kind(&mut self, kind: DescriptorType) {
        if let Some(d) = self.descriptor.as_mut() {
            d.kind = kind;
        }
    }

    pub(crate) fn set_flag(&mut self, flag: DescriptorFlag) {
        if let Some(d) = self.descriptor.as_mut() {
            d.flag = flag;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn binding_falls_back_to_key_then_id() {
        let ev = Event::new("svc.start");
        assert_eq!(ev.binding(), "svc.start");

        let ev = ev.with_key("svc-1");
        assert_eq!(ev.binding(), "svc-1");

        let ev = ev.with_binding_key("pool-9");
        assert_eq!(ev.binding(), "pool-9");
    }

    #[test]
    fn handler_override_wins() {
        let ev = Event::new("dev.sync");
        assert_eq!(ev.handler_name(), "dev.sync");
        assert_eq!(ev.with_handler("dev.fallback").handler_name(), "dev.fallback");
    }

    #[test]
    fn ensure_stamped_is_stable() {
        let mut ev = Event::new("a");
        assert!(ev.uuid().is_none());
        let first = ev.ensure_stamped(Some(WorkerId(1)));
        let second = ev.ensure_stamped(None);
        assert_eq!(first, second);
        assert_eq!(ev.descriptor.as_ref().and_then(|d| d.owner), Some(WorkerId(1)));

        let restamped = ev.stamp(None);
        assert_ne!(first, restamped);
    }

    #[test]
    fn json_form_omits_unset_fields() {
        let ev = Event::new("a").with_data(json!({"n": 1}));
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v, json!({"id": "a", "data": {"n": 1}, "serialize": false}));
    }

    #[test]
    fn event_key_display() {
        assert_eq!(Event::new("a").event_key().to_string(), "a");
        assert_eq!(Event::new("a").with_key("k").event_key().to_string(), "a[k]");
    }
}
