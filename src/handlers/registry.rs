//! # Handler registry: event id → handler, event id → poll spacing.
//!
//! Built once before the distributor starts and shared read-only by every
//! worker. Lookups that cannot succeed are programming errors and panic at the
//! call site.

use std::collections::HashMap;
use std::time::Duration;

use super::HandlerRef;
use crate::model::Event;

#[derive(Default, Clone)]
pub struct Registry {
    handlers: HashMap<String, HandlerRef>,
    spacings: HashMap<String, Duration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a batch of handlers and poll spacings.
    ///
    /// # Panics
    /// If any spacing is zero.
    pub fn register_events<H, S, K>(&mut self, handlers: H, spacings: S) -> &mut Self
    where
        H: IntoIterator<Item = (K, HandlerRef)>,
        S: IntoIterator<Item = (K, Duration)>,
        K: Into<String>,
    {
        for (id, h) in handlers {
            self.register_handler(id, h);
        }
        for (id, s) in spacings {
            self.register_poll_spacing(id, s);
        }
        self
    }

    /// Registers `handler` for event id `id`, replacing any previous one.
    pub fn register_handler(&mut self, id: impl Into<String>, handler: HandlerRef) -> &mut Self {
        self.handlers.insert(id.into(), handler);
        self
    }

    /// Sets the default poll spacing for event id `id`.
    ///
    /// # Panics
    /// If `spacing` is zero.
    pub fn register_poll_spacing(&mut self, id: impl Into<String>, spacing: Duration) -> &mut Self {
        let id = id.into();
        assert!(
            !spacing.is_zero(),
            "poll spacing for event `{id}` must be greater than zero"
        );
        self.spacings.insert(id, spacing);
        self
    }

    /// Handler for the event, honoring the `handler` override.
    pub fn handler_for(&self, event: &Event) -> Option<HandlerRef> {
        self.handlers.get(event.handler_name()).cloned()
    }

    /// # Panics
    /// If no handler is registered for the event.
    pub fn require_handler(&self, event: &Event) -> HandlerRef {
        match self.handler_for(event) {
            Some(h) => h,
            None => panic!("no handler registered for event `{}`", event.handler_name()),
        }
    }

    /// Spacing to use for a poll of `id`: `explicit`, else the registered one.
    ///
    /// # Panics
    /// If neither is available, or `explicit` is zero.
    pub fn resolve_spacing(&self, id: &str, explicit: Option<Duration>) -> Duration {
        match explicit.or_else(|| self.spacings.get(id).copied()) {
            Some(s) if !s.is_zero() => s,
            Some(_) => panic!("poll spacing for event `{id}` must be greater than zero"),
            None => panic!("no poll spacing given or registered for event `{id}`"),
        }
    }

    /// # Panics
    /// If `max_times` is `Some(0)`.
    pub fn check_max_times(id: &str, max_times: Option<u32>) {
        assert!(
            max_times != Some(0),
            "poll max_times for event `{id}` must be greater than zero"
        );
    }

    pub fn spacing(&self, id: &str) -> Option<Duration> {
        self.spacings.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("Registry")
            .field("handlers", &ids)
            .field("spacings", &self.spacings)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::handlers::{Context, HandlerFn};

    fn noop() -> HandlerRef {
        HandlerFn::arc("noop", |_ctx: Context, _ev: Event| async {
            Ok::<_, HandlerError>(())
        })
    }

    #[test]
    fn override_selects_other_handler() {
        let mut r = Registry::new();
        r.register_handler("fallback", noop());

        assert!(r.handler_for(&Event::new("dev.sync")).is_none());
        assert!(r.handler_for(&Event::new("dev.sync").with_handler("fallback")).is_some());
    }

    #[test]
    fn register_events_takes_both_tables() {
        let mut r = Registry::new();
        r.register_events(
            [("sensor", noop()), ("deploy", noop())],
            [("sensor", Duration::from_secs(2))],
        );
        assert_eq!(r.len(), 2);
        assert_eq!(r.spacing("sensor"), Some(Duration::from_secs(2)));
        assert_eq!(r.spacing("deploy"), None);
    }

    #[test]
    fn explicit_spacing_wins() {
        let mut r = Registry::new();
        r.register_poll_spacing("sensor", Duration::from_secs(5));
        assert_eq!(r.resolve_spacing("sensor", None), Duration::from_secs(5));
        assert_eq!(
            r.resolve_spacing("sensor", Some(Duration::from_millis(10))),
            Duration::from_millis(10)
        );
    }

    #[test]
    #[should_panic(expected = "must be greater than zero")]
    fn zero_spacing_panics() {
        Registry::new().register_poll_spacing("sensor", Duration::ZERO);
    }

    #[test]
    #[should_panic(expected = "no poll spacing")]
    fn missing_spacing_panics() {
        Registry::new().resolve_spacing("sensor", None);
    }

    #[test]
    #[should_panic(expected = "no handler registered for event `ghost`")]
    fn missing_handler_panics() {
        Registry::new().require_handler(&Event::new("ghost"));
    }
}
