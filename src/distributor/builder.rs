//! # Builder for a [`Distributor`].
//!
//! ```text
//! Distributor::builder(cfg)
//!     .with_registry(registry)      // handlers + poll spacings
//!     .with_subscribers(subs)       // notice sinks (LogWriter, custom)
//!     .start()                      // spawns cfg.workers workers + links
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::Distributor;
use super::inner::Inner;
use super::link;
use super::state::State;
use crate::config::Config;
use crate::handlers::{HandlerRef, Registry};
use crate::model::WorkerId;
use crate::notices::{Bus, Notice, NoticeKind};
use crate::subscribers::{Subscribe, SubscriberSet};

pub struct DistributorBuilder {
    cfg: Config,
    registry: Registry,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl DistributorBuilder {
    pub(crate) fn new(cfg: Config) -> Self {
        Self {
            cfg,
            registry: Registry::new(),
            subscribers: Vec::new(),
        }
    }

    /// Replaces the handler registry.
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Registers one handler.
    pub fn with_handler(mut self, id: impl Into<String>, handler: HandlerRef) -> Self {
        self.registry.register_handler(id, handler);
        self
    }

    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    /// Spawns the workers and returns the running distributor.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(self) -> Distributor {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let token = CancellationToken::new();
        let registry = Arc::new(self.registry);

        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        if !subs.is_empty() {
            subscriber_listener(&bus, Arc::clone(&subs));
        }

        let mut links = BTreeMap::new();
        let mut pending = Vec::new();
        for i in 0..self.cfg.workers_clamped() {
            let (wl, p) = link::spawn_worker(WorkerId(i), &registry, &self.cfg, &token);
            links.insert(WorkerId(i), wl);
            pending.push(p);
        }

        let inner = Arc::new(Inner {
            cfg: self.cfg,
            registry,
            bus,
            token,
            state: Mutex::new(State::with_links(links)),
        });

        for p in pending {
            let id = p.id;
            link::start_io(&inner, p);
            inner.publish(Notice::new(NoticeKind::WorkerStarted).with_worker(id));
        }
        tracing::info!(
            workers = inner.cfg.workers_clamped(),
            pool = inner.cfg.pool_size,
            "distributor started"
        );

        Distributor { inner, subs }
    }
}

/// Forwards bus notices to the subscriber set (fire-and-forget).
fn subscriber_listener(bus: &Bus, set: Arc<SubscriberSet>) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(n) => set.emit(&n),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber listener lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
