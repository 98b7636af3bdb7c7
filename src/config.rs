//! # Runtime configuration.
//!
//! Provides [`Config`] centralized settings for the distributor and its workers.
//!
//! ## Sentinel values
//! - `pool_size = 0` → synchronous dispatch inside the worker loop (deterministic tests)
//! - `grace = 0s` → do not wait for workers on shutdown

use std::time::Duration;

/// Global configuration for the distributor runtime.
///
/// ## Field semantics
/// - `workers`: number of workers spawned by [`DistributorBuilder::start`](crate::DistributorBuilder::start)
/// - `pool_size`: concurrent handler invocations per worker (`0` = in-loop)
/// - `channel_buffer`: byte capacity of each in-process worker stream
/// - `outbox_capacity`: queued frames per stream writer before senders wait
/// - `bus_capacity`: notice bus ring buffer size (min 1)
/// - `default_max_times`: poll retry budget when the caller gives none
/// - `grace`: maximum wait for workers to stop on shutdown
#[derive(Clone, Debug)]
pub struct Config {
    /// Number of workers to spawn.
    pub workers: usize,

    /// Size of each worker's handler pool.
    ///
    /// - `0` = handlers run inline in the worker loop, one at a time
    /// - `n > 0` = at most `n` handlers run concurrently per worker
    pub pool_size: usize,

    /// Byte buffer of each duplex worker stream.
    pub channel_buffer: usize,

    /// Capacity of the frame queue feeding each stream writer.
    pub outbox_capacity: usize,

    /// Capacity of the notice bus.
    ///
    /// Slow subscribers lagging behind more than `bus_capacity` notices skip older ones.
    pub bus_capacity: usize,

    /// Poll retry budget used when `poll_event` is called without `max_times`.
    pub default_max_times: u32,

    /// Maximum time to wait for workers during shutdown.
    pub grace: Duration,
}

impl Config {
    /// Returns the pool size as an `Option` (`None` → synchronous dispatch).
    #[inline]
    pub fn pool_limit(&self) -> Option<usize> {
        if self.pool_size == 0 {
            None
        } else {
            Some(self.pool_size)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the worker count clamped to a minimum of 1.
    #[inline]
    pub fn workers_clamped(&self) -> usize {
        self.workers.max(1)
    }

    #[inline]
    pub fn outbox_capacity_clamped(&self) -> usize {
        self.outbox_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `workers = 2`
    /// - `pool_size = 4`
    /// - `channel_buffer = 64 KiB`
    /// - `outbox_capacity = 1024`
    /// - `bus_capacity = 1024`
    /// - `default_max_times = 60`
    /// - `grace = 10s`
    fn default() -> Self {
        Self {
            workers: 2,
            pool_size: 4,
            channel_buffer: 64 * 1024,
            outbox_capacity: 1024,
            bus_capacity: 1024,
            default_max_times: 60,
            grace: Duration::from_secs(10),
        }
    }
}
