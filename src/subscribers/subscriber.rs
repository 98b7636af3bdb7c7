//! # Notice subscriber trait.
//!
//! Provides [`Subscribe`] an extension point for plugging custom notice handlers into the runtime.
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently)
//! - **Per-subscriber bounded queue** (capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (panics are caught and reported as `NoticeKind::SubscriberPanicked`)
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use eventvisor::{Notice, NoticeKind, Subscribe};
//!
//! struct Failures;
//!
//! #[async_trait]
//! impl Subscribe for Failures {
//!     async fn on_notice(&self, n: &Notice) {
//!         if matches!(n.kind, NoticeKind::EventFailed) {
//!             // export a metric, etc.
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "failures" }
//! }
//! ```

use async_trait::async_trait;

use crate::notices::Notice;

/// Notice subscriber for runtime observability.
///
/// ### Implementation requirements
/// - Use async I/O; avoid blocking the executor.
/// - Handle errors internally.
/// - Slow processing affects only this subscriber's queue.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single notice. Notices arrive in FIFO order per subscriber.
    async fn on_notice(&self, notice: &Notice);

    /// Subscriber name used in logs and overflow/panic notices.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
