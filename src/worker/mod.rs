//! # Worker side: stream loop, dispatch and handler pool.

mod dispatch;
mod pool;
mod runtime;

pub use runtime::Worker;
