//! # Bounded handler pool of one worker.
//!
//! ```text
//! run(job)
//!   ├─ limit = None ─► job.await inline (reader loop blocked until it finishes)
//!   └─ limit = Some(n) ─► acquire permit ─► JoinSet::spawn(job; drop permit)
//! ```
//!
//! Acquiring the permit happens in the reader loop, so a saturated pool
//! stops reading the stream and backpressure reaches the distributor.

use std::{future::Future, sync::Arc};

use tokio::{sync::Semaphore, task::JoinSet};

pub(crate) struct Pool {
    semaphore: Option<Arc<Semaphore>>,
    jobs: JoinSet<()>,
}

impl Pool {
    /// `None` runs every job inline.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            semaphore: limit.map(|n| Arc::new(Semaphore::new(n))),
            jobs: JoinSet::new(),
        }
    }

    pub async fn run<F>(&mut self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(sem) = &self.semaphore else {
            job.await;
            return;
        };
        let Ok(permit) = Arc::clone(sem).acquire_owned().await else {
            return;
        };
        self.jobs.spawn(async move {
            let _permit = permit;
            job.await;
        });
    }

    /// Reaps one finished job; pending forever while the pool is idle.
    pub async fn reap(&mut self) {
        match self.jobs.join_next().await {
            Some(Err(e)) if e.is_panic() => tracing::error!("pool job panicked outside its guard"),
            Some(_) => {}
            None => std::future::pending().await,
        }
    }

    /// Waits for every running job.
    pub async fn drain(&mut self) {
        while self.jobs.join_next().await.is_some() {}
    }

    pub fn running(&self) -> usize {
        self.jobs.len()
    }
}
