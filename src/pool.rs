//! CPU pool shared by every mapper in the process.
//!
//! Backed by rayon. Jobs may borrow from the caller, and a job may fan out
//! again on the same pool: a thread waiting on its batch steals queued work.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use thiserror::Error;
use tracing::debug;

static GLOBAL: OnceCell<Arc<WorkerPool>> = OnceCell::new();

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Global worker pool is already initialized")]
    AlreadyInitialized,

    #[error("Worker pool needs at least one thread")]
    NoThreads,

    #[error("Failed to start worker pool: {0}")]
    Build(#[from] ThreadPoolBuildError),
}

/// A dedicated rayon pool, or the process-wide one when `dedicated` is `None`
pub struct WorkerPool {
    dedicated: Option<ThreadPool>,
}

fn builder(threads: usize) -> ThreadPoolBuilder {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|id| format!("domain-mapper-{}", id))
}

impl WorkerPool {
    /// A pool of its own with `threads` workers
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        if threads == 0 {
            return Err(PoolError::NoThreads);
        }
        let pool = builder(threads).build()?;
        debug!(threads, "worker pool started");
        Ok(Self { dedicated: Some(pool) })
    }

    /// The process-wide pool, sized by the number of CPUs on first use
    pub fn global() -> Arc<WorkerPool> {
        Arc::clone(GLOBAL.get_or_init(|| {
            let threads = num_cpus::get();
            match builder(threads).build_global() {
                Ok(()) => debug!(threads, "global worker pool started"),
                Err(e) => debug!(error = %e, "reusing the rayon global pool"),
            }
            Arc::new(WorkerPool { dedicated: None })
        }))
    }

    /// Sizes the process-wide pool explicitly; only possible before first use
    pub fn init_global(threads: usize) -> Result<Arc<WorkerPool>, PoolError> {
        if threads == 0 {
            return Err(PoolError::NoThreads);
        }
        if GLOBAL.get().is_some() {
            return Err(PoolError::AlreadyInitialized);
        }

        builder(threads).build_global()?;
        GLOBAL
            .set(Arc::new(WorkerPool { dedicated: None }))
            .map_err(|_| PoolError::AlreadyInitialized)?;
        debug!(threads, "global worker pool started");
        Ok(Self::global())
    }

    pub fn threads(&self) -> usize {
        match &self.dedicated {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Runs `f` over `items` on the pool and returns the results in input order.
    ///
    /// Does not return until every job has finished. A panic in a job is
    /// re-raised here.
    pub fn map_scoped<T, R, F>(&self, items: Vec<T>, f: F) -> Vec<R>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Send + Sync,
    {
        if items.len() <= 1 {
            return items.into_iter().map(f).collect();
        }

        match &self.dedicated {
            Some(pool) => pool.install(|| items.into_par_iter().map(f).collect()),
            None => items.into_par_iter().map(f).collect(),
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("dedicated", &self.dedicated.is_some())
            .field("threads", &self.threads())
            .finish()
    }
}
