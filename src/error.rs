//! Error types surfaced by the containers and the pool.
//!
//! Only resource exhaustion and task-level failures reach callers. An empty
//! container is reported as `None`, and CAS contention is always retried
//! internally.

use thiserror::Error;

/// Failure to obtain a hazard-pointer slot for the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HazardError {
    /// Every slot in the registry is owned by another live thread.
    ///
    /// This means the registry was sized for fewer threads than actually
    /// participate. The thread cannot safely pop and should not retry.
    #[error("hazard pointer registry exhausted: all {capacity} slots are owned")]
    Exhausted {
        /// Size of the slot table.
        capacity: usize,
    },
    /// The calling thread is exiting and its slot records are already gone.
    #[error("hazard pointer requested while the thread is exiting")]
    ThreadExiting,
}

/// Failure to start a [`ThreadPool`](crate::pool::ThreadPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// The configuration asked for zero worker threads.
    #[error("thread pool needs at least one worker")]
    NoWorkers,
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread")]
    Spawn(#[source] std::io::Error),
}

/// Why a submitted task did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task panicked; the payload message is kept when it was a string.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The task was cancelled before a worker started it.
    #[error("task was cancelled before it started")]
    Cancelled,
    /// The pool shut down with the task still queued.
    #[error("task was dropped before it ran")]
    Abandoned,
}
