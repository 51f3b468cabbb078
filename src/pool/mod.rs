//! A work-stealing thread pool.
//!
//! Each worker owns a double-ended local queue; all workers share one
//! [`LockedQueue`]. Work submitted from outside the pool lands in the shared
//! queue. Work submitted from inside a task (through its [`TaskContext`])
//! lands at the front of the current worker's local queue, where the owner
//! picks it up first. Idle workers steal from the back of their peers'
//! queues, so the oldest local work migrates and the newest stays hot.
//!
//! A worker looks for work in this order:
//!
//! 1. the front of its own local queue,
//! 2. the shared queue,
//! 3. the back of a peer's local queue, scanning from its own index,
//!
//! and backs off (eventually yielding) when all three are empty.
//!
//! # Example
//!
//! ```
//! use tandem::pool::ThreadPool;
//!
//! let pool = ThreadPool::with_threads(2).unwrap();
//! let (handle, _cancel) = pool.submit(|ctx| {
//!     let (inner, _) = ctx.submit(|_| 20);
//!     while !inner.is_finished() {
//!         ctx.run_pending();
//!     }
//!     inner.wait().unwrap() + 1
//! });
//! assert_eq!(handle.wait(), Ok(21));
//! ```

pub mod config;
mod task;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_utils::{Backoff, CachePadded};
use parking_lot::Mutex;

pub use config::PoolConfig;
pub use task::{CancelHandle, CancelToken, TaskHandle};

use crate::error::PoolError;
use crate::queue::LockedQueue;
use crate::tracing_helpers::{debug_log, error_log, trace_log};
use task::Task;

/// Index of a worker thread within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(usize);

impl WorkerId {
    /// Position of the worker, in `0..pool.worker_count()`.
    pub fn index(self) -> usize {
        self.0
    }
}

/// State shared by the pool handle and all workers.
struct Shared {
    global: LockedQueue<Task>,
    locals: Box<[CachePadded<Mutex<VecDeque<Task>>>]>,
    stop: AtomicBool,
}

impl Shared {
    fn new(workers: usize) -> Self {
        Self {
            global: LockedQueue::new(),
            locals: (0..workers)
                .map(|_| CachePadded::new(Mutex::new(VecDeque::new())))
                .collect(),
            stop: AtomicBool::new(false),
        }
    }

    fn local(&self, worker: Option<WorkerId>) -> Option<&Mutex<VecDeque<Task>>> {
        worker.and_then(|id| self.locals.get(id.0)).map(|q| &**q)
    }

    fn push(&self, worker: Option<WorkerId>, task: Task) {
        match self.local(worker) {
            Some(local) => local.lock().push_front(task),
            None => self.global.push(task),
        }
    }

    fn submit<F, R>(&self, worker: Option<WorkerId>, f: F) -> (TaskHandle<R>, CancelHandle)
    where
        F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle, cancel) = Task::new(f);
        self.push(worker, task);
        (handle, cancel)
    }

    fn find_task(&self, worker: Option<WorkerId>) -> Option<Task> {
        if let Some(local) = self.local(worker) {
            // Bind first so the lock is released before the next step.
            let task = local.lock().pop_front();
            if task.is_some() {
                return task;
            }
        }
        if let Some(task) = self.global.try_pop() {
            return Some(task);
        }
        self.steal(worker)
    }

    fn steal(&self, thief: Option<WorkerId>) -> Option<Task> {
        let n = self.locals.len();
        let start = thief.map_or(0, |id| id.0);
        for i in 0..n {
            let victim = (start + i) % n;
            if thief.is_some_and(|id| id.0 == victim) {
                continue;
            }
            let task = self.locals[victim].lock().pop_back();
            if task.is_some() {
                trace_log!(victim, "stole task");
                return task;
            }
        }
        None
    }

    fn run_pending(&self, worker: Option<WorkerId>) -> bool {
        let Some(task) = self.find_task(worker) else {
            return false;
        };
        // `run` consumes the task, so the context borrows a clone of its token.
        let cancel = task.cancel.clone();
        let ctx = TaskContext {
            shared: self,
            worker,
            cancel: &cancel,
        };
        task.run(&ctx);
        true
    }

    /// Drops every queued task so their handles report abandonment.
    fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.global.try_pop().is_some() {
            dropped += 1;
        }
        for local in self.locals.iter() {
            let tasks: Vec<Task> = local.lock().drain(..).collect();
            dropped += tasks.len();
        }
        dropped
    }
}

/// What a running task sees of the pool it runs on.
pub struct TaskContext<'a> {
    shared: &'a Shared,
    worker: Option<WorkerId>,
    cancel: &'a CancelToken,
}

impl TaskContext<'_> {
    /// The worker running this task, or `None` when it runs on a caller's
    /// thread through [`ThreadPool::run_pending_task`].
    pub fn worker(&self) -> Option<WorkerId> {
        self.worker
    }

    /// Returns `true` if the task's [`CancelHandle`] was used.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The task's cancellation flag, detached from this context.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Submits a child task onto this worker's local queue.
    pub fn submit<F, R>(&self, f: F) -> (TaskHandle<R>, CancelHandle)
    where
        F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.shared.submit(self.worker, f)
    }

    /// Runs one pending task, if any, on the current thread.
    ///
    /// A task waiting on its children should call this in a loop rather than
    /// block, so the worker keeps making progress.
    pub fn run_pending(&self) -> bool {
        self.shared.run_pending(self.worker)
    }
}

/// A fixed set of worker threads with per-worker local queues.
///
/// Dropping the pool requests stop and joins every worker. Tasks still queued
/// at that point are dropped and their handles yield
/// [`TaskError::Abandoned`](crate::error::TaskError::Abandoned).
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Starts `config.threads` workers.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        if config.threads == 0 {
            return Err(PoolError::NoWorkers);
        }

        let shared = Arc::new(Shared::new(config.threads));
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(config.threads),
        };

        for index in 0..config.threads {
            let mut builder =
                thread::Builder::new().name(format!("{}-{index}", config.thread_name_prefix));
            if let Some(bytes) = config.stack_size {
                builder = builder.stack_size(bytes);
            }
            let shared = Arc::clone(&pool.shared);
            let id = WorkerId(index);
            // On error, dropping `pool` stops and joins the workers spawned so far.
            let handle = builder
                .spawn(move || worker_loop(&shared, id))
                .map_err(PoolError::Spawn)?;
            pool.workers.push(handle);
        }

        debug_log!(threads = config.threads, "thread pool started");
        Ok(pool)
    }

    /// Starts a pool with `threads` workers and default settings otherwise.
    pub fn with_threads(threads: usize) -> Result<Self, PoolError> {
        Self::new(PoolConfig::default().with_threads(threads))
    }

    /// Starts a pool with [`PoolConfig::default`], one worker per CPU.
    pub fn with_defaults() -> Result<Self, PoolError> {
        Self::new(PoolConfig::default())
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.locals.len()
    }

    /// Submits a task to the shared queue.
    pub fn submit<F, R>(&self, f: F) -> (TaskHandle<R>, CancelHandle)
    where
        F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.shared.submit(None, f)
    }

    /// Submits a task to `worker`'s local queue, or to the shared queue for
    /// `None` or an index outside this pool.
    pub fn submit_from<F, R>(&self, worker: Option<WorkerId>, f: F) -> (TaskHandle<R>, CancelHandle)
    where
        F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.shared.submit(worker, f)
    }

    /// Runs one pending task on the calling thread, looking in `worker`'s
    /// local queue first. Returns `false` if nothing was pending.
    pub fn run_pending_task(&self, worker: Option<WorkerId>) -> bool {
        self.shared.run_pending(worker)
    }

    /// Asks every worker to stop after its current task.
    pub fn request_stop(&self) {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            debug_log!("thread pool stop requested");
        }
    }

    /// Returns `true` once [`request_stop`](Self::request_stop) was called.
    pub fn is_stopping(&self) -> bool {
        self.shared.stop.load(Ordering::Acquire)
    }

    /// Stops the workers, joins them and abandons any queued tasks.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.request_stop();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error_log!("worker thread panicked outside a task");
            }
        }
        let abandoned = self.shared.drain();
        if abandoned > 0 {
            debug_log!(abandoned, "dropped queued tasks at shutdown");
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.worker_count())
            .field("stopping", &self.is_stopping())
            .finish()
    }
}

fn worker_loop(shared: &Shared, id: WorkerId) {
    debug_log!(worker = id.0, "worker started");
    let backoff = Backoff::new();
    while !shared.stop.load(Ordering::Acquire) {
        if shared.run_pending(Some(id)) {
            backoff.reset();
        } else if backoff.is_completed() {
            thread::yield_now();
        } else {
            backoff.snooze();
        }
    }
    debug_log!(worker = id.0, "worker stopped");
}
