//! Tasks, their result handles and cancellation flags.
//!
//! A submitted closure is boxed into a [`Task`] together with the sending
//! half of a one-shot result slot. The caller keeps the receiving half
//! ([`TaskHandle`]). If the task is dropped without running (the pool shut
//! down first), the sender's `Drop` marks the slot abandoned so a waiting
//! caller is never left hanging.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::TaskContext;
use crate::error::TaskError;
use crate::tracing_helpers::warn_log;

/// Type-erased unit of work queued in the pool.
pub(crate) struct Task {
    pub(crate) cancel: CancelToken,
    job: Box<dyn FnOnce(&TaskContext<'_>) + Send>,
}

impl Task {
    /// Wraps `f`, returning the task plus the caller's two handles.
    pub(crate) fn new<F, R>(f: F) -> (Self, TaskHandle<R>, CancelHandle)
    where
        F: FnOnce(&TaskContext<'_>) -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::new(ResultSlot {
            state: Mutex::new(SlotState::Pending),
            done: Condvar::new(),
        });
        let sender = ResultSender {
            slot: Some(Arc::clone(&slot)),
        };
        let cancel = CancelToken::new();

        let job = move |ctx: &TaskContext<'_>| {
            if ctx.is_cancelled() {
                sender.complete(Err(TaskError::Cancelled));
                return;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(ctx))).map_err(|payload| {
                let message = panic_message(&*payload);
                warn_log!(%message, "task panicked");
                TaskError::Panicked(message)
            });
            sender.complete(outcome);
        };

        let task = Self {
            cancel: cancel.clone(),
            job: Box::new(job),
        };
        (task, TaskHandle { slot }, CancelHandle { token: cancel })
    }

    pub(crate) fn run(self, ctx: &TaskContext<'_>) {
        (self.job)(ctx);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

enum SlotState<R> {
    Pending,
    Ready(Result<R, TaskError>),
    Taken,
}

struct ResultSlot<R> {
    state: Mutex<SlotState<R>>,
    done: Condvar,
}

struct ResultSender<R> {
    slot: Option<Arc<ResultSlot<R>>>,
}

impl<R> ResultSender<R> {
    fn complete(mut self, result: Result<R, TaskError>) {
        if let Some(slot) = self.slot.take() {
            Self::fill(&slot, result);
        }
    }

    fn fill(slot: &ResultSlot<R>, result: Result<R, TaskError>) {
        let mut state = slot.state.lock();
        if matches!(*state, SlotState::Pending) {
            *state = SlotState::Ready(result);
        }
        drop(state);
        slot.done.notify_all();
    }
}

impl<R> Drop for ResultSender<R> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            Self::fill(&slot, Err(TaskError::Abandoned));
        }
    }
}

/// Receives the outcome of one submitted task.
///
/// The outcome can be taken once. After that, [`try_take`](Self::try_take)
/// and [`wait_timeout`](Self::wait_timeout) return `None` and
/// [`wait`](Self::wait) returns [`TaskError::Abandoned`].
pub struct TaskHandle<R> {
    slot: Arc<ResultSlot<R>>,
}

impl<R> TaskHandle<R> {
    /// Blocks until the task finishes (or is skipped or dropped).
    pub fn wait(self) -> Result<R, TaskError> {
        let mut state = self.slot.state.lock();
        loop {
            match std::mem::replace(&mut *state, SlotState::Taken) {
                SlotState::Ready(result) => return result,
                SlotState::Taken => return Err(TaskError::Abandoned),
                SlotState::Pending => {
                    *state = SlotState::Pending;
                    self.slot.done.wait(&mut state);
                }
            }
        }
    }

    /// Like [`wait`](Self::wait), but returns `None` if the task is still
    /// pending after `timeout`. A timeout too large to express as a deadline
    /// waits without one.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<Result<R, TaskError>> {
        let mut state = self.slot.state.lock();
        if matches!(*state, SlotState::Pending) {
            let deadline = Instant::now().checked_add(timeout);
            while matches!(*state, SlotState::Pending) {
                match deadline {
                    Some(deadline) => {
                        if self.slot.done.wait_until(&mut state, deadline).timed_out() {
                            break;
                        }
                    }
                    None => self.slot.done.wait(&mut state),
                }
            }
        }
        Self::take_ready(&mut state)
    }

    /// Takes the outcome if the task has finished.
    pub fn try_take(&mut self) -> Option<Result<R, TaskError>> {
        Self::take_ready(&mut self.slot.state.lock())
    }

    /// Returns `true` once an outcome is available (or was already taken).
    pub fn is_finished(&self) -> bool {
        !matches!(*self.slot.state.lock(), SlotState::Pending)
    }

    fn take_ready(state: &mut SlotState<R>) -> Option<Result<R, TaskError>> {
        match std::mem::replace(state, SlotState::Taken) {
            SlotState::Ready(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }
}

impl<R> std::fmt::Debug for TaskHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Read side of a task's cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once the matching [`CancelHandle`] was used.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Requests cooperative cancellation of one task.
///
/// A task that has not started yet is skipped. A running task only stops if
/// it polls [`TaskContext::is_cancelled`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancelToken,
}

impl CancelHandle {
    /// Sets the cancellation flag.
    pub fn cancel(&self) {
        self.token.flag.store(true, Ordering::Release);
    }

    /// Returns `true` if [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A token that can be moved into other code to observe the flag.
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }
}
