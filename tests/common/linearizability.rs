//! A small Wing–Gong linearizability checker.
//!
//! Threads record each call with an invocation and a response timestamp
//! from a shared clock. The checker then searches, depth first, for a total
//! order that respects real time (a call that responded before another was
//! invoked must come first) and that a sequential model accepts step by
//! step. The search is exponential, so histories are kept to a dozen calls.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// One container call and what it returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op<T> {
    Push(T),
    Pop(Option<T>),
}

#[derive(Debug, Clone)]
pub struct Event<T> {
    pub thread: usize,
    pub op: Op<T>,
    pub invoke: u64,
    pub respond: u64,
}

/// Collects events from concurrently running threads.
pub struct History<T> {
    clock: AtomicU64,
    events: Mutex<Vec<Event<T>>>,
}

impl<T> History<T> {
    pub fn new() -> Self {
        Self {
            clock: AtomicU64::new(0),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Runs `call`, stamping it before and after.
    pub fn record(&self, thread: usize, call: impl FnOnce() -> Op<T>) {
        let invoke = self.clock.fetch_add(1, Ordering::SeqCst);
        let op = call();
        let respond = self.clock.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push(Event {
            thread,
            op,
            invoke,
            respond,
        });
    }

    pub fn into_events(self) -> Vec<Event<T>> {
        self.events.into_inner()
    }
}

/// A sequential specification.
pub trait Model: Clone {
    type Value: Clone + PartialEq + Debug;

    /// Applies `op`; returns `false` if the recorded result is impossible.
    fn apply(&mut self, op: &Op<Self::Value>) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct StackModel<T>(Vec<T>);

impl<T: Clone + PartialEq + Debug> Model for StackModel<T> {
    type Value = T;

    fn apply(&mut self, op: &Op<T>) -> bool {
        match op {
            Op::Push(v) => {
                self.0.push(v.clone());
                true
            }
            Op::Pop(seen) => self.0.pop() == *seen,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueModel<T>(VecDeque<T>);

impl<T: Clone + PartialEq + Debug> Model for QueueModel<T> {
    type Value = T;

    fn apply(&mut self, op: &Op<T>) -> bool {
        match op {
            Op::Push(v) => {
                self.0.push_back(v.clone());
                true
            }
            Op::Pop(seen) => self.0.pop_front() == *seen,
        }
    }
}

/// Returns `true` if some real-time-respecting order of `events` is legal
/// for `model`.
pub fn is_linearizable<M: Model>(events: &[Event<M::Value>], model: M) -> bool {
    let mut done = vec![false; events.len()];
    search(events, &mut done, &model)
}

fn search<M: Model>(events: &[Event<M::Value>], done: &mut [bool], model: &M) -> bool {
    if done.iter().all(|&d| d) {
        return true;
    }
    // Among pending calls, the earliest response bounds which may go next.
    let horizon = events
        .iter()
        .zip(done.iter())
        .filter(|(_, &d)| !d)
        .map(|(e, _)| e.respond)
        .min()
        .unwrap_or(u64::MAX);

    for i in 0..events.len() {
        if done[i] || events[i].invoke > horizon {
            continue;
        }
        let mut next = model.clone();
        if !next.apply(&events[i].op) {
            continue;
        }
        done[i] = true;
        if search(events, done, &next) {
            return true;
        }
        done[i] = false;
    }
    false
}
