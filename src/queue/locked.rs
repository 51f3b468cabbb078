//! An unbounded MPMC queue guarded by two fine-grained locks.
//!
//! The list always holds a dummy node at the tail. The head lock covers the
//! head pointer and popping; the tail lock covers the tail pointer and
//! pushing. Because of the dummy, a push and a pop never touch the same node
//! unless the queue is empty, and that case is decided by comparing head
//! against tail under both locks (always taken head first).
//!
//! Consumers can block in [`LockedQueue::wait_and_pop`] on a condition
//! variable paired with the head lock. A producer only touches the head lock
//! to notify when the waiter count says someone may be blocked.

use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::traits::ConcurrentQueue;

struct Node<T> {
    data: Option<T>,
    next: *mut Node<T>,
}

impl<T> Node<T> {
    fn dummy() -> *mut Self {
        Box::into_raw(Box::new(Self {
            data: None,
            next: ptr::null_mut(),
        }))
    }
}

/// A two-lock queue with blocking pop.
pub struct LockedQueue<T> {
    head: Mutex<*mut Node<T>>,
    tail: Mutex<*mut Node<T>>,
    ready: Condvar,
    /// Consumers inside a blocking pop. Raised under the head lock.
    waiters: AtomicUsize,
}

// Safety: the raw node pointers are only dereferenced under the lock that owns
// them, and values move between threads by ownership.
unsafe impl<T: Send> Send for LockedQueue<T> {}
unsafe impl<T: Send> Sync for LockedQueue<T> {}

impl<T> LockedQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        let dummy = Node::dummy();
        Self {
            head: Mutex::new(dummy),
            tail: Mutex::new(dummy),
            ready: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    /// Appends `value` and wakes one waiting consumer.
    pub fn push(&self, value: T) {
        let fresh = Node::dummy();
        {
            let mut tail = self.tail.lock();
            // SAFETY: the tail node is owned by whoever holds the tail lock.
            unsafe {
                (**tail).data = Some(value);
                (**tail).next = fresh;
            }
            *tail = fresh;
        }
        // A waiter registers before its last emptiness check (which takes
        // the tail lock), so either it saw this value or it is counted here.
        // Taking the head lock orders the notify after its wait began.
        if self.waiters.load(Ordering::SeqCst) > 0 {
            drop(self.head.lock());
            self.ready.notify_one();
        }
    }

    /// Removes the front value without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut head = self.head.lock();
        self.pop_locked(&mut head)
    }

    /// Removes the front value, blocking until one is available.
    pub fn wait_and_pop(&self) -> T {
        let mut head = self.head.lock();
        loop {
            if let Some(value) = self.wait_locked(&mut head, None) {
                return value;
            }
        }
    }

    /// Like [`wait_and_pop`](Self::wait_and_pop), but gives up after `timeout`.
    ///
    /// A timeout too large to express as a deadline waits without one.
    pub fn wait_and_pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut head = self.head.lock();
        if let Some(value) = self.pop_locked(&mut head) {
            return Some(value);
        }
        let deadline = Instant::now().checked_add(timeout);
        self.wait_locked(&mut head, deadline)
    }

    /// Returns `true` if the queue was empty when inspected.
    pub fn is_empty(&self) -> bool {
        let head = self.head.lock();
        *head == *self.tail.lock()
    }

    /// Pops, sleeping on `ready` until a value arrives or `deadline` passes.
    fn wait_locked(
        &self,
        head: &mut MutexGuard<'_, *mut Node<T>>,
        deadline: Option<Instant>,
    ) -> Option<T> {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let value = loop {
            if let Some(value) = self.pop_locked(head) {
                break Some(value);
            }
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(head, deadline).timed_out() {
                        break self.pop_locked(head);
                    }
                }
                None => self.ready.wait(head),
            }
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        value
    }

    fn pop_locked(&self, head: &mut MutexGuard<'_, *mut Node<T>>) -> Option<T> {
        if **head == *self.tail.lock() {
            return None;
        }
        // SAFETY: the head node is not the tail, so it is fully written and
        // owned by the head-lock holder.
        let old = unsafe { Box::from_raw(**head) };
        **head = old.next;
        old.data
    }
}

impl<T> Default for LockedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for LockedQueue<T> {
    fn drop(&mut self) {
        let mut cur = *self.head.get_mut();
        while !cur.is_null() {
            // SAFETY: exclusive access; every node was boxed by this queue.
            let node = unsafe { Box::from_raw(cur) };
            cur = node.next;
        }
    }
}

impl<T: Send> ConcurrentQueue<T> for LockedQueue<T> {
    fn push(&self, value: T) {
        LockedQueue::push(self, value);
    }

    fn pop(&self) -> Option<T> {
        self.try_pop()
    }

    fn is_empty(&self) -> bool {
        LockedQueue::is_empty(self)
    }
}
