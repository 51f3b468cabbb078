//! A lock-free, unbounded, multi-producer multi-consumer FIFO queue.
//!
//! Nodes are reference counted (`Arc`), and the head, tail and every `next`
//! link are atomically swappable `Arc`s (`arc-swap`). A node is freed once no
//! link and no in-flight operation holds it, so no separate reclamation
//! scheme is needed.
//!
//! The queue always ends in an empty node. A producer claims that node by
//! CASing its payload slot from empty to its value, then links a fresh empty
//! node behind it and swings `tail`. A producer that loses the payload race
//! does not wait: it helps by linking the next node and swinging `tail`
//! itself, then retries. No producer can stall another halfway through its
//! update.

use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use crossbeam_utils::{Backoff, CachePadded};

use crate::traits::ConcurrentQueue;

struct Node<T> {
    /// Null until a producer claims the node; set at most once.
    data: AtomicPtr<T>,
    next: ArcSwapOption<Node<T>>,
}

impl<T> Node<T> {
    fn empty() -> Arc<Self> {
        Arc::new(Self {
            data: AtomicPtr::new(ptr::null_mut()),
            next: ArcSwapOption::empty(),
        })
    }
}

/// A lock-free unbounded MPMC queue with reference-counted nodes.
pub struct MpmcQueue<T> {
    head: CachePadded<ArcSwap<Node<T>>>,
    tail: CachePadded<ArcSwap<Node<T>>>,
    _owns: PhantomData<Box<T>>,
}

// Safety: values are handed from one thread to another, never shared.
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Creates an empty queue (a single empty node, referenced by both ends).
    pub fn new() -> Self {
        let sentinel = Node::empty();
        Self {
            head: CachePadded::new(ArcSwap::new(Arc::clone(&sentinel))),
            tail: CachePadded::new(ArcSwap::new(sentinel)),
            _owns: PhantomData,
        }
    }

    /// Appends `value` at the back of the queue.
    pub fn push(&self, value: T) {
        let data = Box::into_raw(Box::new(value));
        let mut spare = Node::empty();
        let none: Option<Arc<Node<T>>> = None;
        let backoff = Backoff::new();

        loop {
            let old_tail = self.tail.load_full();
            // AcqRel/Acquire: a helper that sees the slot taken must also see
            // the payload, since it then publishes the link a popper follows.
            if old_tail
                .data
                .compare_exchange(ptr::null_mut(), data, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                let linked = old_tail.next.compare_and_swap(&none, Some(Arc::clone(&spare)));
                let new_tail = match &*linked {
                    None => spare,
                    // A helper already linked its own empty node; use that one.
                    Some(existing) => Arc::clone(existing),
                };
                // Losing this CAS means someone already advanced the tail.
                let _ = self.tail.compare_and_swap(&old_tail, new_tail);
                return;
            }

            let linked = old_tail.next.compare_and_swap(&none, Some(Arc::clone(&spare)));
            let next = match &*linked {
                None => {
                    // Our spare is now part of the queue; we need a new one.
                    core::mem::replace(&mut spare, Node::empty())
                }
                Some(existing) => Arc::clone(existing),
            };
            let _ = self.tail.compare_and_swap(&old_tail, next);
            backoff.spin();
        }
    }

    /// Removes the value at the front, or returns `None` if the queue is empty.
    pub fn pop(&self) -> Option<T> {
        let mut old_head = self.head.load_full();
        loop {
            // Reload the tail on every attempt: an equal snapshot taken before
            // a concurrent push completed would report a non-empty queue empty.
            if Arc::ptr_eq(&old_head, &self.tail.load()) {
                return None;
            }
            let Some(next) = old_head.next.load_full() else {
                old_head = self.head.load_full();
                continue;
            };

            let prev = self.head.compare_and_swap(&old_head, next);
            if Arc::ptr_eq(&prev, &old_head) {
                let data = old_head.data.load(Ordering::Acquire);
                debug_assert!(!data.is_null(), "a node behind the tail is always claimed");
                // SAFETY: the payload was boxed by `push` and only the thread
                // that moved `head` past this node takes it.
                return Some(*unsafe { Box::from_raw(data) });
            }
            old_head = Arc::clone(&prev);
        }
    }

    /// Returns `true` if the queue was empty when inspected.
    pub fn is_empty(&self) -> bool {
        Arc::ptr_eq(&self.head.load(), &self.tail.load())
    }
}

impl<T> Default for MpmcQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T: Send> ConcurrentQueue<T> for MpmcQueue<T> {
    fn push(&self, value: T) {
        MpmcQueue::push(self, value);
    }

    fn pop(&self) -> Option<T> {
        MpmcQueue::pop(self)
    }

    fn is_empty(&self) -> bool {
        MpmcQueue::is_empty(self)
    }
}
