//! A wait-free, unbounded, single-producer single-consumer queue.
//!
//! [`queue`] returns a [`Producer`] and a [`Consumer`]. Neither handle is
//! `Clone` and both take `&mut self`, so the type system enforces "exactly
//! one of each".
//!
//! The producer owns the tail: it writes the value into the current (empty)
//! tail node, links a fresh node and publishes it with a `Release` store.
//! The consumer owns the head: an `Acquire` load of the tail tells it whether
//! a value is ready. A popped node is freed immediately because nobody else
//! can hold a reference to it. Both operations are O(1) with no retry loops.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

struct Node<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    /// Written by the producer before the tail store that publishes it.
    next: UnsafeCell<*mut Node<T>>,
}

impl<T> Node<T> {
    fn empty() -> *mut Self {
        Box::into_raw(Box::new(Self {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            next: UnsafeCell::new(ptr::null_mut()),
        }))
    }
}

struct Shared<T> {
    /// Consumer-private.
    head: CachePadded<UnsafeCell<*mut Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
}

// Safety: `head` is touched only by the single consumer (or by `Drop`, after
// both handles are gone); the payload crosses threads through the
// Release/Acquire pair on `tail`.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let tail = *self.tail.get_mut();
        let mut cur = *self.head.get_mut();
        while cur != tail {
            // SAFETY: every node before the tail holds an initialized value.
            let mut node = unsafe { Box::from_raw(cur) };
            cur = *node.next.get_mut();
            unsafe { node.value.get_mut().assume_init_drop() };
        }
        // The tail node is always empty.
        unsafe { drop(Box::from_raw(tail)) };
    }
}

/// The pushing half of an SPSC queue.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

/// The popping half of an SPSC queue.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

/// Creates an empty SPSC queue and returns its two ends.
pub fn queue<T>() -> (Producer<T>, Consumer<T>) {
    let sentinel = Node::empty();
    let shared = Arc::new(Shared {
        head: CachePadded::new(UnsafeCell::new(sentinel)),
        tail: CachePadded::new(AtomicPtr::new(sentinel)),
    });
    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

impl<T> Producer<T> {
    /// Appends `value` at the back of the queue.
    pub fn push(&mut self, value: T) {
        let new_tail = Node::empty();
        let old_tail = self.shared.tail.load(Ordering::Relaxed);
        // SAFETY: the consumer never reads the tail node, and only this
        // producer writes it.
        unsafe {
            (*(*old_tail).value.get()).write(value);
            *(*old_tail).next.get() = new_tail;
        }
        self.shared.tail.store(new_tail, Ordering::Release);
    }
}

impl<T> Consumer<T> {
    /// Removes the value at the front, or returns `None` if the queue is empty.
    pub fn pop(&mut self) -> Option<T> {
        let tail = self.shared.tail.load(Ordering::Acquire);
        // SAFETY: `head` is consumer-private.
        let head = unsafe { &mut *self.shared.head.get() };
        if *head == tail {
            return None;
        }
        let old_head = *head;
        // SAFETY: `old_head` precedes the published tail, so its value and
        // `next` were written before the Release store we acquired.
        unsafe {
            *head = *(*old_head).next.get();
            let value = (*(*old_head).value.get()).assume_init_read();
            drop(Box::from_raw(old_head));
            Some(value)
        }
    }

    /// Returns `true` if no value was ready when inspected.
    pub fn is_empty(&self) -> bool {
        let tail = self.shared.tail.load(Ordering::Acquire);
        // SAFETY: `head` is consumer-private and we only read it.
        unsafe { *self.shared.head.get() == tail }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn single_thread_fifo() {
        let (mut tx, mut rx) = queue();
        assert!(rx.is_empty());
        tx.push(1);
        tx.push(2);
        assert!(!rx.is_empty());
        assert_eq!(rx.pop(), Some(1));
        tx.push(3);
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), Some(3));
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn order_preserved_across_threads() {
        const N: u64 = 100_000;
        let (mut tx, mut rx) = queue();

        let producer = thread::spawn(move || {
            for i in 0..N {
                tx.push(i);
            }
        });

        let mut expected = 0;
        while expected < N {
            if let Some(v) = rx.pop() {
                assert_eq!(v, expected);
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
        assert_eq!(rx.pop(), None);
    }

    #[test]
    fn leftovers_dropped_with_last_handle() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let (mut tx, mut rx) = queue();
        for _ in 0..4 {
            tx.push(Tracked(Arc::clone(&drops)));
        }
        drop(rx.pop());
        drop(tx);
        assert_eq!(drops.load(Ordering::Relaxed), 1);
        drop(rx);
        assert_eq!(drops.load(Ordering::Relaxed), 4);
    }
}
