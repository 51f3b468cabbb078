//! A lock-free stack using split reference counts.
//!
//! The head packs a node pointer with an *external* count: the number of
//! poppers that have claimed the node through the head. Each node also
//! carries an *internal* count, adjusted as those claims are released. The
//! node is freed by whichever thread brings external + internal to zero, and
//! that happens exactly once.
//!
//! Ordering:
//! - the claim CAS is `Acquire`, pairing with the `Release` push that
//!   published the node;
//! - every release of a reference is a `Release` RMW on the internal count;
//! - the thread that drops the total to zero issues an `Acquire` fence before
//!   freeing, so it observes the winner moving the value out and every loser
//!   reading `next`.
//!
//! The head is 128 bits wide (pointer + count) and relies on a double-width
//! CAS; `portable-atomic` falls back to a lock on targets without one.

use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{fence, AtomicI64, Ordering};

use crossbeam_utils::CachePadded;
use portable_atomic::AtomicU128;

use crate::traits::ConcurrentStack;

struct Node<T> {
    value: UnsafeCell<MaybeUninit<T>>,
    /// Written before the node is published, read-only afterwards.
    next: CountedPtr<T>,
    internal: AtomicI64,
}

/// A node pointer paired with its external count.
struct CountedPtr<T> {
    external: u64,
    ptr: *mut Node<T>,
}

impl<T> Clone for CountedPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for CountedPtr<T> {}

impl<T> CountedPtr<T> {
    const NULL: Self = Self {
        external: 0,
        ptr: ptr::null_mut(),
    };

    #[inline]
    fn pack(self) -> u128 {
        (u128::from(self.external) << 64) | (self.ptr as usize as u128)
    }

    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn unpack(raw: u128) -> Self {
        Self {
            external: (raw >> 64) as u64,
            ptr: (raw as u64) as usize as *mut Node<T>,
        }
    }
}

/// A lock-free LIFO stack reclaiming nodes with split reference counts.
pub struct CountedStack<T> {
    head: CachePadded<AtomicU128>,
    _owns: PhantomData<Box<Node<T>>>,
}

// Safety: values move between threads through push/pop; the counting
// protocol frees each node exactly once.
unsafe impl<T: Send> Send for CountedStack<T> {}
unsafe impl<T: Send> Sync for CountedStack<T> {}

impl<T> CountedStack<T> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicU128::new(CountedPtr::<T>::NULL.pack())),
            _owns: PhantomData,
        }
    }

    /// Pushes `value` on top of the stack.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value: UnsafeCell::new(MaybeUninit::new(value)),
            next: CountedPtr::unpack(self.head.load(Ordering::Relaxed)),
            internal: AtomicI64::new(0),
        }));
        // One reference: the head (or the node above) pointing at it.
        let new_head = CountedPtr {
            external: 1,
            ptr: node,
        };
        loop {
            // SAFETY: `node` is unpublished until the CAS succeeds.
            let expected = unsafe { (*node).next };
            match self.head.compare_exchange_weak(
                expected.pack(),
                new_head.pack(),
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => unsafe { (*node).next = CountedPtr::unpack(current) },
            }
        }
    }

    /// Pops the top value, or returns `None` if the stack is empty.
    pub fn pop(&self) -> Option<T> {
        let mut old = CountedPtr::<T>::unpack(self.head.load(Ordering::Relaxed));
        loop {
            old = self.claim_head(old);
            let node = old.ptr;
            if node.is_null() {
                return None;
            }

            // SAFETY: our claim keeps `node` alive until we release it.
            let next = unsafe { (*node).next };
            match self.head.compare_exchange(
                old.pack(),
                next.pack(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // SAFETY: unlinking the node made us its only reader.
                    let value = unsafe { (*(*node).value.get()).assume_init_read() };
                    // Drop the head's reference and our own claim; hand the
                    // remaining claims over to the internal count.
                    #[allow(clippy::cast_possible_wrap)]
                    let delta = old.external as i64 - 2;
                    let before = unsafe { (*node).internal.fetch_add(delta, Ordering::Release) };
                    if before == -delta {
                        fence(Ordering::Acquire);
                        unsafe { drop(Box::from_raw(node)) };
                    }
                    return Some(value);
                }
                Err(current) => {
                    // Someone else popped or claimed; release our claim.
                    let before = unsafe { (*node).internal.fetch_sub(1, Ordering::Release) };
                    if before == 1 {
                        fence(Ordering::Acquire);
                        unsafe { drop(Box::from_raw(node)) };
                    }
                    old = CountedPtr::unpack(current);
                }
            }
        }
    }

    /// Returns `true` if the stack was empty when inspected.
    #[inline]
    pub fn is_empty(&self) -> bool {
        CountedPtr::<T>::unpack(self.head.load(Ordering::Acquire))
            .ptr
            .is_null()
    }

    /// Bumps the external count of the current head, starting from the
    /// snapshot `old`, and returns the committed value.
    fn claim_head(&self, mut old: CountedPtr<T>) -> CountedPtr<T> {
        loop {
            let claimed = CountedPtr {
                external: old.external + 1,
                ptr: old.ptr,
            };
            match self.head.compare_exchange(
                old.pack(),
                claimed.pack(),
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return claimed,
                Err(current) => old = CountedPtr::unpack(current),
            }
        }
    }
}

impl<T> Default for CountedStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for CountedStack<T> {
    fn drop(&mut self) {
        let mut cur = CountedPtr::<T>::unpack(*self.head.get_mut()).ptr;
        while !cur.is_null() {
            // SAFETY: `&mut self` means no claims are outstanding; every
            // linked node still owns its value.
            let mut node = unsafe { Box::from_raw(cur) };
            cur = node.next.ptr;
            unsafe { node.value.get_mut().assume_init_drop() };
        }
    }
}

impl<T: Send> ConcurrentStack<T> for CountedStack<T> {
    fn push(&self, value: T) {
        CountedStack::push(self, value);
    }

    fn pop(&self) -> Option<T> {
        CountedStack::pop(self)
    }

    fn is_empty(&self) -> bool {
        CountedStack::is_empty(self)
    }
}
