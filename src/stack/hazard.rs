//! A lock-free Treiber stack that reclaims nodes through hazard pointers.
//!
//! - `head` is an atomic node pointer, nothing more;
//! - a popper protects the head it is about to dereference through the
//!   stack's [`HazardRegistry`];
//! - an unlinked node still protected by some other thread is parked on a
//!   lock-free pending list and freed by a later pop once no slot holds it.
//!
//! Every reclamation attempt scans the whole registry, so its cost is
//! proportional to the registry capacity.

use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::error::HazardError;
use crate::reclaim::HazardRegistry;
use crate::traits::ConcurrentStack;
use crate::tracing_helpers::trace_log;

struct Node<T> {
    value: ManuallyDrop<T>,
    /// Link to the node below; reused as the pending-list link after pop.
    next: AtomicPtr<Node<T>>,
}

/// A lock-free LIFO stack protected by hazard pointers.
pub struct HazardStack<T> {
    head: CachePadded<AtomicPtr<Node<T>>>,
    /// Unlinked nodes that were protected when their popper tried to free them.
    pending: CachePadded<AtomicPtr<Node<T>>>,
    pending_len: AtomicUsize,
    registry: Arc<HazardRegistry>,
    _owns: PhantomData<Box<Node<T>>>,
}

// Safety: values move between threads through push/pop; nodes are only freed
// once no thread can observe them.
unsafe impl<T: Send> Send for HazardStack<T> {}
unsafe impl<T: Send> Sync for HazardStack<T> {}

impl<T> HazardStack<T> {
    /// Creates an empty stack whose pops protect nodes through `registry`.
    ///
    /// Several containers may share one registry; every thread that pops
    /// needs one free slot in it.
    pub fn new(registry: Arc<HazardRegistry>) -> Self {
        Self {
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            pending: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            pending_len: AtomicUsize::new(0),
            registry,
            _owns: PhantomData,
        }
    }

    /// Creates an empty stack with its own registry of default capacity.
    pub fn with_default_registry() -> Self {
        Self::new(Arc::new(HazardRegistry::default()))
    }

    /// The registry this stack publishes hazards in.
    #[inline]
    pub fn registry(&self) -> &Arc<HazardRegistry> {
        &self.registry
    }

    /// Pushes `value` on top of the stack.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value: ManuallyDrop::new(value),
            next: AtomicPtr::new(self.head.load(Ordering::Relaxed)),
        }));
        // SAFETY: `node` is not yet shared; we own it until the CAS succeeds.
        let mut expected = unsafe { (*node).next.load(Ordering::Relaxed) };
        loop {
            match self
                .head
                .compare_exchange_weak(expected, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => {
                    expected = current;
                    unsafe { (*node).next.store(current, Ordering::Relaxed) };
                }
            }
        }
    }

    /// Pops the top value.
    ///
    /// # Panics
    /// Panics if the calling thread cannot obtain a hazard slot, which means
    /// the registry is too small for the number of popping threads. Use
    /// [`try_pop`](Self::try_pop) to handle that case.
    pub fn pop(&self) -> Option<T> {
        match self.try_pop() {
            Ok(value) => value,
            Err(err) => panic!("HazardStack::pop: {err}"),
        }
    }

    /// Pops the top value, reporting hazard slot exhaustion as an error.
    ///
    /// # Errors
    /// Returns the [`HazardError`] from claiming this thread's slot.
    pub fn try_pop(&self) -> Result<Option<T>, HazardError> {
        let hp = self.registry.current_thread()?;

        let mut old = hp.protect(&*self.head);
        while !old.is_null() {
            // SAFETY: `old` was the head after we published it, so no
            // reclaimer can free it while our slot holds it.
            let next = unsafe { (*old).next.load(Ordering::Relaxed) };
            // SeqCst: the unlink must precede our later registry scan.
            match self
                .head
                .compare_exchange(old, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(_) => old = hp.protect(&*self.head),
            }
        }
        // Only the thread whose CAS unlinked `old` ever retires it, so the
        // slot can be cleared before the value is moved out.
        hp.clear();

        if old.is_null() {
            self.reclaim_unprotected();
            return Ok(None);
        }

        // SAFETY: we unlinked `old`; nobody else reads its value.
        let value = unsafe { ManuallyDrop::into_inner(ptr::addr_of!((*old).value).read()) };
        self.retire(old);
        self.reclaim_unprotected();
        Ok(Some(value))
    }

    /// Returns `true` if the stack was empty when inspected.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Number of unlinked nodes waiting for their hazards to clear.
    #[inline]
    pub fn pending_reclaims(&self) -> usize {
        self.pending_len.load(Ordering::Relaxed)
    }

    /// Frees `node` now, or parks it if some thread still protects it.
    fn retire(&self, node: *mut Node<T>) {
        if self.registry.is_protected(node) {
            trace_log!("deferring reclamation of a protected node");
            self.pending_len.fetch_add(1, Ordering::Relaxed);
            self.park(node);
        } else {
            // SAFETY: unlinked and unprotected; the value was moved out.
            unsafe { drop(Box::from_raw(node)) };
        }
    }

    fn park(&self, node: *mut Node<T>) {
        let mut head = self.pending.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next.store(head, Ordering::Relaxed) };
            match self
                .pending
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Takes the whole pending list and frees every node no longer
    /// protected; the rest go back on the list.
    fn reclaim_unprotected(&self) {
        if self.pending.load(Ordering::Relaxed).is_null() {
            return;
        }
        let mut cur = self.pending.swap(ptr::null_mut(), Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: the swap gave us exclusive ownership of the list.
            let next = unsafe { (*cur).next.load(Ordering::Relaxed) };
            if self.registry.is_protected(cur) {
                self.park(cur);
            } else {
                self.pending_len.fetch_sub(1, Ordering::Relaxed);
                unsafe { drop(Box::from_raw(cur)) };
            }
            cur = next;
        }
    }
}

impl<T> Drop for HazardStack<T> {
    fn drop(&mut self) {
        let mut cur = *self.head.get_mut();
        while !cur.is_null() {
            // SAFETY: `&mut self` rules out concurrent pops; every linked node
            // still owns its value.
            let mut node = unsafe { Box::from_raw(cur) };
            cur = *node.next.get_mut();
            unsafe { ManuallyDrop::drop(&mut node.value) };
        }

        let mut cur = *self.pending.get_mut();
        while !cur.is_null() {
            // SAFETY: pending nodes had their values moved out already.
            let mut node = unsafe { Box::from_raw(cur) };
            cur = *node.next.get_mut();
        }
    }
}

impl<T: Send> ConcurrentStack<T> for HazardStack<T> {
    fn push(&self, value: T) {
        HazardStack::push(self, value);
    }

    fn pop(&self) -> Option<T> {
        HazardStack::pop(self)
    }

    fn is_empty(&self) -> bool {
        HazardStack::is_empty(self)
    }
}
