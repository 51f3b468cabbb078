//! A fixed-capacity hazard-pointer registry.
//!
//! Each participating thread owns one slot. Before dereferencing a shared
//! node, the thread publishes the node's address in its slot; a thread that
//! unlinked the node scans every slot and defers the free while any slot
//! still holds that address.
//!
//! Slots are claimed lazily, the first time a thread asks for one, and
//! handed back automatically when the thread exits. The registry is an
//! ordinary value shared by `Arc`, so independent containers (and
//! independent tests) can use independent registries.
//!
//! Protocol:
//! - reader: `publish(p)`, re-read the source, retry until stable;
//! - reclaimer: unlink `p`, then `is_protected(p)` before freeing.
//!
//! The publish and the scan are a store→load handshake across two
//! locations, so both sides use `SeqCst`.

use core::cell::RefCell;
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_utils::CachePadded;

use crate::error::HazardError;
use crate::tracing_helpers::{debug_log, warn_log};

/// Slot count used by [`HazardRegistry::default`].
pub const DEFAULT_HAZARD_SLOTS: usize = 100;

/// Owner tag of an unclaimed slot.
const FREE: usize = 0;

static NEXT_THREAD_TAG: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static THREAD_TAG: usize = NEXT_THREAD_TAG.fetch_add(1, Ordering::Relaxed);
    static CLAIMED: RefCell<Vec<ClaimedSlot>> = const { RefCell::new(Vec::new()) };
}

struct Slot {
    owner: AtomicUsize,
    ptr: AtomicPtr<()>,
}

/// A slot this thread owns in some registry. Dropped at thread exit.
struct ClaimedSlot {
    registry: Weak<HazardRegistry>,
    index: usize,
}

impl Drop for ClaimedSlot {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.release(self.index);
        }
    }
}

/// Process-local table of hazard pointers.
pub struct HazardRegistry {
    slots: Box<[CachePadded<Slot>]>,
}

impl HazardRegistry {
    /// Creates a registry able to serve `capacity` concurrent threads.
    ///
    /// # Panics
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity != 0, "hazard registry needs at least one slot");
        let slots = (0..capacity)
            .map(|_| {
                CachePadded::new(Slot {
                    owner: AtomicUsize::new(FREE),
                    ptr: AtomicPtr::new(ptr::null_mut()),
                })
            })
            .collect();
        Self { slots }
    }

    /// Number of slots in the table.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently owned by some thread.
    pub fn claimed(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.owner.load(Ordering::Acquire) != FREE)
            .count()
    }

    /// Returns the calling thread's hazard pointer, claiming a slot on the
    /// thread's first call.
    ///
    /// # Errors
    /// [`HazardError::Exhausted`] if every slot is owned by another thread;
    /// [`HazardError::ThreadExiting`] if called from a thread-local
    /// destructor after this thread's slot records were torn down.
    pub fn current_thread(self: &Arc<Self>) -> Result<HazardPointer<'_>, HazardError> {
        let index = CLAIMED
            .try_with(|claimed| -> Result<usize, HazardError> {
                let mut claimed = claimed.borrow_mut();
                let me = Arc::as_ptr(self);
                if let Some(found) = claimed.iter().find(|c| ptr::eq(c.registry.as_ptr(), me)) {
                    return Ok(found.index);
                }
                // Forget slots of registries that no longer exist.
                claimed.retain(|c| c.registry.strong_count() > 0);
                let index = self.claim()?;
                claimed.push(ClaimedSlot {
                    registry: Arc::downgrade(self),
                    index,
                });
                Ok(index)
            })
            .map_err(|_| HazardError::ThreadExiting)??;

        Ok(HazardPointer {
            slot: &self.slots[index],
            _not_send: PhantomData,
        })
    }

    /// Returns `true` if any thread currently publishes `ptr`.
    pub fn is_protected<T>(&self, ptr: *const T) -> bool {
        let ptr = ptr.cast::<()>().cast_mut();
        self.slots
            .iter()
            .any(|slot| slot.ptr.load(Ordering::SeqCst) == ptr)
    }

    fn claim(&self) -> Result<usize, HazardError> {
        let tag = THREAD_TAG
            .try_with(|tag| *tag)
            .map_err(|_| HazardError::ThreadExiting)?;
        for (index, slot) in self.slots.iter().enumerate() {
            if slot
                .owner
                .compare_exchange(FREE, tag, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                debug_log!(index, thread = tag, "claimed hazard slot");
                return Ok(index);
            }
        }
        warn_log!(capacity = self.slots.len(), "hazard pointer registry exhausted");
        Err(HazardError::Exhausted {
            capacity: self.slots.len(),
        })
    }

    fn release(&self, index: usize) {
        let slot = &self.slots[index];
        slot.ptr.store(ptr::null_mut(), Ordering::Release);
        slot.owner.store(FREE, Ordering::Release);
        debug_log!(index, "released hazard slot");
    }
}

impl Default for HazardRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HAZARD_SLOTS)
    }
}

/// The calling thread's slot in a [`HazardRegistry`].
///
/// Not `Send`: the slot belongs to the thread that obtained it.
pub struct HazardPointer<'r> {
    slot: &'r Slot,
    _not_send: PhantomData<*const ()>,
}

impl HazardPointer<'_> {
    /// Publishes `ptr` as being dereferenced by this thread.
    #[inline]
    pub fn publish<T>(&self, ptr: *mut T) {
        self.slot.ptr.store(ptr.cast(), Ordering::SeqCst);
    }

    /// Withdraws the published pointer.
    ///
    /// `Release` so that every read of the node made under protection happens
    /// before a reclaimer can observe the slot as empty.
    #[inline]
    pub fn clear(&self) {
        self.slot.ptr.store(ptr::null_mut(), Ordering::Release);
    }

    /// Loads `src` and publishes the result, re-reading until the published
    /// value and the current value agree.
    ///
    /// On return the pointer (if non-null) cannot be freed by a reclaimer
    /// that checks this registry, until [`clear`](Self::clear) or the next
    /// publish.
    pub fn protect<T>(&self, src: &AtomicPtr<T>) -> *mut T {
        let mut ptr = src.load(Ordering::Acquire);
        loop {
            self.publish(ptr);
            let current = src.load(Ordering::SeqCst);
            if current == ptr {
                return ptr;
            }
            ptr = current;
        }
    }
}
