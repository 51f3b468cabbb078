//! # `tandem` - Concurrent Stacks, Queues and a Work-Stealing Pool
//!
//! A family of containers that many threads push into and pop from at
//! once, plus a task scheduler built on top of them. The lock-free designs
//! never free a node that another thread may still be reading.
//!
//! ## Containers
//!
//! | type | order | producers / consumers | progress | reclamation |
//! |------|-------|-----------------------|----------|-------------|
//! | [`HazardStack`] | LIFO | many / many | lock-free | hazard pointers |
//! | [`CountedStack`] | LIFO | many / many | lock-free | split reference counts |
//! | [`MpmcQueue`] | FIFO | many / many | lock-free | `Arc` nodes |
//! | [`queue::spsc`] | FIFO | one / one | wait-free | immediate |
//! | [`LockedQueue`] | FIFO | many / many | blocking | immediate |
//!
//! The multi-party containers implement [`ConcurrentStack`] or
//! [`ConcurrentQueue`], so callers can stay generic over the strategy.
//!
//! ## Memory Reclamation
//!
//! - **Hazard pointers** ([`reclaim`]): before dereferencing a shared node, a
//!   thread publishes its address in a slot of a [`HazardRegistry`]. A node
//!   that is unlinked while published goes onto a pending list and is freed
//!   by a later pop once no slot holds it.
//! - **Split reference counts**: the stack head packs a node pointer with an
//!   external count; each node carries an internal count. Whoever brings the
//!   sum to zero frees the node, exactly once.
//! - **Reference counting**: the MPMC queue's links are `Arc`s swapped
//!   through `arc-swap`.
//!
//! ## Thread Pool
//!
//! [`ThreadPool`] runs boxed closures on a fixed set of workers. Each worker
//! has a local double-ended queue and steals from its peers when idle. Tasks
//! receive a [`pool::TaskContext`] for submitting child tasks onto the
//! current worker and for checking cancellation.
//!
//! ## Feature Flags
//!
//! - `tracing`: emit worker lifecycle and error events through `tracing`.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use tandem::{HazardRegistry, HazardStack};
//!
//! let stack = Arc::new(HazardStack::new(Arc::new(HazardRegistry::default())));
//! let pushers: Vec<_> = [1, 2]
//!     .into_iter()
//!     .map(|v| {
//!         let stack = Arc::clone(&stack);
//!         thread::spawn(move || stack.push(v))
//!     })
//!     .collect();
//! for p in pushers {
//!     p.join().unwrap();
//! }
//!
//! let mut popped = vec![stack.pop().unwrap(), stack.pop().unwrap()];
//! popped.sort_unstable();
//! assert_eq!(popped, [1, 2]);
//! assert_eq!(stack.pop(), None);
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod error;
pub mod pool;
pub mod queue;
pub mod reclaim;
pub mod stack;
pub mod traits;

mod tracing_helpers;

pub use error::{HazardError, PoolError, TaskError};
pub use pool::{PoolConfig, ThreadPool};
pub use queue::{LockedQueue, MpmcQueue};
pub use reclaim::{HazardPointer, HazardRegistry};
pub use stack::{CountedStack, HazardStack};
pub use traits::{ConcurrentQueue, ConcurrentStack};

// Compile-time layout checks.
const _: () = {
    use core::mem;

    // A hazard pointer is just a borrowed slot reference.
    assert!(mem::size_of::<HazardPointer<'static>>() == mem::size_of::<usize>());

    // Worker identities are plain indices.
    assert!(mem::size_of::<pool::WorkerId>() == mem::size_of::<usize>());
};
