//! Lock-free LIFO stacks.
//!
//! Both stacks are Treiber stacks; they differ only in how a popped node is
//! reclaimed while other threads may still be reading it:
//!
//! | stack | reclamation | extra state |
//! |-------|-------------|-------------|
//! | [`HazardStack`] | hazard pointers, deferred free list | shared [`HazardRegistry`](crate::reclaim::HazardRegistry) |
//! | [`CountedStack`] | split external/internal counts | 128-bit head |

pub mod counted;
pub mod hazard;

#[cfg(all(test, loom))]
mod loom_tests;

pub use counted::CountedStack;
pub use hazard::HazardStack;
