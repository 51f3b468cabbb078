//! Safe memory reclamation for lock-free containers.
//!
//! A node unlinked from a lock-free structure may still be dereferenced by a
//! thread that loaded a pointer to it just before the unlink. The schemes
//! here decide when such a node can actually be freed.

pub mod hazard;

pub use hazard::{HazardPointer, HazardRegistry, DEFAULT_HAZARD_SLOTS};
