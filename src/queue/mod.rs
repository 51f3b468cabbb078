//! FIFO queues.
//!
//! | queue | producers / consumers | progress | blocking pop |
//! |-------|-----------------------|----------|--------------|
//! | [`MpmcQueue`] | many / many | lock-free | no |
//! | [`spsc`] | one / one | wait-free | no |
//! | [`LockedQueue`] | many / many | two fine-grained locks | yes |

pub mod locked;
pub mod mpmc;
pub mod spsc;


pub use locked::LockedQueue;
pub use mpmc::MpmcQueue;
pub use spsc::{Consumer, Producer};
