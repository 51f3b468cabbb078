//! Shared interfaces for the multi-producer, multi-consumer containers.
//!
//! The stacks and queues are alternative strategies for the same problem;
//! these traits let callers (and the test suites) stay generic over which
//! reclamation scheme is underneath. The SPSC queue is absent:
//! its split producer/consumer handles do not fit a shared `&self` API.

/// A LIFO container safe to share between any number of threads.
pub trait ConcurrentStack<T>: Send + Sync {
    /// Pushes `value` on top of the stack.
    fn push(&self, value: T);

    /// Pops the most recently pushed value, or `None` if the stack is empty.
    fn pop(&self) -> Option<T>;

    /// Returns `true` if the stack held no values at the instant it was
    /// inspected.
    fn is_empty(&self) -> bool;
}

/// A FIFO container safe to share between any number of threads.
pub trait ConcurrentQueue<T>: Send + Sync {
    /// Appends `value` at the back of the queue.
    fn push(&self, value: T);

    /// Removes the value at the front, or returns `None` if the queue is
    /// empty. Never blocks.
    fn pop(&self) -> Option<T>;

    /// Returns `true` if the queue held no values at the instant it was
    /// inspected.
    fn is_empty(&self) -> bool;
}
