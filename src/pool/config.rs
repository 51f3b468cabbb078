//! Thread pool configuration.

use serde::{Deserialize, Serialize};

/// Default prefix for worker thread names; workers are named `{prefix}-{index}`.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "tandem-worker";

/// Settings for [`ThreadPool::new`](super::ThreadPool::new).
///
/// Missing fields fall back to [`PoolConfig::default`] when deserialized, so
/// an embedding application can carry a partial table in its own config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads. Must be at least one.
    pub threads: usize,
    /// Worker thread name prefix.
    pub thread_name_prefix: String,
    /// Stack size for each worker, in bytes. `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get(),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_owned(),
            stack_size: None,
        }
    }
}

impl PoolConfig {
    /// Sets the worker count.
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Sets the worker stack size in bytes.
    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}
