//! Scheduler configuration.

use std::num::NonZeroUsize;

/// Configuration for a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of background worker threads.
    ///
    /// `0` starts no threads; the owner drives fibers with
    /// [`Scheduler::run_pending`](crate::Scheduler::run_pending).
    pub worker_count: usize,
    /// Prefix for worker thread names (`<prefix>-<index>`).
    pub thread_name: String,
}

impl SchedulerConfig {
    /// A scheduler with no worker threads, pumped by its owner.
    #[must_use]
    pub fn inline() -> Self {
        Self {
            worker_count: 0,
            ..Self::default()
        }
    }

    /// Override the number of worker threads.
    #[must_use]
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Override the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4),
            thread_name: "fiber-worker".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_workers() {
        let config = SchedulerConfig::default();
        assert!(config.worker_count >= 1);
        assert_eq!(config.thread_name, "fiber-worker");
    }

    #[test]
    fn test_builders() {
        let config = SchedulerConfig::inline().with_thread_name("loader");
        assert_eq!(config.worker_count, 0);
        assert_eq!(config.thread_name, "loader");
        assert_eq!(config.with_workers(3).worker_count, 3);
    }
}
