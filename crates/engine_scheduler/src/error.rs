//! Scheduler construction errors.
//!
//! Runtime misuse (bad resume, unknown token) is reported as
//! [`FiberError`](engine_fiber::FiberError); this type only covers setting
//! the scheduler up.

/// Errors that can occur while starting a scheduler.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread {index}: {source}")]
    Spawn {
        /// Index of the worker that failed to start.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}
