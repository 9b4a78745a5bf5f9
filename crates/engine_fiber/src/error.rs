//! Fiber error types.

use std::sync::Arc;

use crate::context::{FiberId, FiberState};
use crate::suspend::AwaitToken;

/// Errors raised by fibers, their observers, and the code that resumes them.
///
/// `FiberError` is `Clone` so a single terminal error can be handed to every
/// waiter of a fiber.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FiberError {
    /// `resume` was called on a fiber that cannot run (finished, or already
    /// running further up the stack).
    #[error("{fiber} cannot be resumed from state {state}")]
    InvalidFiberResume {
        /// The fiber that was resumed.
        fiber: FiberId,
        /// The state it was in at the time.
        state: FiberState,
    },

    /// A completion arrived for a token with no matching suspension, or a
    /// fiber parked on a token nobody issued.
    #[error("no suspension is waiting on {0}")]
    UnknownAwaitToken(AwaitToken),

    /// The resumption value delivered to a suspension point has a different
    /// type than the point declared.
    #[error("resumption value for {0} has the wrong type")]
    ResumeTypeMismatch(AwaitToken),

    /// The completion for a suspension point was dropped without firing.
    #[error("completion for {0} was dropped without firing")]
    Abandoned(AwaitToken),

    /// The result was observed before the fiber finished.
    #[error("{0} has not completed")]
    NotCompleted(FiberId),

    /// The result was already taken by an earlier observer.
    #[error("result of {0} was already taken")]
    ResultTaken(FiberId),

    /// The entry computation panicked.
    #[error("{fiber} panicked: {message}")]
    Panicked {
        /// The fiber that panicked.
        fiber: FiberId,
        /// The panic payload, if it was a string.
        message: String,
    },

    /// The fiber was dropped before it finished.
    #[error("{0} was cancelled")]
    Cancelled(FiberId),

    /// The scheduler no longer accepts work.
    #[error("scheduler is shut down")]
    SchedulerClosed,

    /// The entry computation returned an error of its own.
    #[error("fiber entry failed: {0}")]
    Entry(Arc<dyn std::error::Error + Send + Sync>),
}

impl FiberError {
    /// Wrap an arbitrary error raised by an entry computation.
    pub fn entry<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Entry(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_error_message_includes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.glsl");
        let err = FiberError::entry(io);
        assert!(err.to_string().contains("missing.glsl"));
    }

    #[test]
    fn test_errors_are_cloneable_for_every_waiter() {
        let err = FiberError::Cancelled(FiberId::from_raw(7));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }
}
