//! The callback half of a suspension point.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use engine_fiber::{Abandoned, AwaitToken, FiberError};

use crate::scheduler::Shared;

/// Resumes the fiber waiting on one [`AwaitToken`].
///
/// Move it into an I/O or GPU callback. Calling [`Completion::complete`] only
/// enqueues a resumption message; the fiber itself runs later on a worker.
/// Dropping a completion without firing it resumes the fiber with
/// [`FiberError::Abandoned`].
pub struct Completion<V> {
    shared: Arc<Shared>,
    token: AwaitToken,
    fired: bool,
    _value: PhantomData<fn(V)>,
}

impl<V> Completion<V> {
    pub(crate) fn new(shared: Arc<Shared>, token: AwaitToken) -> Self {
        Self {
            shared,
            token,
            fired: false,
            _value: PhantomData,
        }
    }

    /// The token this completion resolves.
    #[must_use]
    pub fn token(&self) -> AwaitToken {
        self.token
    }
}

impl<V: Send + Sync + 'static> Completion<V> {
    /// Deliver `value` to the suspended fiber.
    ///
    /// # Errors
    ///
    /// [`FiberError::SchedulerClosed`] after shutdown.
    pub fn complete(mut self, value: V) -> Result<(), FiberError> {
        self.fired = true;
        self.shared.notify_ready(self.token, Box::new(value))
    }
}

impl<V> Drop for Completion<V> {
    fn drop(&mut self) {
        if self.fired {
            return;
        }
        trace!(token = %self.token, "completion dropped without firing");
        // Nothing to report to: the scheduler may already be closed.
        let _ = self.shared.notify_ready(self.token, Box::new(Abandoned));
    }
}

impl<V> fmt::Debug for Completion<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("token", &self.token)
            .field("fired", &self.fired)
            .finish()
    }
}
