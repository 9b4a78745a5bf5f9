//! The type-erased execution context.
//!
//! [`ExecutionContext`] holds everything about a fiber that does not depend
//! on its result type: the parked computation, the state tag and the mailbox
//! through which resumption values arrive. The stack-switch logic lives here
//! once; [`Fiber`](crate::Fiber) only adds a typed result slot on top.

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use tracing::{debug, trace, warn};

use crate::error::FiberError;
use crate::suspend::{AwaitToken, Mailbox, Parking, ResumeValue};

/// A unique fiber identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FiberId(u64);

static NEXT_FIBER: AtomicU64 = AtomicU64::new(1);

impl FiberId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FIBER.fetch_add(1, Ordering::Relaxed))
    }

    /// Create a fiber ID from a raw `u64`.
    #[must_use]
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiber#{}", self.0)
    }
}

/// Lifecycle state of a fiber.
///
/// ```text
/// Created ──resume──▶ Running ──return──▶ Completed
///                      │  ▲    ──error/panic──▶ Failed
///              suspend │  │ resume
///                      ▼  │
///                   Suspended / Ready (yielded)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberState {
    /// Built but never resumed.
    Created,
    /// Yielded cooperatively (or re-queued) and wants to run again.
    Ready,
    /// Executing on some thread right now.
    Running,
    /// Parked on a suspension point; holds no thread.
    Suspended,
    /// The entry computation returned `Ok`.
    Completed,
    /// The entry computation returned `Err`, panicked, or was cancelled.
    Failed,
}

impl FiberState {
    /// `true` for `Completed` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// `true` if `resume` is allowed in this state.
    #[must_use]
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::Created | Self::Ready | Self::Suspended)
    }
}

impl fmt::Display for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Suspended => "Suspended",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// How the entry computation finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    Returned,
    Raised,
}

/// Receives the end of a fiber's life. Implemented by the typed result slot.
pub(crate) trait ResultSink: Send + Sync {
    /// Mark the result final. `failure` is recorded only if the computation
    /// did not store a result of its own (panic, cancellation).
    fn close(&self, failure: Option<FiberError>);
}

pub(crate) type BoxedEntry = Pin<Box<dyn Future<Output = Exit> + Send>>;

/// A fiber with its result type erased.
///
/// Owned by exactly one party at a time: its creator, a scheduler queue, a
/// suspension table, or the worker currently resuming it. Dropping a context
/// that has not finished cancels it; its observers see
/// [`FiberError::Cancelled`].
pub struct ExecutionContext {
    id: FiberId,
    label: Option<String>,
    state: FiberState,
    /// Only ever reached through `&mut self`; the mutex makes parked
    /// contexts `Sync` so they can sit in concurrent maps.
    entry: Option<Mutex<BoxedEntry>>,
    mailbox: Arc<Mailbox>,
    sink: Arc<dyn ResultSink>,
}

impl ExecutionContext {
    pub(crate) fn new(
        id: FiberId,
        entry: BoxedEntry,
        mailbox: Arc<Mailbox>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            id,
            label: None,
            state: FiberState::Created,
            entry: Some(Mutex::new(entry)),
            mailbox,
            sink,
        }
    }

    /// The fiber's identifier.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Optional debug label.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub(crate) fn set_label(&mut self, label: String) {
        self.label = Some(label);
    }

    /// The current state tag.
    #[must_use]
    pub fn state(&self) -> FiberState {
        self.state
    }

    /// The token the fiber is parked on, if it is suspended.
    #[must_use]
    pub fn awaiting(&self) -> Option<AwaitToken> {
        if self.state == FiberState::Suspended {
            self.mailbox.awaiting()
        } else {
            None
        }
    }

    /// Transfer control into the fiber until it completes, fails, yields or
    /// suspends again.
    ///
    /// `value` is the resumption payload for the suspension point the fiber
    /// is parked on. A value passed to a fiber that is not suspended is
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`FiberError::InvalidFiberResume`] if the fiber is `Running`,
    /// `Completed` or `Failed`.
    pub fn resume(&mut self, value: Option<ResumeValue>) -> Result<FiberState, FiberError> {
        if !self.state.is_resumable() {
            return Err(FiberError::InvalidFiberResume {
                fiber: self.id,
                state: self.state,
            });
        }
        let Some(entry) = self.entry.as_mut() else {
            return Err(FiberError::InvalidFiberResume {
                fiber: self.id,
                state: self.state,
            });
        };

        if let Some(value) = value
            && !self.mailbox.deliver(value)
        {
            trace!(fiber = %self.id, state = %self.state, "dropping resumption value for fiber that is not suspended");
        }

        self.state = FiberState::Running;
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        let entry = entry.get_mut().unwrap_or_else(PoisonError::into_inner);
        let polled = panic::catch_unwind(AssertUnwindSafe(|| entry.as_mut().poll(&mut cx)));

        self.state = match polled {
            Ok(Poll::Ready(Exit::Returned)) => self.finish(FiberState::Completed, None),
            Ok(Poll::Ready(Exit::Raised)) => self.finish(FiberState::Failed, None),
            Ok(Poll::Pending) => match self.mailbox.parking() {
                Parking::Awaiting(token) => {
                    trace!(fiber = %self.id, %token, "fiber suspended");
                    FiberState::Suspended
                }
                Parking::Yielded => FiberState::Ready,
                Parking::Foreign => {
                    // Nothing will ever resume a foreign wait for us; poll again later.
                    debug!(fiber = %self.id, "fiber pending outside a suspension point, treating as yield");
                    FiberState::Ready
                }
            },
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(fiber = %self.id, %message, "fiber panicked");
                self.finish(
                    FiberState::Failed,
                    Some(FiberError::Panicked {
                        fiber: self.id,
                        message,
                    }),
                )
            }
        };
        Ok(self.state)
    }

    /// Fail the fiber without running it further.
    ///
    /// Has no effect on a fiber that already finished.
    pub fn abort(&mut self, reason: FiberError) {
        if self.state.is_terminal() {
            return;
        }
        debug!(fiber = %self.id, %reason, "fiber aborted");
        self.state = self.finish(FiberState::Failed, Some(reason));
    }

    /// Drop the computation (and with it every local on its stack) and
    /// publish the end of the fiber's life.
    fn finish(&mut self, state: FiberState, failure: Option<FiberError>) -> FiberState {
        self.entry = None;
        self.sink.close(failure);
        state
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        if !self.state.is_terminal() {
            self.entry = None;
            self.sink.close(Some(FiberError::Cancelled(self.id)));
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(FiberState::Completed.is_terminal());
        assert!(FiberState::Failed.is_terminal());
        assert!(!FiberState::Suspended.is_terminal());
        assert!(!FiberState::Running.is_resumable());
        assert!(FiberState::Ready.is_resumable());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(3u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
