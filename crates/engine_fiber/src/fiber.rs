//! Typed fibers and their result handles.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use crate::context::{ExecutionContext, Exit, FiberId, FiberState, ResultSink};
use crate::error::FiberError;
use crate::suspend::{AwaitToken, FiberContext, Mailbox, ResumeValue};
use crate::sync::lock;

struct SlotState<T> {
    result: Option<Result<T, FiberError>>,
    closed: bool,
    taken: bool,
    waker: Option<Waker>,
}

/// Where a fiber's typed result lands. Shared by the fiber and its handle.
pub(crate) struct ResultSlot<T> {
    fiber: FiberId,
    state: Mutex<SlotState<T>>,
    closed: Condvar,
}

impl<T> ResultSlot<T> {
    fn new(fiber: FiberId) -> Self {
        Self {
            fiber,
            state: Mutex::new(SlotState {
                result: None,
                closed: false,
                taken: false,
                waker: None,
            }),
            closed: Condvar::new(),
        }
    }

    fn store(&self, result: Result<T, FiberError>) {
        lock(&self.state).result = Some(result);
    }

    fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    fn take_from(&self, state: &mut SlotState<T>) -> Result<T, FiberError> {
        if !state.closed {
            return Err(FiberError::NotCompleted(self.fiber));
        }
        if state.taken {
            return Err(FiberError::ResultTaken(self.fiber));
        }
        state.taken = true;
        state
            .result
            .take()
            .unwrap_or(Err(FiberError::Cancelled(self.fiber)))
    }

    fn take(&self) -> Result<T, FiberError> {
        let mut state = lock(&self.state);
        self.take_from(&mut state)
    }
}

impl<T: Send> ResultSink for ResultSlot<T> {
    fn close(&self, failure: Option<FiberError>) {
        let waker = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            if state.result.is_none()
                && let Some(failure) = failure
            {
                state.result = Some(Err(failure));
            }
            state.closed = true;
            state.waker.take()
        };
        self.closed.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// A suspendable computation producing a `T`.
///
/// Before it is handed to a scheduler the creator owns it and may drive it by
/// hand with [`Fiber::resume`]. A scheduler takes it apart with
/// [`Fiber::into_parts`]: the erased [`ExecutionContext`] goes into the
/// queue, the [`FiberHandle`] goes back to whoever wants the result.
pub struct Fiber<T> {
    context: ExecutionContext,
    slot: Arc<ResultSlot<T>>,
}

impl<T: Send + 'static> Fiber<T> {
    /// Create a fiber in the `Created` state.
    ///
    /// `entry` is not called until the first `resume`. It receives the
    /// [`FiberContext`] through which it can suspend or yield.
    pub fn new<F, Fut>(entry: F) -> Self
    where
        F: FnOnce(FiberContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FiberError>> + Send + 'static,
    {
        let id = FiberId::next();
        let mailbox = Arc::new(Mailbox::default());
        let slot = Arc::new(ResultSlot::new(id));
        let cx = FiberContext::new(id, mailbox.clone());

        let writer = slot.clone();
        let body = async move {
            let result = entry(cx).await;
            let exit = if result.is_ok() {
                Exit::Returned
            } else {
                Exit::Raised
            };
            writer.store(result);
            exit
        };

        let context = ExecutionContext::new(id, Box::pin(body), mailbox, slot.clone());
        Self { context, slot }
    }
}

impl<T> Fiber<T> {
    /// Attach a debug label, shown in logs.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.context.set_label(label.into());
        self
    }

    /// The fiber's identifier.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.context.id()
    }

    /// The current state tag.
    #[must_use]
    pub fn state(&self) -> FiberState {
        self.context.state()
    }

    /// The token the fiber is parked on, if suspended.
    #[must_use]
    pub fn awaiting(&self) -> Option<AwaitToken> {
        self.context.awaiting()
    }

    /// Run the fiber until it next completes, fails, yields or suspends.
    ///
    /// # Errors
    ///
    /// Returns [`FiberError::InvalidFiberResume`] if the fiber has already
    /// finished.
    pub fn resume(&mut self, value: Option<ResumeValue>) -> Result<FiberState, FiberError> {
        self.context.resume(value)
    }

    /// Take the stored result.
    ///
    /// # Errors
    ///
    /// [`FiberError::NotCompleted`] before the fiber finishes,
    /// [`FiberError::ResultTaken`] on a second call, or the fiber's own
    /// failure.
    pub fn take_result(&mut self) -> Result<T, FiberError> {
        if !self.context.state().is_terminal() {
            return Err(FiberError::NotCompleted(self.context.id()));
        }
        self.slot.take()
    }

    /// Split into the erased context and the result handle.
    #[must_use]
    pub fn into_parts(self) -> (ExecutionContext, FiberHandle<T>) {
        let handle = FiberHandle {
            fiber: self.context.id(),
            slot: self.slot,
        };
        (self.context, handle)
    }
}

impl<T> fmt::Debug for Fiber<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber").field("context", &self.context).finish()
    }
}

/// Observer side of a fiber's result.
///
/// The result can be taken exactly once: by [`FiberHandle::join`],
/// [`FiberHandle::try_result`], or by awaiting the handle.
pub struct FiberHandle<T> {
    fiber: FiberId,
    slot: Arc<ResultSlot<T>>,
}

impl<T> FiberHandle<T> {
    /// The fiber this handle observes.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.fiber
    }

    /// `true` once the fiber has completed, failed or been cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.slot.is_closed()
    }

    /// Take the result without blocking.
    ///
    /// # Errors
    ///
    /// [`FiberError::NotCompleted`] if the fiber is still live, otherwise
    /// the fiber's own failure.
    pub fn try_result(&self) -> Result<T, FiberError> {
        self.slot.take()
    }

    /// Block the calling thread until the fiber finishes.
    ///
    /// Never call this from inside a fiber: it would hold a worker.
    ///
    /// # Errors
    ///
    /// Returns the fiber's failure.
    pub fn join(self) -> Result<T, FiberError> {
        let mut state = lock(&self.slot.state);
        while !state.closed {
            state = self
                .slot
                .closed
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        self.slot.take_from(&mut state)
    }

    /// Like [`FiberHandle::join`] but gives up after `timeout`.
    ///
    /// Returns `None` on timeout; the handle stays usable.
    pub fn join_timeout(&self, timeout: Duration) -> Option<Result<T, FiberError>> {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.slot.state);
        while !state.closed {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .slot
                .closed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            state = guard;
        }
        Some(self.slot.take_from(&mut state))
    }
}

impl<T> Future for FiberHandle<T> {
    type Output = Result<T, FiberError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = lock(&self.slot.state);
        if state.closed {
            return Poll::Ready(self.slot.take_from(&mut state));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl<T> fmt::Debug for FiberHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("fiber", &self.fiber)
            .field("finished", &self.is_finished())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suspend::{Abandoned, SuspensionPoint};

    #[test]
    fn test_fiber_runs_to_completion() {
        let mut fiber = Fiber::new(|_cx| async { Ok(42u32) });
        assert_eq!(fiber.state(), FiberState::Created);
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Completed);
        assert_eq!(fiber.take_result().unwrap(), 42);
    }

    #[test]
    fn test_unit_result_fiber() {
        let mut fiber = Fiber::new(|_cx| async { Ok(()) });
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Completed);
        assert!(fiber.take_result().is_ok());
    }

    #[test]
    fn test_resume_after_completion_is_invalid() {
        let mut fiber = Fiber::new(|_cx| async { Ok(1u8) });
        fiber.resume(None).unwrap();
        let err = fiber.resume(None).unwrap_err();
        assert!(matches!(
            err,
            FiberError::InvalidFiberResume {
                state: FiberState::Completed,
                ..
            }
        ));
    }

    #[test]
    fn test_resume_after_failure_is_invalid() {
        let mut fiber: Fiber<()> = Fiber::new(|cx| async move { Err(FiberError::Cancelled(cx.id())) });
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Failed);
        assert!(matches!(
            fiber.resume(None),
            Err(FiberError::InvalidFiberResume {
                state: FiberState::Failed,
                ..
            })
        ));
    }

    #[test]
    fn test_suspend_preserves_locals() {
        let first = SuspensionPoint::<u32>::new("first");
        let second = SuspensionPoint::<String>::new("second");
        let (t1, t2) = (first.token(), second.token());

        let mut fiber = Fiber::new(move |cx| async move {
            let mut log = vec!["start".to_string()];
            let a = cx.suspend(first).await?;
            log.push(format!("a={a}"));
            let b = cx.suspend(second).await?;
            log.push(format!("b={b}"));
            Ok(log)
        });

        assert_eq!(fiber.resume(None).unwrap(), FiberState::Suspended);
        assert_eq!(fiber.awaiting(), Some(t1));
        assert_eq!(fiber.resume(Some(Box::new(7u32))).unwrap(), FiberState::Suspended);
        assert_eq!(fiber.awaiting(), Some(t2));
        assert_eq!(
            fiber.resume(Some(Box::new("seven".to_string()))).unwrap(),
            FiberState::Completed
        );
        assert_eq!(fiber.take_result().unwrap(), vec!["start", "a=7", "b=seven"]);
    }

    #[test]
    fn test_resume_without_value_stays_suspended() {
        let point = SuspensionPoint::<u8>::new("byte");
        let mut fiber = Fiber::new(move |cx| async move { cx.suspend(point).await });
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Suspended);
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Suspended);
        assert_eq!(fiber.resume(Some(Box::new(3u8))).unwrap(), FiberState::Completed);
        assert_eq!(fiber.take_result().unwrap(), 3);
    }

    #[test]
    fn test_result_before_completion_is_usage_error() {
        let point = SuspensionPoint::<u8>::new("never");
        let mut fiber = Fiber::new(move |cx| async move { cx.suspend(point).await });
        fiber.resume(None).unwrap();
        assert!(matches!(fiber.take_result(), Err(FiberError::NotCompleted(_))));
    }

    #[test]
    fn test_result_taken_twice() {
        let mut fiber = Fiber::new(|_cx| async { Ok(5u8) });
        fiber.resume(None).unwrap();
        assert_eq!(fiber.take_result().unwrap(), 5);
        assert!(matches!(fiber.take_result(), Err(FiberError::ResultTaken(_))));
    }

    #[test]
    fn test_resume_type_mismatch() {
        let point = SuspensionPoint::<u32>::new("number");
        let token = point.token();
        let mut fiber = Fiber::new(move |cx| async move { cx.suspend(point).await });
        fiber.resume(None).unwrap();
        assert_eq!(fiber.resume(Some(Box::new("text"))).unwrap(), FiberState::Failed);
        assert!(matches!(
            fiber.take_result(),
            Err(FiberError::ResumeTypeMismatch(t)) if t == token
        ));
    }

    #[test]
    fn test_abandoned_completion_fails_suspension() {
        let point = SuspensionPoint::<u32>::new("upload");
        let mut fiber = Fiber::new(move |cx| async move { cx.suspend(point).await });
        fiber.resume(None).unwrap();
        assert_eq!(fiber.resume(Some(Box::new(Abandoned))).unwrap(), FiberState::Failed);
        assert!(matches!(fiber.take_result(), Err(FiberError::Abandoned(_))));
    }

    #[test]
    fn test_panic_marks_failed() {
        let mut fiber: Fiber<u8> = Fiber::new(|_cx| async {
            let exploded = true;
            if exploded {
                panic!("shader exploded");
            }
            Ok(0)
        });
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Failed);
        match fiber.take_result() {
            Err(FiberError::Panicked { message, .. }) => assert_eq!(message, "shader exploded"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_yield_reports_ready() {
        let mut fiber = Fiber::new(|cx| async move {
            cx.yield_now().await;
            cx.yield_now().await;
            Ok(2u8)
        });
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Ready);
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Ready);
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Completed);
    }

    /// Pending on its first poll, without registering any suspension point.
    struct PendingOnce(bool);

    impl Future for PendingOnce {
        type Output = u32;

        fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<u32> {
            if self.0 {
                Poll::Ready(4)
            } else {
                self.0 = true;
                Poll::Pending
            }
        }
    }

    #[test]
    fn test_foreign_pending_behaves_like_yield() {
        let mut fiber = Fiber::new(|_cx| async { Ok(PendingOnce(false).await) });
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Ready);
        assert_eq!(fiber.awaiting(), None);
        assert_eq!(fiber.resume(None).unwrap(), FiberState::Completed);
        assert_eq!(fiber.take_result().unwrap(), 4);
    }

    #[test]
    fn test_handle_observes_result_from_parts() {
        let fiber = Fiber::new(|_cx| async { Ok("done") });
        let (mut context, handle) = fiber.into_parts();
        assert!(matches!(handle.try_result(), Err(FiberError::NotCompleted(_))));
        context.resume(None).unwrap();
        assert!(handle.is_finished());
        assert_eq!(handle.join().unwrap(), "done");
    }

    #[test]
    fn test_dropping_context_cancels_handle() {
        let fiber = Fiber::new(|_cx| async { Ok(1u8) });
        let (context, handle) = fiber.into_parts();
        drop(context);
        assert!(matches!(handle.join(), Err(FiberError::Cancelled(_))));
    }

    #[test]
    fn test_abort_publishes_reason() {
        let point = SuspensionPoint::<u8>::new("never");
        let token = point.token();
        let fiber = Fiber::new(move |cx| async move { cx.suspend(point).await });
        let (mut context, handle) = fiber.into_parts();
        context.resume(None).unwrap();
        context.abort(FiberError::UnknownAwaitToken(token));
        assert_eq!(context.state(), FiberState::Failed);
        assert!(matches!(
            handle.join_timeout(Duration::from_secs(1)),
            Some(Err(FiberError::UnknownAwaitToken(_)))
        ));
    }

    #[test]
    fn test_join_timeout_on_live_fiber() {
        let point = SuspensionPoint::<u8>::new("never");
        let fiber = Fiber::new(move |cx| async move { cx.suspend(point).await });
        let (mut context, handle) = fiber.into_parts();
        context.resume(None).unwrap();
        assert!(handle.join_timeout(Duration::from_millis(10)).is_none());
    }
}
