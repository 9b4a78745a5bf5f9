//! Suspension points: where a fiber may give up control and what crosses
//! the yield/resume boundary.
//!
//! A fiber suspends by awaiting [`FiberContext::suspend`] with a
//! [`SuspensionPoint`]. The first poll records the point's [`AwaitToken`] in
//! the fiber's mailbox and returns `Pending`; the fiber's `resume` then
//! reports `Suspended`. The next `resume` that carries a value delivers it
//! into the mailbox, and the suspended future returns it, downcast to the
//! point's resumption type.

use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use crate::context::FiberId;
use crate::error::FiberError;
use crate::sync::lock;

/// A value passed into a fiber when it is resumed.
///
/// Values are `Sync` so a completed-but-not-yet-consumed value can sit in a
/// shared table.
pub type ResumeValue = Box<dyn Any + Send + Sync>;

/// Resumption payload meaning "the completion for this point was dropped".
///
/// A suspended fiber receiving this value sees [`FiberError::Abandoned`]
/// instead of a value, so a lost callback never strands it.
#[derive(Debug, Clone, Copy)]
pub struct Abandoned;

/// Identifies one pending external completion.
///
/// Each live suspension corresponds to exactly one token; tokens are never
/// reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AwaitToken(u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

impl AwaitToken {
    /// Allocate a fresh, process-unique token.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AwaitToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "await#{}", self.0)
    }
}

/// Called with the token of a suspension point that is dropped unawaited.
type Release = Box<dyn FnOnce(AwaitToken) + Send>;

/// A named awaited condition with a typed resumption value.
///
/// `V` is the type the completer hands back, e.g. the bytes of a file or the
/// handle of an uploaded texture.
pub struct SuspensionPoint<V> {
    token: AwaitToken,
    label: Cow<'static, str>,
    release: Option<Release>,
    _value: PhantomData<fn() -> V>,
}

impl<V> SuspensionPoint<V> {
    /// Create a point with a fresh token.
    #[must_use]
    pub fn new(label: impl Into<Cow<'static, str>>) -> Self {
        Self::with_token(AwaitToken::next(), label)
    }

    /// Create a point for a token that was allocated elsewhere.
    #[must_use]
    pub fn with_token(token: AwaitToken, label: impl Into<Cow<'static, str>>) -> Self {
        Self {
            token,
            label: label.into(),
            release: None,
            _value: PhantomData,
        }
    }

    /// Run `release` if the point is dropped before a fiber starts waiting
    /// on it, so whoever issued the token can forget it.
    #[must_use]
    pub fn on_release(mut self, release: impl FnOnce(AwaitToken) + Send + 'static) -> Self {
        self.release = Some(Box::new(release));
        self
    }

    /// The token a completer must present to resume the fiber.
    #[must_use]
    pub fn token(&self) -> AwaitToken {
        self.token
    }

    /// Human-readable description of the awaited condition.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl<V> Drop for SuspensionPoint<V> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.token);
        }
    }
}

impl<V> fmt::Debug for SuspensionPoint<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuspensionPoint")
            .field("token", &self.token)
            .field("label", &self.label)
            .finish()
    }
}

/// Why the entry future returned `Pending` on its last poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parking {
    /// Awaiting a suspension point.
    Awaiting(AwaitToken),
    /// Cooperative yield, wants to run again.
    Yielded,
    /// Pending on something that is not a suspension point.
    Foreign,
}

#[derive(Default)]
struct MailboxState {
    awaiting: Option<AwaitToken>,
    delivered: Option<ResumeValue>,
    yielded: bool,
}

/// Shared between a fiber's context and the futures running on its stack.
#[derive(Default)]
pub(crate) struct Mailbox {
    state: Mutex<MailboxState>,
}

impl Mailbox {
    /// Hand a resumption value to the pending suspension.
    ///
    /// Returns `false` (and drops the value) if the fiber is not awaiting.
    pub(crate) fn deliver(&self, value: ResumeValue) -> bool {
        let mut state = lock(&self.state);
        if state.awaiting.is_none() {
            return false;
        }
        state.delivered = Some(value);
        true
    }

    /// Inspect why the last poll parked, clearing one-shot yield requests.
    pub(crate) fn parking(&self) -> Parking {
        let mut state = lock(&self.state);
        if std::mem::take(&mut state.yielded) {
            Parking::Yielded
        } else if let Some(token) = state.awaiting {
            Parking::Awaiting(token)
        } else {
            Parking::Foreign
        }
    }

    /// The token the fiber is currently parked on.
    pub(crate) fn awaiting(&self) -> Option<AwaitToken> {
        lock(&self.state).awaiting
    }
}

/// Handle given to a fiber's entry computation.
///
/// Cloning is cheap; every clone talks to the same fiber.
#[derive(Clone)]
pub struct FiberContext {
    id: FiberId,
    mailbox: Arc<Mailbox>,
}

impl FiberContext {
    pub(crate) fn new(id: FiberId, mailbox: Arc<Mailbox>) -> Self {
        Self { id, mailbox }
    }

    /// The fiber this context belongs to.
    #[must_use]
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Park the fiber until `point` is completed, then return the delivered
    /// value.
    ///
    /// The fiber must not hold locks on shared state across this await.
    pub fn suspend<V: Send + 'static>(&self, mut point: SuspensionPoint<V>) -> Suspend<V> {
        Suspend {
            mailbox: self.mailbox.clone(),
            token: point.token,
            registered: false,
            release: point.release.take(),
            _value: PhantomData,
        }
    }

    /// Give other fibers a turn; the fiber is re-queued at the tail.
    pub fn yield_now(&self) -> YieldNow {
        YieldNow {
            mailbox: self.mailbox.clone(),
            yielded: false,
        }
    }
}

impl fmt::Debug for FiberContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberContext").field("id", &self.id).finish()
    }
}

/// Future returned by [`FiberContext::suspend`].
#[must_use = "a suspension does nothing unless awaited"]
pub struct Suspend<V> {
    mailbox: Arc<Mailbox>,
    token: AwaitToken,
    registered: bool,
    /// Handed over from the point; dropped unused once the fiber waits.
    release: Option<Release>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Drop for Suspend<V> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.token);
        }
    }
}

impl<V: 'static> Future for Suspend<V> {
    type Output = Result<V, FiberError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = lock(&this.mailbox.state);

        if !this.registered {
            state.awaiting = Some(this.token);
            state.delivered = None;
            this.registered = true;
            this.release = None;
            return Poll::Pending;
        }

        // Resumed without a value: still waiting.
        let Some(value) = state.delivered.take() else {
            return Poll::Pending;
        };
        state.awaiting = None;
        drop(state);

        if value.is::<Abandoned>() {
            return Poll::Ready(Err(FiberError::Abandoned(this.token)));
        }
        match value.downcast::<V>() {
            Ok(value) => Poll::Ready(Ok(*value)),
            Err(_) => Poll::Ready(Err(FiberError::ResumeTypeMismatch(this.token))),
        }
    }
}

/// Future returned by [`FiberContext::yield_now`].
#[must_use = "yielding does nothing unless awaited"]
pub struct YieldNow {
    mailbox: Arc<Mailbox>,
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            return Poll::Ready(());
        }
        this.yielded = true;
        lock(&this.mailbox.state).yielded = true;
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_unique() {
        let a = AwaitToken::next();
        let b = AwaitToken::next();
        assert_ne!(a, b);
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_point_keeps_label_and_token() {
        let token = AwaitToken::next();
        let point = SuspensionPoint::<Vec<u8>>::with_token(token, "file content available");
        assert_eq!(point.token(), token);
        assert_eq!(point.label(), "file content available");
    }

    #[test]
    fn test_release_runs_only_when_never_awaited() {
        use std::sync::atomic::AtomicUsize;
        use std::task::Waker;

        let released = Arc::new(AtomicUsize::new(0));
        let counter = |released: &Arc<AtomicUsize>| {
            let released = released.clone();
            move |_token: AwaitToken| {
                released.fetch_add(1, Ordering::SeqCst);
            }
        };

        drop(SuspensionPoint::<u8>::new("dropped").on_release(counter(&released)));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        let cx = FiberContext::new(FiberId::from_raw(1), Arc::new(Mailbox::default()));
        drop(cx.suspend(SuspensionPoint::<u8>::new("never polled").on_release(counter(&released))));
        assert_eq!(released.load(Ordering::SeqCst), 2);

        let mut waiting = cx.suspend(SuspensionPoint::<u8>::new("polled").on_release(counter(&released)));
        let mut task = Context::from_waker(Waker::noop());
        assert!(Pin::new(&mut waiting).poll(&mut task).is_pending());
        drop(waiting);
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_deliver_without_awaiting_is_dropped() {
        let mailbox = Mailbox::default();
        assert!(!mailbox.deliver(Box::new(1u8)));
        assert_eq!(mailbox.parking(), Parking::Foreign);
    }

    #[test]
    fn test_yield_flag_is_one_shot() {
        let mailbox = Mailbox::default();
        lock(&mailbox.state).yielded = true;
        assert_eq!(mailbox.parking(), Parking::Yielded);
        assert_eq!(mailbox.parking(), Parking::Foreign);
    }
}
