//! The caller's view of an in-progress request.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use engine_fiber::sync::lock;

use crate::identity::ResourceId;
use crate::node::{Interest, LoadOutcome};

#[derive(Default)]
struct PendingState {
    outcome: Option<LoadOutcome>,
    waker: Option<Waker>,
}

/// Filled by the load node, read by the [`PendingResource`].
#[derive(Default)]
pub(crate) struct PendingShared {
    state: Mutex<PendingState>,
    resolved: Condvar,
}

impl PendingShared {
    fn lock(&self) -> MutexGuard<'_, PendingState> {
        lock(&self.state)
    }

    pub(crate) fn resolve(&self, outcome: LoadOutcome) {
        let waker = {
            let mut state = self.lock();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome);
            state.waker.take()
        };
        self.resolved.notify_all();
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub(crate) fn peek(&self) -> Option<LoadOutcome> {
        self.lock().outcome.clone()
    }
}

/// A requested resource that may not be loaded yet.
///
/// Resolve it by blocking ([`wait`](Self::wait),
/// [`wait_timeout`](Self::wait_timeout)) or by awaiting it from an async
/// runtime. Fibers should use
/// [`ResourceManager::acquire`](crate::ResourceManager::acquire) instead,
/// which parks the fiber rather than a worker.
///
/// Dropping a `PendingResource` before it resolves withdraws the request;
/// if nobody else wants the resource and its load has not started, the
/// load is cancelled.
#[must_use = "dropping a pending resource withdraws the request"]
pub struct PendingResource {
    id: ResourceId,
    shared: Arc<PendingShared>,
    interest: Option<Interest>,
}

impl PendingResource {
    pub(crate) fn new(id: ResourceId, shared: Arc<PendingShared>, interest: Interest) -> Self {
        Self {
            id,
            shared,
            interest: Some(interest),
        }
    }

    /// Already resolved, with no node behind it.
    pub(crate) fn resolved(id: ResourceId, outcome: LoadOutcome) -> Self {
        let shared = Arc::new(PendingShared::default());
        shared.resolve(outcome);
        Self {
            id,
            shared,
            interest: None,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn is_ready(&self) -> bool {
        self.shared.lock().outcome.is_some()
    }

    /// The outcome, if it has arrived.
    pub fn try_get(&self) -> Option<LoadOutcome> {
        self.shared.peek()
    }

    /// Block the calling thread until the load finishes.
    ///
    /// Never call this from inside a fiber.
    pub fn wait(self) -> LoadOutcome {
        let mut state = self.shared.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            state = self
                .shared
                .resolved
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<LoadOutcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return Some(outcome.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .shared
                .resolved
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

impl Future for PendingResource {
    type Output = LoadOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<LoadOutcome> {
        let mut state = self.shared.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl fmt::Debug for PendingResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResource")
            .field("id", &self.id)
            .field("ready", &self.is_ready())
            .field("interest", &self.interest.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceError;

    #[test]
    fn test_resolved_pending_is_ready() {
        let pending = PendingResource::resolved(ResourceId::shader("a"), Err(ResourceError::Shutdown));
        assert!(pending.is_ready());
        assert!(matches!(pending.try_get(), Some(Err(ResourceError::Shutdown))));
        assert!(matches!(pending.wait(), Err(ResourceError::Shutdown)));
    }

    #[test]
    fn test_wait_timeout_and_cross_thread_resolve() {
        let shared = Arc::new(PendingShared::default());
        let pending = PendingResource {
            id: ResourceId::shader("a"),
            shared: shared.clone(),
            interest: None,
        };
        assert!(pending.wait_timeout(Duration::from_millis(5)).is_none());

        let resolver = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            shared.resolve(Err(ResourceError::Shutdown));
        });
        assert!(matches!(
            pending.wait_timeout(Duration::from_secs(5)),
            Some(Err(ResourceError::Shutdown))
        ));
        resolver.join().unwrap();
    }

    #[test]
    fn test_first_outcome_wins() {
        let shared = PendingShared::default();
        shared.resolve(Err(ResourceError::Shutdown));
        shared.resolve(Err(ResourceError::Cancelled {
            id: ResourceId::shader("a"),
        }));
        assert!(matches!(shared.peek(), Some(Err(ResourceError::Shutdown))));
    }

    #[test]
    fn test_poll_with_noop_waker() {
        let shared = Arc::new(PendingShared::default());
        let mut pending = PendingResource {
            id: ResourceId::shader("a"),
            shared: shared.clone(),
            interest: None,
        };
        let mut cx = Context::from_waker(Waker::noop());
        assert!(Pin::new(&mut pending).poll(&mut cx).is_pending());
        shared.resolve(Err(ResourceError::Shutdown));
        assert!(matches!(
            Pin::new(&mut pending).poll(&mut cx),
            Poll::Ready(Err(ResourceError::Shutdown))
        ));
    }
}
