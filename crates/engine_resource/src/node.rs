//! Load nodes.
//!
//! A [`LoadNode`] is the graph's record of one identity: where its load
//! stands, who is waiting for it, and how many parties still want it. All
//! of that sits behind the node's own mutex, so unrelated loads never
//! contend. Nodes do not own each other; a node's dependencies are held
//! only as [`Interest`]s until it reaches a terminal state.

use std::fmt;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use engine_fiber::sync::lock;
use engine_fiber::{FiberId, SuspensionPoint};
use engine_scheduler::{Completion, Scheduler};

use crate::error::ResourceError;
use crate::identity::ResourceId;
use crate::pending::PendingShared;
use crate::resource::ResourceHandle;

/// The terminal outcome of a load, shared by every waiter.
pub type LoadOutcome = Result<ResourceHandle, ResourceError>;

/// Progress of a load node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadState {
    /// Created; its fiber is not scheduled yet.
    Pending,
    /// A fiber owns the load.
    InFlight,
    Ready,
    Failed,
}

impl LoadState {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "Pending",
            Self::InFlight => "InFlight",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Someone blocked on a node.
pub(crate) enum Waiter {
    /// A fiber parked on a suspension point.
    Fiber(Completion<LoadOutcome>),
    /// A caller outside the scheduler.
    External(Arc<PendingShared>),
}

/// Result of [`LoadNode::register`].
pub(crate) enum Registration {
    Done(LoadOutcome),
    Parked(SuspensionPoint<LoadOutcome>),
}

struct NodeInner {
    state: LoadState,
    outcome: Option<LoadOutcome>,
    fiber: Option<FiberId>,
    waiters: Vec<Waiter>,
    /// Interest this node holds in its dependencies while it is live.
    dependencies: Vec<Interest>,
    interest: usize,
    /// The load step has side effects under way; cancellation is deferred.
    loading: bool,
    cancelled: bool,
    evict_on_completion: bool,
}

/// One identity's entry in the load graph.
pub struct LoadNode {
    id: ResourceId,
    dependencies: Vec<ResourceId>,
    inner: Mutex<NodeInner>,
}

impl LoadNode {
    /// A `Pending` node with one unit of interest, owned by its creator.
    pub(crate) fn new(id: ResourceId, dependencies: Vec<ResourceId>) -> Self {
        Self {
            id,
            dependencies,
            inner: Mutex::new(NodeInner {
                state: LoadState::Pending,
                outcome: None,
                fiber: None,
                waiters: Vec::new(),
                dependencies: Vec::new(),
                interest: 1,
                loading: false,
                cancelled: false,
                evict_on_completion: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeInner> {
        lock(&self.inner)
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Dependency identities in declaration order.
    pub fn dependencies(&self) -> &[ResourceId] {
        &self.dependencies
    }

    pub fn state(&self) -> LoadState {
        self.lock().state
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// The fiber that owns the load, once it is in flight.
    pub fn fiber(&self) -> Option<FiberId> {
        self.lock().fiber
    }

    /// The terminal outcome, if there is one yet.
    pub fn outcome(&self) -> Option<LoadOutcome> {
        self.lock().outcome.clone()
    }

    /// Parties that currently want this load to happen.
    pub fn interest(&self) -> usize {
        self.lock().interest
    }

    /// Add one unit of interest. Fails if the node was already cancelled.
    pub(crate) fn attach(&self) -> bool {
        let mut inner = self.lock();
        if inner.cancelled {
            return false;
        }
        inner.interest += 1;
        inner.evict_on_completion = false;
        true
    }

    /// Drop one unit of interest.
    ///
    /// When the last unit goes, a node that has not started loading is
    /// cancelled and hands back the interest it held in its dependencies so
    /// the caller can release those outside this node's lock. A node that
    /// is already loading is only marked for eviction once it finishes.
    pub(crate) fn release_interest(&self) -> Vec<Interest> {
        let mut inner = self.lock();
        inner.interest = inner.interest.saturating_sub(1);
        if inner.interest > 0 || inner.state.is_terminal() || inner.cancelled {
            return Vec::new();
        }
        if inner.loading {
            debug!(resource = %self.id, "no interest left, evicting once loaded");
            inner.evict_on_completion = true;
            return Vec::new();
        }
        debug!(resource = %self.id, "no interest left, cancelling load");
        inner.cancelled = true;
        mem::take(&mut inner.dependencies)
    }

    pub(crate) fn set_dependencies(&self, dependencies: Vec<Interest>) {
        self.lock().dependencies = dependencies;
    }

    pub(crate) fn mark_in_flight(&self, fiber: FiberId) {
        let mut inner = self.lock();
        if inner.state == LoadState::Pending {
            inner.state = LoadState::InFlight;
            inner.fiber = Some(fiber);
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Commit to the side-effecting load step. Returns `false` if the node
    /// was cancelled first.
    pub(crate) fn begin_loading(&self) -> bool {
        let mut inner = self.lock();
        if inner.cancelled {
            return false;
        }
        inner.loading = true;
        true
    }

    /// Return the outcome, or park a fiber until there is one.
    pub(crate) fn register(&self, scheduler: &Scheduler) -> Registration {
        let mut inner = self.lock();
        if let Some(outcome) = &inner.outcome {
            return Registration::Done(outcome.clone());
        }
        let (point, completion) = scheduler.suspension::<LoadOutcome>(format!("{} ready", self.id));
        inner.waiters.push(Waiter::Fiber(completion));
        Registration::Parked(point)
    }

    /// Deliver the outcome to `pending` now or when it arrives.
    pub(crate) fn subscribe(&self, pending: Arc<PendingShared>) {
        let outcome = {
            let mut inner = self.lock();
            match &inner.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    inner.waiters.push(Waiter::External(pending));
                    return;
                }
            }
        };
        pending.resolve(outcome);
    }

    /// Record the terminal outcome and wake every waiter.
    ///
    /// Returns `true` if the node should leave the cache now.
    pub(crate) fn resolve(&self, outcome: LoadOutcome, retain_failures: bool) -> bool {
        let (waiters, dependencies, evict) = {
            let mut inner = self.lock();
            if inner.state.is_terminal() {
                warn!(resource = %self.id, state = %inner.state, "ignoring second outcome for load");
                return false;
            }
            inner.state = if outcome.is_ok() {
                LoadState::Ready
            } else {
                LoadState::Failed
            };
            inner.outcome = Some(outcome.clone());
            let evict = inner.cancelled
                || inner.evict_on_completion
                || (outcome.is_err() && !retain_failures);
            (
                mem::take(&mut inner.waiters),
                mem::take(&mut inner.dependencies),
                evict,
            )
        };

        match &outcome {
            Ok(handle) => debug!(resource = %self.id, gpu = %handle.gpu(), waiters = waiters.len(), "resource ready"),
            Err(err @ ResourceError::LoadFailure { .. }) => {
                warn!(resource = %self.id, %err, waiters = waiters.len(), "resource failed to load");
            }
            Err(err) => debug!(resource = %self.id, %err, waiters = waiters.len(), "resource failed"),
        }

        // A dependent that failed early must not cancel siblings still loading.
        for dependency in dependencies {
            dependency.disarm();
        }
        for waiter in waiters {
            match waiter {
                Waiter::Fiber(completion) => {
                    let token = completion.token();
                    if let Err(err) = completion.complete(outcome.clone()) {
                        trace!(resource = %self.id, %token, %err, "waiting fiber is gone");
                    }
                }
                Waiter::External(pending) => pending.resolve(outcome.clone()),
            }
        }
        evict
    }

    /// Terminal, and nobody outside the cache holds its resource.
    pub(crate) fn is_unused(&self) -> bool {
        let inner = self.lock();
        match (&inner.state, &inner.outcome) {
            (LoadState::Ready, Some(Ok(handle))) => Arc::strong_count(handle) == 1,
            (LoadState::Failed, _) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for LoadNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("LoadNode")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("interest", &inner.interest)
            .field("waiters", &inner.waiters.len())
            .finish_non_exhaustive()
    }
}

/// One party's claim on a node.
///
/// Dropping it gives the claim up; dropping the last one before the load
/// starts cancels the load.
pub struct Interest {
    node: Arc<LoadNode>,
    armed: bool,
}

impl Interest {
    /// Wrap a unit of interest that was already counted on `node`.
    pub(crate) fn new(node: Arc<LoadNode>) -> Self {
        Self { node, armed: true }
    }

    pub fn node(&self) -> &Arc<LoadNode> {
        &self.node
    }

    /// Let go of the node without counting the claim down.
    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Interest {
    fn drop(&mut self) {
        if self.armed {
            // Released after the node's lock is gone; may cascade.
            let cascade = self.node.release_interest();
            drop(cascade);
        }
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interest").field("node", &self.node.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(key: &str) -> Arc<LoadNode> {
        Arc::new(LoadNode::new(ResourceId::texture(key), Vec::new()))
    }

    #[test]
    fn test_last_release_cancels_idle_node() {
        let node = node("a.png");
        let first = Interest::new(node.clone());
        assert!(node.attach());
        let second = Interest::new(node.clone());
        assert_eq!(node.interest(), 2);

        drop(first);
        assert!(!node.is_cancelled());
        drop(second);
        assert!(node.is_cancelled());
        assert!(!node.attach());
        assert!(!node.begin_loading());
    }

    #[test]
    fn test_release_while_loading_defers_eviction() {
        let node = node("a.png");
        assert!(node.begin_loading());
        drop(Interest::new(node.clone()));
        assert!(!node.is_cancelled());

        let evict = node.resolve(
            Err(ResourceError::Cancelled {
                id: node.id().clone(),
            }),
            true,
        );
        assert!(evict);
        assert_eq!(node.state(), LoadState::Failed);
    }

    #[test]
    fn test_attach_revives_deferred_eviction() {
        let node = node("a.png");
        assert!(node.begin_loading());
        drop(Interest::new(node.clone()));
        assert!(node.attach());
        let evict = node.resolve(Err(ResourceError::Shutdown), true);
        assert!(!evict);
    }

    #[test]
    fn test_cancellation_cascades_to_dependencies() {
        let dependency = node("shared.png");
        let parent = Arc::new(LoadNode::new(
            ResourceId::material("brick"),
            vec![dependency.id().clone()],
        ));
        parent.set_dependencies(vec![Interest::new(dependency.clone())]);

        drop(Interest::new(parent.clone()));
        assert!(parent.is_cancelled());
        assert!(dependency.is_cancelled());
    }

    #[test]
    fn test_failed_dependent_does_not_cancel_dependency() {
        let dependency = node("depth.bin");
        let parent = Arc::new(LoadNode::new(
            ResourceId::canvas("main"),
            vec![dependency.id().clone()],
        ));
        parent.set_dependencies(vec![Interest::new(dependency.clone())]);

        parent.resolve(Err(ResourceError::Shutdown), true);
        drop(Interest::new(parent.clone()));
        assert!(!dependency.is_cancelled());
        assert_eq!(dependency.interest(), 1);
    }

    #[test]
    fn test_external_waiter_gets_outcome() {
        let node = node("a.png");
        let early = Arc::new(PendingShared::default());
        node.subscribe(early.clone());
        assert!(early.peek().is_none());

        node.resolve(Err(ResourceError::Shutdown), true);
        assert!(matches!(early.peek(), Some(Err(ResourceError::Shutdown))));

        let late = Arc::new(PendingShared::default());
        node.subscribe(late.clone());
        assert!(matches!(late.peek(), Some(Err(ResourceError::Shutdown))));
    }

    #[test]
    fn test_second_outcome_is_ignored() {
        let node = node("a.png");
        node.resolve(Err(ResourceError::Shutdown), true);
        let id = node.id().clone();
        assert!(!node.resolve(Err(ResourceError::Cancelled { id }), true));
        assert!(matches!(node.outcome(), Some(Err(ResourceError::Shutdown))));
    }
}
