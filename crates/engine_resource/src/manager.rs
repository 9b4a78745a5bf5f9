//! The resource manager: one owner for the scheduler, graph and cache.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::info;

use engine_fiber::{FiberContext, FiberError, FiberHandle};
use engine_scheduler::{Scheduler, SchedulerConfig, SchedulerError, SchedulerStats};

use crate::backend::{FilesystemResolver, GraphicsBackend};
use crate::cache::ResourceCache;
use crate::catalog::ResourceCatalog;
use crate::error::ResourceError;
use crate::graph::LoadGraph;
use crate::identity::{ResourceId, ResourceKind};
use crate::node::{LoadOutcome, LoadState};
use crate::pending::{PendingResource, PendingShared};

/// Configuration for a [`ResourceManager`].
#[derive(Debug, Clone)]
pub struct ResourceManagerConfig {
    pub scheduler: SchedulerConfig,
    /// Keep failed loads cached so repeated requests see the same error.
    /// When `false`, a failed identity is loaded again on its next request.
    pub retain_failures: bool,
}

impl ResourceManagerConfig {
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    #[must_use]
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.scheduler.worker_count = worker_count;
        self
    }

    #[must_use]
    pub fn with_retain_failures(mut self, retain: bool) -> Self {
        self.retain_failures = retain;
        self
    }
}

impl Default for ResourceManagerConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default().with_thread_name("resource-worker"),
            retain_failures: true,
        }
    }
}

/// Counts of cache entries by state, plus scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub cached: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub ready: usize,
    pub failed: usize,
    pub scheduler: SchedulerStats,
}

/// Process-wide resource state with an explicit lifetime.
///
/// Construct it before the first request; [`shutdown`](Self::shutdown) (or
/// dropping it) cancels outstanding loads and empties the cache.
pub struct ResourceManager {
    scheduler: Scheduler,
    graph: LoadGraph,
    closed: AtomicBool,
}

impl ResourceManager {
    /// Start a scheduler and an empty cache over the given collaborators.
    ///
    /// # Errors
    ///
    /// [`SchedulerError`] if a worker thread cannot be started.
    pub fn new(
        config: ResourceManagerConfig,
        catalog: Arc<dyn ResourceCatalog>,
        filesystem: Arc<dyn FilesystemResolver>,
        graphics: Arc<dyn GraphicsBackend>,
    ) -> Result<Self, SchedulerError> {
        let scheduler = Scheduler::new(config.scheduler)?;
        let graph = LoadGraph::new(scheduler.clone(), catalog, filesystem, graphics)
            .with_retain_failures(config.retain_failures);
        info!(retain_failures = config.retain_failures, "resource manager started");
        Ok(Self {
            scheduler,
            graph,
            closed: AtomicBool::new(false),
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn graph(&self) -> &LoadGraph {
        &self.graph
    }

    pub fn cache(&self) -> &ResourceCache {
        self.graph.cache()
    }

    /// Request a resource from outside the scheduler.
    ///
    /// Returns at once; the load proceeds on the workers.
    pub fn request_resource(&self, id: &ResourceId) -> PendingResource {
        if self.scheduler.is_closed() {
            return PendingResource::resolved(id.clone(), Err(ResourceError::Shutdown));
        }
        let interest = self.graph.request(id);
        let shared = Arc::new(PendingShared::default());
        interest.node().subscribe(shared.clone());
        PendingResource::new(id.clone(), shared, interest)
    }

    /// Request a resource from inside a fiber and park until it is loaded.
    pub async fn acquire(&self, cx: &FiberContext, id: &ResourceId) -> LoadOutcome {
        if self.scheduler.is_closed() {
            return Err(ResourceError::Shutdown);
        }
        let interest = self.graph.request(id);
        self.graph.wait_for(cx, interest.node()).await
    }

    /// Run engine work as a fiber on the resource scheduler.
    ///
    /// # Errors
    ///
    /// [`FiberError::SchedulerClosed`] after shutdown.
    pub fn run_as_fiber<T, F, Fut>(&self, entry: F) -> Result<FiberHandle<T>, FiberError>
    where
        T: Send + 'static,
        F: FnOnce(FiberContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, FiberError>> + Send + 'static,
    {
        self.scheduler.run_as_fiber(entry)
    }

    pub fn state(&self, id: &ResourceId) -> Option<LoadState> {
        self.cache().state(id)
    }

    /// Drop a finished entry; the next request loads it again.
    pub fn evict(&self, id: &ResourceId) -> bool {
        self.cache().evict(id)
    }

    pub fn evict_unused(&self) -> usize {
        self.cache().evict_unused()
    }

    pub fn evict_stale(&self, kind: ResourceKind, key: &str, current_version: u64) -> usize {
        self.cache().evict_stale(kind, key, current_version)
    }

    /// Pump the ready queue on this thread. See
    /// [`Scheduler::run_pending`].
    pub fn run_pending(&self, max_turns: usize) -> usize {
        self.scheduler.run_pending(max_turns)
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    pub fn stats(&self) -> ResourceStats {
        let mut stats = ResourceStats {
            scheduler: self.scheduler.stats(),
            ..ResourceStats::default()
        };
        for (_, state) in self.cache().states() {
            stats.cached += 1;
            match state {
                LoadState::Pending => stats.pending += 1,
                LoadState::InFlight => stats.in_flight += 1,
                LoadState::Ready => stats.ready += 1,
                LoadState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Cancel every load still running and empty the cache. Idempotent,
    /// and still clears the cache if the scheduler was shut down directly.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.shutdown();
        let drained = self.cache().clear();
        info!(drained, "resource manager shut down");
    }
}

impl Drop for ResourceManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("scheduler", &self.scheduler)
            .field("graph", &self.graph)
            .finish()
    }
}
