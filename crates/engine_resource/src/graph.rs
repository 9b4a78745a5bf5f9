//! The resource load graph.
//!
//! [`LoadGraph::request`] turns an identity into a load node, creating it
//! (and, recursively, its dependencies) on first request. Every created
//! node that passes the cycle check gets one fiber which:
//!
//! 1. waits for each dependency to finish, in declaration order,
//! 2. resolves and reads its source file (suspending until the read
//!    completes),
//! 3. asks the graphics backend to create it (suspending until creation
//!    completes),
//! 4. records the outcome on the node, which wakes every waiter.
//!
//! Nodes never point at each other directly. Edges are identity lookups
//! through the cache, and a live node only holds [`Interest`]s in its
//! dependencies, which it lets go of when it finishes.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::sync::Arc;

use tracing::{debug, trace};

use engine_fiber::{Fiber, FiberContext, FiberError};
use engine_scheduler::Scheduler;

use crate::backend::{BackendError, FilesystemResolver, GpuHandle, GpuRequest, GraphicsBackend};
use crate::cache::ResourceCache;
use crate::catalog::ResourceCatalog;
use crate::descriptor::ResourceDescriptor;
use crate::error::{LoadError, ResourceError};
use crate::identity::ResourceId;
use crate::node::{Interest, LoadNode, LoadOutcome, Registration};
use crate::resource::LoadedResource;

/// Dependency-ordered, deduplicated resource loading on a fiber scheduler.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct LoadGraph {
    scheduler: Scheduler,
    catalog: Arc<dyn ResourceCatalog>,
    filesystem: Arc<dyn FilesystemResolver>,
    graphics: Arc<dyn GraphicsBackend>,
    cache: Arc<ResourceCache>,
    retain_failures: bool,
}

impl LoadGraph {
    pub fn new(
        scheduler: Scheduler,
        catalog: Arc<dyn ResourceCatalog>,
        filesystem: Arc<dyn FilesystemResolver>,
        graphics: Arc<dyn GraphicsBackend>,
    ) -> Self {
        Self {
            scheduler,
            catalog,
            filesystem,
            graphics,
            cache: Arc::new(ResourceCache::new()),
            retain_failures: true,
        }
    }

    /// Whether failed loads stay cached. When `false` a failed entry is
    /// evicted as soon as it resolves, so the next request loads it again.
    #[must_use]
    pub fn with_retain_failures(mut self, retain: bool) -> Self {
        self.retain_failures = retain;
        self
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Attach to the node for `id`, creating and scheduling it if needed.
    ///
    /// The returned [`Interest`] keeps the load wanted; drop it to withdraw.
    pub fn request(&self, id: &ResourceId) -> Interest {
        let descriptor = self.catalog.describe(id);
        let dependencies = descriptor
            .as_ref()
            .map(|d| d.dependencies.clone())
            .unwrap_or_default();

        loop {
            let (node, created) = self
                .cache
                .get_or_create(id, || LoadNode::new(id.clone(), dependencies.clone()));
            if created {
                trace!(resource = %id, "load node created");
                self.start(&node, descriptor);
                return Interest::new(node);
            }
            if node.attach() {
                trace!(resource = %id, state = %node.state(), "joined existing load");
                return Interest::new(node);
            }
            // Cancelled, but its fiber has not exited yet. Replace it.
            trace!(resource = %id, "replacing cancelled load node");
            self.cache.remove_if_same(id, &node);
        }
    }

    /// Wait inside a fiber until `node` finishes, without holding a worker.
    pub async fn wait_for(&self, cx: &FiberContext, node: &LoadNode) -> LoadOutcome {
        let point = match node.register(&self.scheduler) {
            Registration::Done(outcome) => return outcome,
            Registration::Parked(point) => point,
        };
        match cx.suspend(point).await {
            Ok(outcome) => outcome,
            Err(_) if self.scheduler.is_closed() => Err(ResourceError::Shutdown),
            Err(err) => Err(ResourceError::LoadFailure {
                id: node.id().clone(),
                source: LoadError::Fiber(err),
            }),
        }
    }

    fn start(&self, node: &Arc<LoadNode>, descriptor: Option<ResourceDescriptor>) {
        let id = node.id().clone();
        let Some(descriptor) = descriptor else {
            self.resolve(
                node,
                Err(ResourceError::LoadFailure {
                    id,
                    source: LoadError::UnknownResource,
                }),
            );
            return;
        };
        if let Some(path) = self.find_cycle(&id) {
            self.resolve(node, Err(ResourceError::DependencyCycle { id, path }));
            return;
        }

        // Recursion ends: nodes on a cycle fail above without requesting
        // anything, so only acyclic chains are followed here.
        let dependencies: Vec<Interest> = descriptor
            .dependencies
            .iter()
            .map(|dependency| self.request(dependency))
            .collect();
        let waits_on: Vec<Arc<LoadNode>> = dependencies.iter().map(|i| i.node().clone()).collect();
        node.set_dependencies(dependencies);

        let guard = ResolveGuard {
            graph: self.clone(),
            node: node.clone(),
            done: false,
        };
        let graph = self.clone();
        let fiber = Fiber::new(move |cx| graph.load(cx, guard, waits_on, descriptor))
            .with_label(format!("load {id}"));
        node.mark_in_flight(fiber.id());

        // On failure the fiber is dropped unrun and its guard records the outcome.
        match self.scheduler.submit(fiber) {
            Ok(handle) => trace!(resource = %id, fiber = %handle.id(), "load scheduled"),
            Err(err) => debug!(resource = %id, %err, "load not scheduled"),
        }
    }

    /// The dependency chain from `start` back to itself, if there is one.
    fn find_cycle(&self, start: &ResourceId) -> Option<Vec<ResourceId>> {
        let mut chain = vec![start.clone()];
        let mut visited = HashSet::new();
        self.walk_for_cycle(start, start, &mut chain, &mut visited)
    }

    fn walk_for_cycle(
        &self,
        start: &ResourceId,
        current: &ResourceId,
        chain: &mut Vec<ResourceId>,
        visited: &mut HashSet<ResourceId>,
    ) -> Option<Vec<ResourceId>> {
        let descriptor = self.catalog.describe(current)?;
        for dependency in &descriptor.dependencies {
            if dependency == start {
                let mut cycle = chain.clone();
                cycle.push(dependency.clone());
                return Some(cycle);
            }
            if visited.insert(dependency.clone()) {
                chain.push(dependency.clone());
                if let Some(cycle) = self.walk_for_cycle(start, dependency, chain, visited) {
                    return Some(cycle);
                }
                chain.pop();
            }
        }
        None
    }

    async fn load(
        self,
        cx: FiberContext,
        guard: ResolveGuard,
        dependencies: Vec<Arc<LoadNode>>,
        descriptor: ResourceDescriptor,
    ) -> Result<(), FiberError> {
        let outcome = self.run_load(&cx, &guard.node, &dependencies, descriptor).await;
        guard.finish(outcome);
        Ok(())
    }

    async fn run_load(
        &self,
        cx: &FiberContext,
        node: &LoadNode,
        dependencies: &[Arc<LoadNode>],
        descriptor: ResourceDescriptor,
    ) -> LoadOutcome {
        if node.is_cancelled() {
            return Err(cancelled(node));
        }

        let mut resolved = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            let outcome = self.wait_for(cx, dependency).await;
            if node.is_cancelled() {
                return Err(cancelled(node));
            }
            match outcome {
                Ok(handle) => resolved.push(handle),
                Err(cause) => {
                    return Err(ResourceError::DependencyFailed {
                        id: node.id().clone(),
                        dependency: dependency.id().clone(),
                        cause: Arc::new(cause),
                    });
                }
            }
        }

        if !node.begin_loading() {
            return Err(cancelled(node));
        }
        trace!(resource = %node.id(), fiber = %cx.id(), "load step started");

        let failure = |source: LoadError| ResourceError::LoadFailure {
            id: node.id().clone(),
            source,
        };
        let bytes = self.read_source(cx, &descriptor).await.map_err(failure)?;
        let request = GpuRequest {
            id: node.id().clone(),
            params: descriptor.params,
            bytes,
            dependencies: resolved.iter().map(|handle| handle.gpu()).collect(),
        };
        let gpu = self.create(cx, request).await.map_err(failure)?;

        Ok(Arc::new(LoadedResource::new(
            node.id().clone(),
            gpu,
            resolved,
            self.graphics.clone(),
        )))
    }

    async fn read_source(
        &self,
        cx: &FiberContext,
        descriptor: &ResourceDescriptor,
    ) -> Result<Vec<u8>, LoadError> {
        if descriptor.sources.is_empty() {
            return Ok(Vec::new());
        }
        let Some(path) = self.filesystem.resolve(&descriptor.sources) else {
            return Err(LoadError::NotFound {
                candidates: descriptor.sources.clone(),
            });
        };

        let (point, completion) = self
            .scheduler
            .suspension::<io::Result<Vec<u8>>>("file content available");
        self.filesystem.begin_read(
            &path,
            Box::new(move |result: io::Result<Vec<u8>>| {
                if let Err(err) = completion.complete(result) {
                    trace!(%err, "read finished after its fiber was gone");
                }
            }),
        );

        match cx.suspend(point).await? {
            Ok(bytes) => Ok(bytes),
            Err(source) => Err(LoadError::Read {
                path,
                source: Arc::new(source),
            }),
        }
    }

    async fn create(&self, cx: &FiberContext, request: GpuRequest) -> Result<GpuHandle, LoadError> {
        let (point, completion) = self
            .scheduler
            .suspension::<Result<GpuHandle, BackendError>>("GPU resource created");
        self.graphics.begin_create(
            request,
            Box::new(move |result: Result<GpuHandle, BackendError>| {
                if let Err(err) = completion.complete(result) {
                    trace!(%err, "creation finished after its fiber was gone");
                }
            }),
        );
        Ok(cx.suspend(point).await??)
    }

    fn resolve(&self, node: &Arc<LoadNode>, outcome: LoadOutcome) {
        if node.resolve(outcome, self.retain_failures) && self.cache.remove_if_same(node.id(), node) {
            debug!(resource = %node.id(), "evicted on completion");
        }
    }
}

impl fmt::Debug for LoadGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadGraph")
            .field("cached", &self.cache.len())
            .field("retain_failures", &self.retain_failures)
            .finish_non_exhaustive()
    }
}

fn cancelled(node: &LoadNode) -> ResourceError {
    ResourceError::Cancelled {
        id: node.id().clone(),
    }
}

/// Makes sure a node gets an outcome even if its fiber never runs to the
/// end (dropped unrun, panicked, or cancelled at shutdown).
struct ResolveGuard {
    graph: LoadGraph,
    node: Arc<LoadNode>,
    done: bool,
}

impl ResolveGuard {
    fn finish(mut self, outcome: LoadOutcome) {
        self.done = true;
        self.graph.resolve(&self.node, outcome);
    }
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let error = if self.graph.scheduler.is_closed() {
            ResourceError::Shutdown
        } else {
            ResourceError::LoadFailure {
                id: self.node.id().clone(),
                source: LoadError::Interrupted,
            }
        };
        self.graph.resolve(&self.node, Err(error));
    }
}
