//! In-memory collaborators for tests and headless runs.
//!
//! Both complete their work on a dedicated background thread (or inline on
//! the caller's thread, for deterministic tests) and record what they were
//! asked to do.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Sender;
use dashmap::DashMap;
use tracing::{trace, warn};

use engine_fiber::sync::lock;

use crate::backend::{
    BackendError, CreateCallback, FilesystemResolver, GpuHandle, GpuRequest, GraphicsBackend,
    ReadCallback,
};
use crate::identity::ResourceId;

type Job = Box<dyn FnOnce() + Send>;

/// Runs completion callbacks off the caller's thread.
struct Completer {
    tx: Option<Sender<Job>>,
}

impl Completer {
    fn background(name: &str, latency: Duration) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();
        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                // Ends once the owning collaborator drops the sender.
                for job in rx {
                    if !latency.is_zero() {
                        std::thread::sleep(latency);
                    }
                    job();
                }
            });
        match spawned {
            Ok(_) => Self { tx: Some(tx) },
            Err(err) => {
                warn!(%err, name, "cannot spawn completion thread, completing inline");
                Self { tx: None }
            }
        }
    }

    fn inline() -> Self {
        Self { tx: None }
    }

    fn run(&self, job: Job) {
        match &self.tx {
            Some(tx) => {
                if let Err(err) = tx.send(job) {
                    (err.0)();
                }
            }
            None => job(),
        }
    }
}

/// A filesystem whose files live in a map.
pub struct MemoryFilesystem {
    files: DashMap<PathBuf, Vec<u8>>,
    failures: DashMap<PathBuf, io::ErrorKind>,
    reads: DashMap<PathBuf, usize>,
    completer: Completer,
}

impl MemoryFilesystem {
    /// Reads complete on a background thread.
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Reads complete on a background thread after `latency` each.
    pub fn with_latency(latency: Duration) -> Self {
        Self::with_completer(Completer::background("memory-fs", latency))
    }

    /// Reads complete before `begin_read` returns.
    pub fn inline() -> Self {
        Self::with_completer(Completer::inline())
    }

    fn with_completer(completer: Completer) -> Self {
        Self {
            files: DashMap::new(),
            failures: DashMap::new(),
            reads: DashMap::new(),
            completer,
        }
    }

    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) -> Self {
        self.insert(path, bytes);
        self
    }

    pub fn insert(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), bytes.into());
    }

    /// Make every read of `path` fail with `kind`. The path still resolves.
    pub fn fail_reads(&self, path: impl Into<PathBuf>, kind: io::ErrorKind) {
        self.failures.insert(path.into(), kind);
    }

    pub fn read_count(&self, path: impl AsRef<Path>) -> usize {
        self.reads.get(path.as_ref()).map_or(0, |count| *count)
    }

    pub fn total_reads(&self) -> usize {
        self.reads.iter().map(|e| *e.value()).sum()
    }

    /// How often each path was read.
    pub fn reads(&self) -> HashMap<PathBuf, usize> {
        self.reads.iter().map(|e| (e.key().clone(), *e.value())).collect()
    }
}

impl Default for MemoryFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FilesystemResolver for MemoryFilesystem {
    fn resolve(&self, candidates: &[PathBuf]) -> Option<PathBuf> {
        candidates
            .iter()
            .find(|path| self.files.contains_key(*path))
            .cloned()
    }

    fn begin_read(&self, path: &Path, done: ReadCallback) {
        *self.reads.entry(path.to_path_buf()).or_insert(0) += 1;
        trace!(path = %path.display(), "read started");

        let result = match self.failures.get(path) {
            Some(kind) => Err(io::Error::new(*kind, format!("injected failure reading {}", path.display()))),
            None => self.files.get(path).map(|bytes| bytes.value().clone()).ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, path.display().to_string())
            }),
        };
        self.completer.run(Box::new(move || done(result)));
    }
}

struct GraphicsState {
    next_handle: AtomicU64,
    loads: DashMap<ResourceId, usize>,
    live: DashMap<GpuHandle, ResourceId>,
    created: Mutex<Vec<ResourceId>>,
    violations: Mutex<Vec<String>>,
    failures: DashMap<ResourceId, BackendError>,
}

/// A graphics backend that hands out numbered handles.
///
/// Checks on every creation that the handles of the request's dependencies
/// were already created (and not released); anything else is recorded as a
/// violation.
pub struct MemoryGraphics {
    state: Arc<GraphicsState>,
    completer: Completer,
}

impl MemoryGraphics {
    /// Creations complete on a background thread.
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    /// Creations complete on a background thread after `latency` each.
    pub fn with_latency(latency: Duration) -> Self {
        Self::with_completer(Completer::background("memory-gpu", latency))
    }

    /// Creations complete before `begin_create` returns.
    pub fn inline() -> Self {
        Self::with_completer(Completer::inline())
    }

    fn with_completer(completer: Completer) -> Self {
        Self {
            state: Arc::new(GraphicsState {
                next_handle: AtomicU64::new(1),
                loads: DashMap::new(),
                live: DashMap::new(),
                created: Mutex::new(Vec::new()),
                violations: Mutex::new(Vec::new()),
                failures: DashMap::new(),
            }),
            completer,
        }
    }

    /// Make every creation of `id` fail with `error`.
    pub fn fail_creation(&self, id: ResourceId, error: BackendError) {
        self.state.failures.insert(id, error);
    }

    /// How many times creation of `id` was started.
    pub fn load_count(&self, id: &ResourceId) -> usize {
        self.state.loads.get(id).map_or(0, |count| *count)
    }

    pub fn total_loads(&self) -> usize {
        self.state.loads.iter().map(|e| *e.value()).sum()
    }

    /// Successfully created resources, in completion order.
    pub fn creation_order(&self) -> Vec<ResourceId> {
        lock(&self.state.created).clone()
    }

    /// Requests that referenced a dependency handle that was not live.
    pub fn violations(&self) -> Vec<String> {
        lock(&self.state.violations).clone()
    }

    /// Objects created and not yet released.
    pub fn live_count(&self) -> usize {
        self.state.live.len()
    }

    pub fn is_live(&self, handle: GpuHandle) -> bool {
        self.state.live.contains_key(&handle)
    }
}

impl Default for MemoryGraphics {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphicsBackend for MemoryGraphics {
    fn begin_create(&self, request: GpuRequest, done: CreateCallback) {
        *self.state.loads.entry(request.id.clone()).or_insert(0) += 1;
        trace!(resource = %request.id, bytes = request.bytes.len(), "creation started");

        for dependency in &request.dependencies {
            if !self.state.live.contains_key(dependency) {
                let violation = format!("{} created with dependency {dependency} not live", request.id);
                warn!(%violation, "dependency ordering violated");
                lock(&self.state.violations).push(violation);
            }
        }

        let state = self.state.clone();
        self.completer.run(Box::new(move || {
            if let Some(error) = state.failures.get(&request.id).map(|e| e.value().clone()) {
                done(Err(error));
                return;
            }
            let handle = GpuHandle::from_raw(state.next_handle.fetch_add(1, Ordering::Relaxed));
            state.live.insert(handle, request.id.clone());
            lock(&state.created).push(request.id);
            done(Ok(handle));
        }));
    }

    fn release(&self, handle: GpuHandle) {
        if self.state.live.remove(&handle).is_none() {
            warn!(gpu = %handle, "released an object that is not live");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::descriptor::ResourceParams;

    #[test]
    fn test_resolve_first_existing_candidate() {
        let fs = MemoryFilesystem::inline().with_file("b.png", vec![1, 2, 3]);
        let candidates = vec![PathBuf::from("a.png"), PathBuf::from("b.png")];
        assert_eq!(fs.resolve(&candidates), Some(PathBuf::from("b.png")));
        assert_eq!(fs.resolve(&[PathBuf::from("c.png")]), None);
    }

    #[test]
    fn test_background_read_delivers_bytes() {
        let fs = MemoryFilesystem::new().with_file("a.glsl", b"void main() {}".to_vec());
        let (tx, rx) = mpsc::channel();
        fs.begin_read(Path::new("a.glsl"), Box::new(move |result: io::Result<Vec<u8>>| {
            tx.send(result.map(|bytes| bytes.len())).unwrap();
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap(), 14);
        assert_eq!(fs.read_count("a.glsl"), 1);
    }

    #[test]
    fn test_injected_read_failure() {
        let fs = MemoryFilesystem::inline().with_file("a.glsl", Vec::new());
        fs.fail_reads("a.glsl", io::ErrorKind::PermissionDenied);
        let (tx, rx) = mpsc::channel();
        fs.begin_read(Path::new("a.glsl"), Box::new(move |result: io::Result<Vec<u8>>| {
            tx.send(result.map_err(|e| e.kind())).unwrap();
        }));
        assert_eq!(rx.recv().unwrap(), Err(io::ErrorKind::PermissionDenied));
        assert_eq!(fs.reads().get(Path::new("a.glsl")), Some(&1));
    }

    fn request(id: ResourceId, dependencies: Vec<GpuHandle>) -> GpuRequest {
        GpuRequest {
            id,
            params: ResourceParams::None,
            bytes: Vec::new(),
            dependencies,
        }
    }

    #[test]
    fn test_graphics_records_order_and_violations() {
        let gpu = MemoryGraphics::inline();
        let (tx, rx) = mpsc::channel();
        let sent = tx.clone();
        gpu.begin_create(
            request(ResourceId::shader("lit.frag"), Vec::new()),
            Box::new(move |r: Result<GpuHandle, BackendError>| sent.send(r).unwrap()),
        );
        let shader = rx.recv().unwrap().unwrap();
        assert!(gpu.is_live(shader));

        gpu.begin_create(
            request(ResourceId::material("brick"), vec![shader, GpuHandle::from_raw(99)]),
            Box::new(move |r: Result<GpuHandle, BackendError>| tx.send(r).unwrap()),
        );
        assert!(rx.recv().unwrap().is_ok());
        assert_eq!(
            gpu.creation_order(),
            vec![ResourceId::shader("lit.frag"), ResourceId::material("brick")]
        );
        assert_eq!(gpu.violations().len(), 1);
        assert_eq!(gpu.total_loads(), 2);

        gpu.release(shader);
        assert!(!gpu.is_live(shader));
        assert_eq!(gpu.live_count(), 1);
    }

    #[test]
    fn test_injected_creation_failure() {
        let gpu = MemoryGraphics::inline();
        let id = ResourceId::shader("broken.frag");
        gpu.fail_creation(id.clone(), BackendError::Compile("syntax error".into()));
        let (tx, rx) = mpsc::channel();
        gpu.begin_create(request(id.clone(), Vec::new()), Box::new(move |r: Result<GpuHandle, BackendError>| tx.send(r).unwrap()));
        assert_eq!(rx.recv().unwrap(), Err(BackendError::Compile("syntax error".into())));
        assert_eq!(gpu.load_count(&id), 1);
        assert_eq!(gpu.live_count(), 0);
    }
}
