//! Collaborator interfaces: where bytes come from and where GPU objects are
//! made.
//!
//! Both collaborators are asynchronous in the same way: a `begin_*` call
//! returns at once and the outcome arrives later through a callback, on
//! whatever thread the implementation uses. The loader wraps each pair as a
//! suspension point, so the callback only ever resumes a fiber.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use crate::descriptor::ResourceParams;
use crate::identity::ResourceId;

/// Receives the bytes of a finished read.
pub type ReadCallback = Box<dyn FnOnce(io::Result<Vec<u8>>) + Send>;

/// Receives the outcome of a GPU creation.
pub type CreateCallback = Box<dyn FnOnce(Result<GpuHandle, BackendError>) + Send>;

/// Locates and reads source assets.
pub trait FilesystemResolver: Send + Sync + 'static {
    /// The first candidate that exists, or `None`.
    fn resolve(&self, candidates: &[PathBuf]) -> Option<PathBuf>;

    /// Start reading `path`; `done` is called exactly once.
    fn begin_read(&self, path: &Path, done: ReadCallback);
}

/// Opaque handle to an object owned by the graphics backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuHandle(u64);

impl GpuHandle {
    pub const fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for GpuHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpu#{}", self.0)
    }
}

/// Everything the backend needs to create one resource.
#[derive(Debug, Clone)]
pub struct GpuRequest {
    pub id: ResourceId,
    pub params: ResourceParams,
    /// Contents of the resolved source file; empty if the resource has none.
    pub bytes: Vec<u8>,
    /// Handles of the resource's dependencies, in declaration order. All of
    /// them are fully created.
    pub dependencies: Vec<GpuHandle>,
}

/// Creates shaders, textures, materials, canvases and render buffers.
pub trait GraphicsBackend: Send + Sync + 'static {
    /// Start creating the object described by `request`; `done` is called
    /// exactly once.
    fn begin_create(&self, request: GpuRequest, done: CreateCallback);

    /// The last owner of `handle` went away.
    fn release(&self, _handle: GpuHandle) {}
}

/// Errors reported by a graphics backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("compilation failed: {0}")]
    Compile(String),

    #[error("out of device memory")]
    OutOfMemory,

    #[error("device lost")]
    DeviceLost,

    #[error("{0}")]
    Other(String),
}
