//! Loaded resources.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::backend::{GpuHandle, GraphicsBackend};
use crate::identity::{ResourceId, ResourceKind};

/// Shared ownership of a loaded resource.
pub type ResourceHandle = Arc<LoadedResource>;

/// A resource whose GPU object exists.
///
/// Holds handles to its dependencies, so a material keeps its shader and
/// textures alive. Dropping the last handle releases the GPU object.
pub struct LoadedResource {
    id: ResourceId,
    gpu: GpuHandle,
    dependencies: Vec<ResourceHandle>,
    backend: Arc<dyn GraphicsBackend>,
}

impl LoadedResource {
    pub(crate) fn new(
        id: ResourceId,
        gpu: GpuHandle,
        dependencies: Vec<ResourceHandle>,
        backend: Arc<dyn GraphicsBackend>,
    ) -> Self {
        Self {
            id,
            gpu,
            dependencies,
            backend,
        }
    }

    pub fn id(&self) -> &ResourceId {
        &self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.id.kind
    }

    pub fn gpu(&self) -> GpuHandle {
        self.gpu
    }

    /// Dependencies in declaration order.
    pub fn dependencies(&self) -> &[ResourceHandle] {
        &self.dependencies
    }
}

impl Drop for LoadedResource {
    fn drop(&mut self) {
        trace!(resource = %self.id, gpu = %self.gpu, "releasing gpu object");
        self.backend.release(self.gpu);
    }
}

impl fmt::Debug for LoadedResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedResource")
            .field("id", &self.id)
            .field("gpu", &self.gpu)
            .field(
                "dependencies",
                &self.dependencies.iter().map(|d| d.id()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
