//! Resource error types.
//!
//! Every error that can reach more than one waiter is `Clone`; shared causes
//! sit behind an `Arc`.

use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use engine_fiber::FiberError;

use crate::backend::BackendError;
use crate::identity::{ResourceId, ResourceKind};

/// Errors raised while building a catalog.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// A dependency edge the resource's kind does not allow.
    #[error("{id} may not depend on {dependency}")]
    IllegalDependency {
        id: ResourceId,
        dependency: ResourceId,
    },

    #[error("{id} lists {dependency} more than once")]
    DuplicateDependency {
        id: ResourceId,
        dependency: ResourceId,
    },

    #[error("{id} carries {params} parameters")]
    ParamsMismatch {
        id: ResourceId,
        params: ResourceKind,
    },

    #[error("invalid manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

/// Why a resource's own load step failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// None of the candidate source paths exist.
    #[error("no source found among {candidates:?}")]
    NotFound { candidates: Vec<PathBuf> },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    #[error("graphics backend: {0}")]
    Backend(#[from] BackendError),

    /// The catalog has no descriptor for the identity.
    #[error("resource is not in the catalog")]
    UnknownResource,

    /// The load fiber stopped before recording an outcome.
    #[error("load was interrupted")]
    Interrupted,

    #[error(transparent)]
    Fiber(#[from] FiberError),
}

/// The terminal error of a resource request.
///
/// Names the failing identity and its proximate cause: its own load step,
/// or the dependency that failed first.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResourceError {
    #[error("failed to load {id}: {source}")]
    LoadFailure {
        id: ResourceId,
        #[source]
        source: LoadError,
    },

    #[error("{id} failed because its dependency {dependency} failed")]
    DependencyFailed {
        id: ResourceId,
        dependency: ResourceId,
        #[source]
        cause: Arc<ResourceError>,
    },

    /// `path` starts and ends with `id`.
    #[error("dependency cycle at {id}: {}", display_path(.path))]
    DependencyCycle { id: ResourceId, path: Vec<ResourceId> },

    /// Every party interested in the load went away before it started.
    #[error("request for {id} was cancelled")]
    Cancelled { id: ResourceId },

    #[error("resource manager is shut down")]
    Shutdown,
}

impl ResourceError {
    /// The identity this error is about, if any.
    #[must_use]
    pub fn id(&self) -> Option<&ResourceId> {
        match self {
            Self::LoadFailure { id, .. }
            | Self::DependencyFailed { id, .. }
            | Self::DependencyCycle { id, .. }
            | Self::Cancelled { id } => Some(id),
            Self::Shutdown => None,
        }
    }

    /// Follow `DependencyFailed` links down to the error that started it.
    #[must_use]
    pub fn root_cause(&self) -> &ResourceError {
        let mut current = self;
        while let Self::DependencyFailed { cause, .. } = current {
            current = cause;
        }
        current
    }
}

fn display_path(path: &[ResourceId]) -> String {
    let mut out = String::new();
    for (index, id) in path.iter().enumerate() {
        if index > 0 {
            out.push_str(" -> ");
        }
        let _ = write!(out, "{id}");
    }
    out
}
