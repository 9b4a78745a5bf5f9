//! What the catalog knows about a resource before it is loaded.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::identity::{ResourceId, ResourceKind};

/// Pipeline stage a shader is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// Attachment role of a render buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderBufferKind {
    Color,
    Depth,
    Stencil,
}

/// Vertex winding treated as front-facing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winding {
    #[default]
    CounterClockwise,
    Clockwise,
}

/// Kind-specific creation parameters, handed to the graphics backend as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceParams {
    /// Backend defaults.
    #[default]
    None,
    Shader {
        stage: ShaderStage,
    },
    Texture {
        #[serde(default)]
        srgb: bool,
        #[serde(default)]
        mipmaps: bool,
    },
    Material {
        #[serde(default)]
        winding: Winding,
    },
    Canvas {
        width: u32,
        height: u32,
    },
    RenderBuffer {
        kind: RenderBufferKind,
        width: u32,
        height: u32,
    },
}

impl ResourceParams {
    /// The kind these parameters belong to; `None` fits every kind.
    #[must_use]
    pub fn kind(&self) -> Option<ResourceKind> {
        match self {
            Self::None => None,
            Self::Shader { .. } => Some(ResourceKind::Shader),
            Self::Texture { .. } => Some(ResourceKind::Texture),
            Self::Material { .. } => Some(ResourceKind::Material),
            Self::Canvas { .. } => Some(ResourceKind::Canvas),
            Self::RenderBuffer { .. } => Some(ResourceKind::RenderBuffer),
        }
    }
}

/// Everything needed to load one resource.
///
/// `sources` are candidate paths tried in order; the first one the
/// filesystem resolves is read. A resource with no sources skips the read
/// step and is created from its parameters and dependencies alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    #[serde(default)]
    pub params: ResourceParams,
}

impl ResourceDescriptor {
    pub fn new(id: ResourceId) -> Self {
        Self {
            id,
            sources: Vec::new(),
            dependencies: Vec::new(),
            params: ResourceParams::None,
        }
    }

    #[must_use]
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.sources.push(path.into());
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, id: ResourceId) -> Self {
        self.dependencies.push(id);
        self
    }

    #[must_use]
    pub fn with_params(mut self, params: ResourceParams) -> Self {
        self.params = params;
        self
    }

    /// Check the static dependency rules for this descriptor's kind.
    ///
    /// # Errors
    ///
    /// [`CatalogError::IllegalDependency`] for an edge the kind does not
    /// allow, [`CatalogError::DuplicateDependency`] for a repeated edge and
    /// [`CatalogError::ParamsMismatch`] for parameters of another kind.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if let Some(kind) = self.params.kind()
            && kind != self.id.kind
        {
            return Err(CatalogError::ParamsMismatch {
                id: self.id.clone(),
                params: kind,
            });
        }

        for (index, dependency) in self.dependencies.iter().enumerate() {
            if !self.id.kind.accepts_dependency(dependency.kind) {
                return Err(CatalogError::IllegalDependency {
                    id: self.id.clone(),
                    dependency: dependency.clone(),
                });
            }
            if self.dependencies[..index].contains(dependency) {
                return Err(CatalogError::DuplicateDependency {
                    id: self.id.clone(),
                    dependency: dependency.clone(),
                });
            }
        }
        Ok(())
    }
}
