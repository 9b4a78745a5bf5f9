//! Resource identities.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kinds of graphics resource the loader knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Shader,
    Texture,
    Material,
    Canvas,
    RenderBuffer,
}

impl ResourceKind {
    /// Leaf kinds are built from source files only.
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        matches!(self, Self::Shader | Self::Texture | Self::RenderBuffer)
    }

    /// Whether a resource of this kind may depend on one of kind `dependency`.
    ///
    /// Materials use shaders and textures, canvases use render buffers, and
    /// leaf kinds use nothing.
    #[must_use]
    pub const fn accepts_dependency(self, dependency: ResourceKind) -> bool {
        match self {
            Self::Material => matches!(dependency, Self::Shader | Self::Texture),
            Self::Canvas => matches!(dependency, Self::RenderBuffer),
            Self::Shader | Self::Texture | Self::RenderBuffer => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shader => "shader",
            Self::Texture => "texture",
            Self::Material => "material",
            Self::Canvas => "canvas",
            Self::RenderBuffer => "render_buffer",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniquely identifies a loadable resource: kind, source key and version.
///
/// Two requests with equal identities share one load. The version takes
/// part in equality, so a hot-reloaded asset gets a fresh cache entry while
/// the old one stays valid for whoever still holds it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub key: String,
    #[serde(default)]
    pub version: u64,
}

impl ResourceId {
    /// Version `0` of `key`.
    pub fn new(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            version: 0,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn shader(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::Shader, key)
    }

    pub fn texture(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::Texture, key)
    }

    pub fn material(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::Material, key)
    }

    pub fn canvas(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::Canvas, key)
    }

    pub fn render_buffer(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::RenderBuffer, key)
    }

    /// `true` if `other` names the same asset, whatever its version.
    #[must_use]
    pub fn same_asset(&self, other: &ResourceId) -> bool {
        self.kind == other.kind && self.key == other.key
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@v{}", self.kind, self.key, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_takes_part_in_equality() {
        let v0 = ResourceId::shader("sprite.vert");
        let v1 = ResourceId::shader("sprite.vert").with_version(1);
        assert_ne!(v0, v1);
        assert!(v0.same_asset(&v1));
        assert_eq!(v1.to_string(), "shader:sprite.vert@v1");
    }

    #[test]
    fn test_dependency_rules() {
        use ResourceKind::*;
        assert!(Material.accepts_dependency(Shader));
        assert!(Material.accepts_dependency(Texture));
        assert!(!Material.accepts_dependency(Canvas));
        assert!(Canvas.accepts_dependency(RenderBuffer));
        assert!(!Canvas.accepts_dependency(Texture));
        assert!(!Shader.accepts_dependency(Shader));
        assert!(RenderBuffer.is_leaf());
        assert!(!Material.is_leaf());
    }

    #[test]
    fn test_id_from_json_defaults_version() {
        let id: ResourceId =
            serde_json::from_str(r#"{"kind":"render_buffer","key":"shadow"}"#).unwrap();
        assert_eq!(id, ResourceId::render_buffer("shadow"));
    }
}
