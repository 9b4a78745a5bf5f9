//! Static resource descriptions.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::descriptor::ResourceDescriptor;
use crate::error::CatalogError;
use crate::identity::{ResourceId, ResourceKind};

/// Answers "what is this resource made of?" for the load graph.
///
/// The graph does not trust implementations to be acyclic; it checks every
/// dependency chain itself before scheduling a load.
pub trait ResourceCatalog: Send + Sync + 'static {
    fn describe(&self, id: &ResourceId) -> Option<ResourceDescriptor>;
}

/// The on-disk shape of a catalog.
///
/// ```json
/// { "resources": [
///     { "id": { "kind": "shader", "key": "sprite.vert", "version": 1 },
///       "sources": ["shaders/sprite.vert"],
///       "params": { "type": "shader", "stage": "vertex" } }
/// ] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
}

/// A catalog held in memory, validated on insert.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    descriptors: DashMap<ResourceId, ResourceDescriptor>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemoryCatalog::insert`].
    ///
    /// # Errors
    ///
    /// See [`ResourceDescriptor::validate`].
    pub fn with(self, descriptor: ResourceDescriptor) -> Result<Self, CatalogError> {
        self.insert(descriptor)?;
        Ok(self)
    }

    /// Add or replace a descriptor.
    ///
    /// # Errors
    ///
    /// See [`ResourceDescriptor::validate`].
    pub fn insert(&self, descriptor: ResourceDescriptor) -> Result<(), CatalogError> {
        descriptor.validate()?;
        debug!(resource = %descriptor.id, dependencies = descriptor.dependencies.len(), "catalog entry added");
        self.descriptors.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    pub fn remove(&self, id: &ResourceId) -> Option<ResourceDescriptor> {
        self.descriptors.remove(id).map(|(_, descriptor)| descriptor)
    }

    /// # Errors
    ///
    /// The first descriptor that fails validation.
    pub fn from_manifest(manifest: Manifest) -> Result<Self, CatalogError> {
        let catalog = Self::new();
        for descriptor in manifest.resources {
            catalog.insert(descriptor)?;
        }
        Ok(catalog)
    }

    /// # Errors
    ///
    /// [`CatalogError::Manifest`] for malformed JSON, otherwise the first
    /// descriptor that fails validation.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let manifest: Manifest = serde_json::from_str(json)?;
        Self::from_manifest(manifest)
    }

    /// All identities, sorted.
    pub fn ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<_> = self.descriptors.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Highest version registered for an asset.
    pub fn latest_version(&self, kind: ResourceKind, key: &str) -> Option<u64> {
        self.descriptors
            .iter()
            .filter(|e| e.key().kind == kind && e.key().key == key)
            .map(|e| e.key().version)
            .max()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

impl ResourceCatalog for MemoryCatalog {
    fn describe(&self, id: &ResourceId) -> Option<ResourceDescriptor> {
        self.descriptors.get(id).map(|e| e.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ResourceParams, ShaderStage};

    const MANIFEST: &str = r#"{
        "resources": [
            { "id": { "kind": "shader", "key": "sprite.vert" },
              "sources": ["shaders/sprite.vert"],
              "params": { "type": "shader", "stage": "vertex" } },
            { "id": { "kind": "shader", "key": "sprite.vert", "version": 2 },
              "sources": ["shaders/sprite.v2.vert"] },
            { "id": { "kind": "material", "key": "sprite" },
              "dependencies": [ { "kind": "shader", "key": "sprite.vert" } ] }
        ]
    }"#;

    #[test]
    fn test_from_json() {
        let catalog = MemoryCatalog::from_json(MANIFEST).unwrap();
        assert_eq!(catalog.len(), 3);

        let shader = catalog.describe(&ResourceId::shader("sprite.vert")).unwrap();
        assert_eq!(
            shader.params,
            ResourceParams::Shader {
                stage: ShaderStage::Vertex
            }
        );
        let material = catalog.describe(&ResourceId::material("sprite")).unwrap();
        assert_eq!(material.dependencies, vec![ResourceId::shader("sprite.vert")]);
        assert_eq!(
            catalog.latest_version(ResourceKind::Shader, "sprite.vert"),
            Some(2)
        );
    }

    #[test]
    fn test_invalid_manifest_is_rejected() {
        let json = r#"{ "resources": [
            { "id": { "kind": "texture", "key": "a.png" },
              "dependencies": [ { "kind": "texture", "key": "b.png" } ] }
        ] }"#;
        assert!(matches!(
            MemoryCatalog::from_json(json),
            Err(CatalogError::IllegalDependency { .. })
        ));
        assert!(matches!(
            MemoryCatalog::from_json("{ not json"),
            Err(CatalogError::Manifest(_))
        ));
    }

    #[test]
    fn test_insert_replaces_and_remove() {
        let catalog = MemoryCatalog::new()
            .with(ResourceDescriptor::new(ResourceId::texture("brick.png")))
            .unwrap();
        catalog
            .insert(ResourceDescriptor::new(ResourceId::texture("brick.png")).with_source("brick.png"))
            .unwrap();
        assert_eq!(catalog.len(), 1);
        let removed = catalog.remove(&ResourceId::texture("brick.png")).unwrap();
        assert_eq!(removed.sources.len(), 1);
        assert!(catalog.is_empty());
    }
}
