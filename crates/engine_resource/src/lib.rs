//! # engine_resource
//!
//! Loads GPU resources that depend on one another, as fibers on the engine
//! scheduler.
//!
//! Every identity is loaded at most once: concurrent requests for the same
//! [`ResourceId`] attach to the same [`LoadNode`] in the [`ResourceCache`].
//! A node's fiber first waits for all of its dependencies, then reads its
//! source bytes through a [`FilesystemResolver`] and creates the GPU object
//! through a [`GraphicsBackend`]. Both collaborators report completion by
//! callback; the fiber is parked in between and holds no worker thread.
//!
//! Failures propagate along dependency edges as
//! [`ResourceError::DependencyFailed`] without touching siblings. Dropping
//! the last [`PendingResource`] for a load that has not started cancels it.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use engine_resource::{
//!     MemoryCatalog, MemoryFilesystem, MemoryGraphics, ResourceDescriptor, ResourceId,
//!     ResourceManager, ResourceManagerConfig,
//! };
//! use engine_scheduler::SchedulerConfig;
//!
//! let catalog = MemoryCatalog::new()
//!     .with(ResourceDescriptor::new(ResourceId::shader("lit.vert")).with_source("lit.vert"))
//!     .unwrap()
//!     .with(ResourceDescriptor::new(ResourceId::texture("brick.png")).with_source("brick.png"))
//!     .unwrap()
//!     .with(
//!         ResourceDescriptor::new(ResourceId::material("brick"))
//!             .with_dependency(ResourceId::shader("lit.vert"))
//!             .with_dependency(ResourceId::texture("brick.png")),
//!     )
//!     .unwrap();
//! let filesystem = MemoryFilesystem::inline()
//!     .with_file("lit.vert", b"void main() {}".to_vec())
//!     .with_file("brick.png", vec![0u8; 16]);
//!
//! let manager = ResourceManager::new(
//!     ResourceManagerConfig::default().with_scheduler(SchedulerConfig::inline()),
//!     Arc::new(catalog),
//!     Arc::new(filesystem),
//!     Arc::new(MemoryGraphics::inline()),
//! )
//! .unwrap();
//!
//! let pending = manager.request_resource(&ResourceId::material("brick"));
//! while manager.run_pending(16) > 0 {}
//!
//! let material = pending.wait().unwrap();
//! assert_eq!(material.dependencies().len(), 2);
//! ```

pub mod backend;
pub mod cache;
pub mod catalog;
pub mod descriptor;
pub mod error;
pub mod graph;
pub mod identity;
pub mod manager;
pub mod memory;
pub mod node;
pub mod pending;
pub mod resource;

pub use backend::{
    BackendError, CreateCallback, FilesystemResolver, GpuHandle, GpuRequest, GraphicsBackend,
    ReadCallback,
};
pub use cache::ResourceCache;
pub use catalog::{Manifest, MemoryCatalog, ResourceCatalog};
pub use descriptor::{RenderBufferKind, ResourceDescriptor, ResourceParams, ShaderStage, Winding};
pub use error::{CatalogError, LoadError, ResourceError};
pub use graph::LoadGraph;
pub use identity::{ResourceId, ResourceKind};
pub use manager::{ResourceManager, ResourceManagerConfig, ResourceStats};
pub use memory::{MemoryFilesystem, MemoryGraphics};
pub use node::{Interest, LoadNode, LoadOutcome, LoadState};
pub use pending::PendingResource;
pub use resource::{LoadedResource, ResourceHandle};
