//! The resource cache: identity to load node, at most one node per identity.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::identity::{ResourceId, ResourceKind};
use crate::node::{LoadNode, LoadState};

/// Maps each identity to its single load node.
///
/// Sharded; operations on unrelated identities do not contend. Entries that
/// are still `Pending` or `InFlight` are never evicted.
#[derive(Debug, Default)]
pub struct ResourceCache {
    nodes: DashMap<ResourceId, Arc<LoadNode>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the node for `id`, or install the one `factory` builds.
    ///
    /// The lookup and the insert happen under one shard lock, so concurrent
    /// callers for the same identity all get the same node and exactly one of
    /// them sees `true`. `factory` runs under that lock and must not touch the
    /// cache.
    pub fn get_or_create(
        &self,
        id: &ResourceId,
        factory: impl FnOnce() -> LoadNode,
    ) -> (Arc<LoadNode>, bool) {
        match self.nodes.entry(id.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                let node = Arc::new(factory());
                entry.insert(node.clone());
                (node, true)
            }
        }
    }

    pub fn get(&self, id: &ResourceId) -> Option<Arc<LoadNode>> {
        self.nodes.get(id).map(|entry| entry.value().clone())
    }

    pub fn state(&self, id: &ResourceId) -> Option<LoadState> {
        self.get(id).map(|node| node.state())
    }

    /// Remove `id` only if it still maps to `node`.
    pub(crate) fn remove_if_same(&self, id: &ResourceId, node: &Arc<LoadNode>) -> bool {
        self.nodes
            .remove_if(id, |_, existing| Arc::ptr_eq(existing, node))
            .is_some()
    }

    /// Remove a finished entry. In-progress entries stay.
    pub fn evict(&self, id: &ResourceId) -> bool {
        let removed = self.nodes.remove_if(id, |_, node| node.is_terminal()).is_some();
        if removed {
            debug!(resource = %id, "evicted");
        }
        removed
    }

    /// Remove finished entries nobody outside the cache holds.
    ///
    /// Repeats until nothing changes, so a material and then the shader it
    /// was the last user of both go in one call.
    pub fn evict_unused(&self) -> usize {
        let mut total = 0;
        loop {
            let before = self.nodes.len();
            self.nodes
                .retain(|_, node| !(Arc::strong_count(node) == 1 && node.is_unused()));
            let removed = before.saturating_sub(self.nodes.len());
            if removed == 0 {
                break;
            }
            total += removed;
        }
        if total > 0 {
            debug!(evicted = total, "evicted unused resources");
        }
        total
    }

    /// Remove finished entries of an asset whose version is not
    /// `current_version`.
    pub fn evict_stale(&self, kind: ResourceKind, key: &str, current_version: u64) -> usize {
        let before = self.nodes.len();
        self.nodes.retain(|id, node| {
            !(id.kind == kind && id.key == key && id.version != current_version && node.is_terminal())
        });
        let removed = before.saturating_sub(self.nodes.len());
        if removed > 0 {
            debug!(%kind, key, current_version, evicted = removed, "evicted stale versions");
        }
        removed
    }

    /// Drop every entry. For teardown, once no loads are running.
    pub fn clear(&self) -> usize {
        let count = self.nodes.len();
        self.nodes.clear();
        count
    }

    /// Snapshot of all identities.
    pub fn ids(&self) -> Vec<ResourceId> {
        self.nodes.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of every entry's state.
    pub fn states(&self) -> Vec<(ResourceId, LoadState)> {
        self.nodes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::*;
    use crate::error::ResourceError;

    fn failed(id: &ResourceId) -> LoadNode {
        let node = LoadNode::new(id.clone(), Vec::new());
        node.resolve(Err(ResourceError::Shutdown), true);
        node
    }

    #[test]
    fn test_get_or_create_once_under_contention() {
        let cache = Arc::new(ResourceCache::new());
        let barrier = Arc::new(Barrier::new(8));
        let id = ResourceId::texture("brick.png");

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_create(&id, || LoadNode::new(id.clone(), Vec::new()))
                })
            })
            .collect();

        let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
        let first = &results[0].0;
        assert!(results.iter().all(|(node, _)| Arc::ptr_eq(node, first)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_in_progress_entries_are_not_evicted() {
        let cache = ResourceCache::new();
        let id = ResourceId::shader("lit.frag");
        let (node, _) = cache.get_or_create(&id, || LoadNode::new(id.clone(), Vec::new()));
        drop(node);

        assert!(!cache.evict(&id));
        assert_eq!(cache.evict_unused(), 0);
        assert_eq!(cache.state(&id), Some(LoadState::Pending));
    }

    #[test]
    fn test_evict_terminal_entry() {
        let cache = ResourceCache::new();
        let id = ResourceId::shader("lit.frag");
        cache.get_or_create(&id, || failed(&id));
        assert!(cache.evict(&id));
        assert!(cache.get(&id).is_none());
        assert!(!cache.evict(&id));
    }

    #[test]
    fn test_evict_unused_skips_held_nodes() {
        let cache = ResourceCache::new();
        let held = ResourceId::texture("held.png");
        let loose = ResourceId::texture("loose.png");
        let (node, _) = cache.get_or_create(&held, || failed(&held));
        cache.get_or_create(&loose, || failed(&loose));

        assert_eq!(cache.evict_unused(), 1);
        assert!(cache.get(&held).is_some());
        drop(node);
        assert_eq!(cache.evict_unused(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_evict_stale_versions() {
        let cache = ResourceCache::new();
        for version in 0..3 {
            let id = ResourceId::shader("lit.frag").with_version(version);
            cache.get_or_create(&id, || failed(&id));
        }
        let other = ResourceId::shader("unlit.frag");
        cache.get_or_create(&other, || failed(&other));

        assert_eq!(cache.evict_stale(ResourceKind::Shader, "lit.frag", 2), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&ResourceId::shader("lit.frag").with_version(2)).is_some());
    }

    #[test]
    fn test_remove_if_same_ignores_replacement() {
        let cache = ResourceCache::new();
        let id = ResourceId::texture("a.png");
        let (old, _) = cache.get_or_create(&id, || failed(&id));
        assert!(cache.remove_if_same(&id, &old));
        let (new, created) = cache.get_or_create(&id, || failed(&id));
        assert!(created);
        assert!(!cache.remove_if_same(&id, &old));
        assert!(cache.remove_if_same(&id, &new));
    }
}
