//! Observed directory structure
//!
//! Parent pointers and a children index learned from events and ancestor
//! lookups. Possibly stale; full resync clears it.

use std::collections::HashSet;

use dashmap::DashMap;

use crate::types::{DirectoryId, DirectoryNode};

#[derive(Default)]
pub struct DirectoryCache {
    /// node -> parent (`None` for a root)
    parents: DashMap<DirectoryId, Option<DirectoryId>>,
    /// parent -> direct children seen so far
    children: DashMap<DirectoryId, HashSet<DirectoryId>>,
}

impl DirectoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `node` currently sits under `parent`
    pub fn record(&self, node: DirectoryId, parent: Option<DirectoryId>) {
        let previous = self.parents.insert(node, parent);

        if let Some(Some(old_parent)) = previous {
            if Some(old_parent) != parent {
                if let Some(mut siblings) = self.children.get_mut(&old_parent) {
                    siblings.remove(&node);
                }
            }
        }
        if let Some(parent) = parent {
            self.children.entry(parent).or_default().insert(node);
        }
    }

    /// Record a chain as returned by the directory service (nearest first)
    pub fn record_chain(&self, node: DirectoryId, chain: &[DirectoryNode]) {
        self.record(node, chain.first().map(|n| n.id));
        for ancestor in chain {
            self.record(ancestor.id, ancestor.parent);
        }
    }

    /// Drop a deleted node
    pub fn forget(&self, node: DirectoryId) {
        if let Some((_, Some(parent))) = self.parents.remove(&node) {
            if let Some(mut siblings) = self.children.get_mut(&parent) {
                siblings.remove(&node);
            }
        }
        self.children.remove(&node);
    }

    /// `None` if unknown, `Some(None)` for a root
    pub fn parent_of(&self, node: DirectoryId) -> Option<Option<DirectoryId>> {
        self.parents.get(&node).map(|p| *p)
    }

    pub fn children_of(&self, node: DirectoryId) -> Vec<DirectoryId> {
        self.children
            .get(&node)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        self.parents.clear();
        self.children.clear();
    }

    pub fn len(&self) -> usize {
        self.parents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(n: u128) -> DirectoryId {
        DirectoryId::from_u128(n)
    }

    #[test]
    fn test_record_moves_child_between_parents() {
        let cache = DirectoryCache::new();
        cache.record(dir(3), Some(dir(1)));
        assert_eq!(cache.children_of(dir(1)), vec![dir(3)]);

        cache.record(dir(3), Some(dir(2)));
        assert!(cache.children_of(dir(1)).is_empty());
        assert_eq!(cache.children_of(dir(2)), vec![dir(3)]);
        assert_eq!(cache.parent_of(dir(3)), Some(Some(dir(2))));
    }

    #[test]
    fn test_record_chain() {
        let cache = DirectoryCache::new();
        let chain = vec![DirectoryNode::child(dir(2), dir(1)), DirectoryNode::root(dir(1))];
        cache.record_chain(dir(3), &chain);

        assert_eq!(cache.parent_of(dir(3)), Some(Some(dir(2))));
        assert_eq!(cache.parent_of(dir(2)), Some(Some(dir(1))));
        assert_eq!(cache.parent_of(dir(1)), Some(None));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_forget() {
        let cache = DirectoryCache::new();
        cache.record(dir(2), Some(dir(1)));
        cache.forget(dir(2));

        assert_eq!(cache.parent_of(dir(2)), None);
        assert!(cache.children_of(dir(1)).is_empty());
    }
}
