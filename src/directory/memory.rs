//! In-process directory tree
//!
//! Mirrors the directory service contract over a `DashMap`, with optional
//! injected transient failures so retry paths can be exercised.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::DirectoryClient;
use crate::types::{DirectoryId, DirectoryNode, LintelError, Result};

#[derive(Default)]
pub struct MemoryDirectory {
    nodes: DashMap<DirectoryId, DirectoryNode>,
    /// Number of upcoming calls that fail with a transient error
    failures: AtomicU32,
    calls: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_root(&self, id: DirectoryId) {
        self.nodes.insert(id, DirectoryNode::root(id));
    }

    pub fn insert_child(&self, id: DirectoryId, parent: DirectoryId) {
        self.nodes.insert(id, DirectoryNode::child(id, parent));
    }

    pub fn move_node(&self, id: DirectoryId, new_parent: DirectoryId) {
        if let Some(mut node) = self.nodes.get_mut(&id) {
            node.parent = Some(new_parent);
        }
    }

    /// Soft-delete: the node stays in the map flagged as deleted
    pub fn delete_node(&self, id: DirectoryId) {
        if let Some(mut node) = self.nodes.get_mut(&id) {
            node.deleted = true;
        }
    }

    /// Make the next `count` calls fail as if the network timed out
    pub fn fail_next(&self, count: u32) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(LintelError::Transient("injected directory timeout".into()));
        }
        Ok(())
    }

    fn live_node(&self, id: DirectoryId) -> Result<DirectoryNode> {
        match self.nodes.get(&id) {
            Some(node) if !node.deleted => Ok(node.clone()),
            _ => Err(LintelError::NotFound(format!("directory {}", id))),
        }
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn get_node(&self, id: DirectoryId) -> Result<DirectoryNode> {
        self.enter()?;
        self.live_node(id)
    }

    async fn get_ancestor_chain(&self, id: DirectoryId) -> Result<Vec<DirectoryNode>> {
        self.enter()?;

        let mut chain = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = self.live_node(id)?;

        while let Some(parent) = current.parent {
            if !seen.insert(parent) {
                return Err(LintelError::InvariantViolation(format!(
                    "cycle in directory tree at {}",
                    parent
                )));
            }
            current = self.live_node(parent)?;
            chain.push(current.clone());
        }

        Ok(chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(n: u128) -> DirectoryId {
        DirectoryId::from_u128(n)
    }

    #[tokio::test]
    async fn test_ancestor_chain_order() {
        let tree = MemoryDirectory::new();
        tree.insert_root(dir(1));
        tree.insert_child(dir(2), dir(1));
        tree.insert_child(dir(3), dir(2));

        let chain = tree.get_ancestor_chain(dir(3)).await.unwrap();
        let ids: Vec<_> = chain.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![dir(2), dir(1)]);
        assert!(tree.get_ancestor_chain(dir(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deleted_node_not_found() {
        let tree = MemoryDirectory::new();
        tree.insert_root(dir(1));
        tree.insert_child(dir(2), dir(1));
        tree.delete_node(dir(2));

        assert!(tree.get_node(dir(2)).await.unwrap_err().is_not_found());
        assert!(tree.get_ancestor_chain(dir(2)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let tree = MemoryDirectory::new();
        tree.insert_root(dir(1));
        tree.fail_next(2);

        assert!(tree.get_node(dir(1)).await.unwrap_err().is_retryable());
        assert!(tree.get_node(dir(1)).await.unwrap_err().is_retryable());
        assert!(tree.get_node(dir(1)).await.is_ok());
        assert_eq!(tree.call_count(), 3);
    }
}
