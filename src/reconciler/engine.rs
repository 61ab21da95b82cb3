//! Reconciliation engine
//!
//! Keeps every tracked node's Directory Permission Links equal to the
//! effective set of its nearest tracked ancestor.
//!
//! Per-event handling walks the (cached) ancestor chain and moves the node's
//! cursor in the same transaction as its link delta. Full resync recomputes
//! each known node from a freshly fetched chain and is the convergence
//! backstop; it never touches cursors. Nodes whose last attempt failed are
//! held in memory and included in the next resync.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::retry::RetryPolicy;
use crate::directory::{DirectoryCache, DirectoryClient};
use crate::store::PermissionStore;
use crate::types::{
    DirectoryEvent, DirectoryId, DirectoryNode, DirectoryPermissionLink, EventKind, LintelError,
    NodeDelta, Result,
};

type LinkSet = BTreeSet<DirectoryPermissionLink>;

/// Reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub retry: RetryPolicy,
    /// Deadline for each directory call and store transaction
    pub call_timeout: Duration,
    /// Longest ancestor chain accepted before the tree is considered corrupt
    pub max_depth: usize,
    /// Root of the managed subtree; nodes outside it inherit nothing
    pub base_directory: Option<DirectoryId>,
    /// Nodes recomputed in parallel during a full resync
    pub resync_concurrency: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(5),
            max_depth: 512,
            base_directory: None,
            resync_concurrency: 8,
        }
    }
}

/// Result of reconciling one event or refreshing one node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Sequence at or below the node's cursor; nothing written
    Skipped,
    Applied {
        added: usize,
        removed: usize,
        /// Known children whose inherited set may now be stale
        children: Vec<DirectoryId>,
    },
}

impl ReconcileOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Applied { added, removed, .. } if added + removed > 0)
    }

    pub fn children(&self) -> &[DirectoryId] {
        match self {
            Self::Applied { children, .. } => children,
            Self::Skipped => &[],
        }
    }
}

/// Summary of a full resync pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub examined: usize,
    pub changed: usize,
    pub failed: usize,
}

pub struct Reconciler {
    store: Arc<dyn PermissionStore>,
    directory: Arc<dyn DirectoryClient>,
    cache: DirectoryCache,
    /// Nodes left for the next resync after exhausting their retries
    deferred: DashSet<DirectoryId>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PermissionStore>,
        directory: Arc<dyn DirectoryClient>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            directory,
            cache: DirectoryCache::new(),
            deferred: DashSet::new(),
            config,
        }
    }

    /// Apply one directory event, retrying transient failures and conflicts
    pub async fn reconcile(&self, event: &DirectoryEvent) -> Result<ReconcileOutcome> {
        let result = self.config.retry.run(move || self.reconcile_once(event)).await;
        match &result {
            Ok(ReconcileOutcome::Applied { .. }) => {
                self.deferred.remove(&event.node_id);
            }
            Ok(ReconcileOutcome::Skipped) => {}
            Err(_) => {
                self.deferred.insert(event.node_id);
            }
        }
        result
    }

    /// Recompute one node without moving its cursor (descendant fix-up)
    pub async fn refresh(&self, node: DirectoryId) -> Result<ReconcileOutcome> {
        let result = self.config.retry.run(move || self.refresh_once(node)).await;
        if result.is_ok() {
            self.deferred.remove(&node);
        } else {
            self.deferred.insert(node);
        }
        result
    }

    /// Nodes waiting for the next resync after a failed event or refresh
    pub fn deferred(&self) -> Vec<DirectoryId> {
        self.deferred.iter().map(|node| *node).collect()
    }

    /// Recompute every known node from scratch
    pub async fn full_resync(&self) -> Result<ResyncReport> {
        self.cache.clear();

        let known = self
            .config
            .retry
            .run(move || self.deadline(self.store.known_directories()))
            .await?;
        let deferred = self.deferred();
        let nodes: BTreeSet<DirectoryId> =
            known.into_iter().chain(deferred.iter().copied()).collect();

        info!(nodes = nodes.len(), deferred = deferred.len(), "Starting full resync");

        let results: Vec<(DirectoryId, Result<ReconcileOutcome>)> = stream::iter(nodes)
            .map(|node| async move { (node, self.refresh(node).await) })
            .buffer_unordered(self.config.resync_concurrency.max(1))
            .collect()
            .await;

        let mut report = ResyncReport::default();
        for (node, result) in results {
            report.examined += 1;
            match result {
                Ok(outcome) if outcome.changed() => report.changed += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(node = %node, error = %e, "Resync failed for node");
                    report.failed += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            changed = report.changed,
            failed = report.failed,
            "Full resync complete"
        );
        Ok(report)
    }

    async fn reconcile_once(&self, event: &DirectoryEvent) -> Result<ReconcileOutcome> {
        let node = event.node_id;
        let state = self.deadline(self.store.node_state(node)).await?;

        if state.has_applied(event.sequence) {
            debug!(node = %node, sequence = event.sequence, cursor = ?state.cursor, "Skipping stale event");
            return Ok(ReconcileOutcome::Skipped);
        }

        let (target, live) = match event.kind {
            EventKind::Created | EventKind::Moved => {
                self.cache.record(node, event.parent_id);
                match self.inherited_links(node, event.parent_id).await {
                    Ok(target) => (target, true),
                    Err(e) if e.is_not_found() => {
                        debug!(node = %node, error = %e, "Node vanished, treating as deleted");
                        self.cache.forget(node);
                        (LinkSet::new(), false)
                    }
                    Err(e) => return Err(e),
                }
            }
            EventKind::Deleted => {
                self.cache.forget(node);
                (LinkSet::new(), false)
            }
        };

        let mut delta = NodeDelta::between(node, &state, &target, Some(event.sequence));
        if !live {
            delta = delta.tombstone();
        }
        debug!(
            node = %node,
            kind = %event.kind,
            sequence = event.sequence,
            insert = delta.insert.len(),
            delete = delta.delete.len(),
            "Applying event"
        );
        self.apply(delta, live).await
    }

    async fn refresh_once(&self, node: DirectoryId) -> Result<ReconcileOutcome> {
        // Revision must predate the chain fetch so a concurrent event forces a reread
        let state = self.deadline(self.store.node_state(node)).await?;

        let delta = match self.recompute_target(node).await {
            Ok(target) => NodeDelta::between(node, &state, &target, None),
            Err(e) if e.is_not_found() => {
                self.cache.forget(node);
                if state.deleted && state.links.is_empty() {
                    return Ok(ReconcileOutcome::Applied {
                        added: 0,
                        removed: 0,
                        children: Vec::new(),
                    });
                }
                NodeDelta::between(node, &state, &LinkSet::new(), None).tombstone()
            }
            Err(e) => return Err(e),
        };

        let live = !delta.deleted;
        self.apply(delta, live).await
    }

    async fn apply(&self, delta: NodeDelta, cascade: bool) -> Result<ReconcileOutcome> {
        let node = delta.directory_id;
        let added = delta.insert.len();
        let removed = delta.delete.len();
        let changed = delta.changes_links();

        if !delta.is_noop() {
            self.deadline(self.store.apply_node_delta(delta)).await?;
        }

        let children = if changed && cascade {
            self.cache.children_of(node)
        } else {
            Vec::new()
        };

        Ok(ReconcileOutcome::Applied { added, removed, children })
    }

    /// Effective set of the nearest tracked ancestor, retargeted at `node`
    async fn inherited_links(
        &self,
        node: DirectoryId,
        parent: Option<DirectoryId>,
    ) -> Result<LinkSet> {
        let base = self.config.base_directory;
        if base == Some(node) {
            return Ok(LinkSet::new());
        }

        let mut seen = HashSet::from([node]);
        let mut nearest: Option<LinkSet> = None;
        let mut next = parent;

        while let Some(current) = next {
            if !seen.insert(current) {
                return Err(LintelError::InvariantViolation(format!(
                    "cycle in ancestor chain of {} at {}",
                    node, current
                )));
            }
            if seen.len() > self.config.max_depth + 1 {
                return Err(LintelError::InvariantViolation(format!(
                    "ancestor chain of {} deeper than {}",
                    node, self.config.max_depth
                )));
            }

            if nearest.is_none() {
                let links = self.effective_links_of(current, node).await?;
                if !links.is_empty() {
                    // With a base directory the walk must still prove the node is in scope
                    if base.is_none() {
                        return Ok(links);
                    }
                    nearest = Some(links);
                }
            }

            if base == Some(current) {
                return Ok(nearest.unwrap_or_default());
            }

            next = self.parent_of(current).await?;
        }

        // Reached the root: nothing tracked above, or never passed the base
        Ok(LinkSet::new())
    }

    /// An ancestor's explicit assignments plus its inherited links, owned by `node`
    async fn effective_links_of(&self, ancestor: DirectoryId, node: DirectoryId) -> Result<LinkSet> {
        let explicit = self
            .deadline(self.store.explicit_assignments(&[ancestor]))
            .await?;
        let state = self.deadline(self.store.node_state(ancestor)).await?;

        Ok(explicit
            .iter()
            .map(|a| DirectoryPermissionLink::inherited(node, a))
            .chain(state.links.iter().map(|l| l.retarget(node)))
            .collect())
    }

    async fn parent_of(&self, node: DirectoryId) -> Result<Option<DirectoryId>> {
        if let Some(parent) = self.cache.parent_of(node) {
            return Ok(parent);
        }

        let chain = self.fetch_chain(node).await?;
        Ok(chain.first().map(|n| n.id))
    }

    async fn fetch_chain(&self, node: DirectoryId) -> Result<Vec<DirectoryNode>> {
        let chain = self
            .deadline(self.directory.get_ancestor_chain(node))
            .await?;

        if chain.len() > self.config.max_depth {
            return Err(LintelError::InvariantViolation(format!(
                "ancestor chain of {} has {} nodes (limit {})",
                node,
                chain.len(),
                self.config.max_depth
            )));
        }
        let mut seen = HashSet::from([node]);
        if let Some(repeat) = chain.iter().find(|n| !seen.insert(n.id)) {
            return Err(LintelError::InvariantViolation(format!(
                "cycle in ancestor chain of {} at {}",
                node, repeat.id
            )));
        }

        self.cache.record_chain(node, &chain);
        Ok(chain)
    }

    /// Target set from scratch: every explicit assignment on the in-scope chain
    async fn recompute_target(&self, node: DirectoryId) -> Result<LinkSet> {
        let chain = self.fetch_chain(node).await?;
        let ancestors = self.scoped(node, &chain);
        if ancestors.is_empty() {
            return Ok(LinkSet::new());
        }

        let explicit = self
            .deadline(self.store.explicit_assignments(&ancestors))
            .await?;

        Ok(explicit
            .iter()
            .map(|a| DirectoryPermissionLink::inherited(node, a))
            .collect())
    }

    /// Truncate a chain at the base directory; empty if the node is out of scope
    fn scoped(&self, node: DirectoryId, chain: &[DirectoryNode]) -> Vec<DirectoryId> {
        let ids = chain.iter().map(|n| n.id);
        match self.config.base_directory {
            None => ids.collect(),
            Some(base) if base == node => Vec::new(),
            Some(base) => match chain.iter().position(|n| n.id == base) {
                Some(pos) => ids.take(pos + 1).collect(),
                None => Vec::new(),
            },
        }
    }

    async fn deadline<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.config.call_timeout, call).await?
    }
}
