//! Role, permission and assignment types
//!
//! Roles, permissions and explicit assignments are written through the CRUD
//! boundary. Directory permission links and node state are written only by
//! the reconciler.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::directory::DirectoryId;

pub type RoleId = Uuid;

/// A named set of permissions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Populated by `get_role`; empty in listings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
}

/// Input for creating a role
#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewRole {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), description: None }
    }
}

/// Partial update of a role; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A target capability, identified by its target string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Permission {
    pub fn new(target: impl Into<String>) -> Self {
        Self { target: target.into(), description: None }
    }
}

/// Explicit grant of a role to a subject within a scope, anchored at a directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role_id: RoleId,
    pub subject_id: String,
    pub scope: String,
    pub directory_id: DirectoryId,
}

impl RoleAssignment {
    pub fn new(
        role_id: RoleId,
        subject_id: impl Into<String>,
        scope: impl Into<String>,
        directory_id: DirectoryId,
    ) -> Self {
        Self {
            role_id,
            subject_id: subject_id.into(),
            scope: scope.into(),
            directory_id,
        }
    }
}

/// Filters for listing assignments; `None` matches everything
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignmentQuery {
    pub subject: Option<String>,
    pub scope: Option<String>,
    pub role: Option<RoleId>,
    pub directory: Option<DirectoryId>,
}

impl AssignmentQuery {
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn role(mut self, role: RoleId) -> Self {
        self.role = Some(role);
        self
    }

    pub fn directory(mut self, directory: DirectoryId) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn matches(&self, a: &RoleAssignment) -> bool {
        self.subject.as_ref().map_or(true, |s| *s == a.subject_id)
            && self.scope.as_ref().map_or(true, |s| *s == a.scope)
            && self.role.map_or(true, |r| r == a.role_id)
            && self.directory.map_or(true, |d| d == a.directory_id)
    }
}

/// An assignment inherited by `directory_id` from `source_directory_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirectoryPermissionLink {
    pub directory_id: DirectoryId,
    pub role_id: RoleId,
    pub subject_id: String,
    pub scope: String,
    pub source_directory_id: DirectoryId,
}

impl DirectoryPermissionLink {
    /// Link through which `directory` inherits an explicit assignment
    pub fn inherited(directory: DirectoryId, assignment: &RoleAssignment) -> Self {
        Self {
            directory_id: directory,
            role_id: assignment.role_id,
            subject_id: assignment.subject_id.clone(),
            scope: assignment.scope.clone(),
            source_directory_id: assignment.directory_id,
        }
    }

    /// The same inherited grant, owned by another directory
    pub fn retarget(&self, directory: DirectoryId) -> Self {
        Self { directory_id: directory, ..self.clone() }
    }
}

/// One row of a node's effective permission set
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectivePermission {
    pub directory_id: DirectoryId,
    pub subject_id: String,
    pub scope: String,
    pub role_id: RoleId,
    pub target: String,
    /// Directory that holds the explicit assignment (the node itself when not inherited)
    pub source_directory_id: DirectoryId,
}

/// Filters for the effective permission query
#[derive(Debug, Clone, Deserialize)]
pub struct EffectiveQuery {
    pub directory: DirectoryId,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

impl EffectiveQuery {
    pub fn for_directory(directory: DirectoryId) -> Self {
        Self { directory, subject: None, scope: None, target: None }
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn matches(&self, p: &EffectivePermission) -> bool {
        self.subject.as_ref().map_or(true, |s| *s == p.subject_id)
            && self.scope.as_ref().map_or(true, |s| *s == p.scope)
            && self.target.as_ref().map_or(true, |t| *t == p.target)
    }
}

/// Persisted reconciliation state of one directory node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeState {
    /// Last applied event sequence; `None` until the first event lands
    pub cursor: Option<u64>,
    /// Bumped on every committed delta; used for optimistic concurrency
    pub revision: u64,
    pub links: BTreeSet<DirectoryPermissionLink>,
    /// Last write found the node gone from the directory
    pub deleted: bool,
}

impl NodeState {
    /// Whether an event with this sequence was already applied (or is stale)
    pub fn has_applied(&self, sequence: u64) -> bool {
        self.cursor.is_some_and(|cursor| sequence <= cursor)
    }
}

/// Transactional change to one node's links and cursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDelta {
    pub directory_id: DirectoryId,
    pub expected_revision: u64,
    /// New cursor value; `None` leaves the cursor untouched
    pub cursor: Option<u64>,
    pub insert: Vec<DirectoryPermissionLink>,
    pub delete: Vec<DirectoryPermissionLink>,
    /// Mark the node deleted; resync stops visiting it
    pub deleted: bool,
}

impl NodeDelta {
    /// Diff the current state against the target link set
    pub fn between(
        directory_id: DirectoryId,
        current: &NodeState,
        target: &BTreeSet<DirectoryPermissionLink>,
        cursor: Option<u64>,
    ) -> Self {
        Self {
            directory_id,
            expected_revision: current.revision,
            cursor,
            insert: target.difference(&current.links).cloned().collect(),
            delete: current.links.difference(target).cloned().collect(),
            deleted: false,
        }
    }

    /// Record that the node no longer exists
    pub fn tombstone(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn changes_links(&self) -> bool {
        !self.insert.is_empty() || !self.delete.is_empty()
    }

    /// Nothing to write at all: no link change, no cursor move, no tombstone
    pub fn is_noop(&self) -> bool {
        !self.changes_links() && self.cursor.is_none() && !self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(dir: u128, subject: &str, source: u128) -> DirectoryPermissionLink {
        DirectoryPermissionLink {
            directory_id: DirectoryId::from_u128(dir),
            role_id: Uuid::from_u128(100),
            subject_id: subject.to_string(),
            scope: "org".to_string(),
            source_directory_id: DirectoryId::from_u128(source),
        }
    }

    #[test]
    fn test_delta_between() {
        let current = NodeState {
            cursor: Some(3),
            revision: 7,
            links: [link(2, "u1", 1), link(2, "u2", 1)].into_iter().collect(),
            deleted: false,
        };
        let target: BTreeSet<_> = [link(2, "u2", 1), link(2, "u3", 1)].into_iter().collect();

        let delta = NodeDelta::between(DirectoryId::from_u128(2), &current, &target, Some(4));
        assert_eq!(delta.expected_revision, 7);
        assert_eq!(delta.insert, vec![link(2, "u3", 1)]);
        assert_eq!(delta.delete, vec![link(2, "u1", 1)]);
        assert!(delta.changes_links());
    }

    #[test]
    fn test_refresh_delta_noop() {
        let current = NodeState {
            cursor: Some(1),
            revision: 1,
            links: [link(2, "u1", 1)].into_iter().collect(),
            deleted: false,
        };
        let delta = NodeDelta::between(DirectoryId::from_u128(2), &current, &current.links, None);
        assert!(delta.is_noop());
        assert!(!delta.tombstone().is_noop());
    }

    #[test]
    fn test_has_applied() {
        let fresh = NodeState::default();
        assert!(!fresh.has_applied(0));

        let seen = NodeState { cursor: Some(5), ..Default::default() };
        assert!(seen.has_applied(5));
        assert!(seen.has_applied(2));
        assert!(!seen.has_applied(6));
    }

    #[test]
    fn test_assignment_query() {
        let a = RoleAssignment::new(Uuid::from_u128(1), "u1", "org", DirectoryId::from_u128(1));
        assert!(AssignmentQuery::default().matches(&a));
        assert!(AssignmentQuery::default().subject("u1").scope("org").matches(&a));
        assert!(!AssignmentQuery::default().subject("u2").matches(&a));
        assert!(!AssignmentQuery::default().directory(DirectoryId::from_u128(9)).matches(&a));
    }

    #[test]
    fn test_link_retarget_keeps_source() {
        let original = link(2, "u1", 1);
        let moved = original.retarget(DirectoryId::from_u128(3));
        assert_eq!(moved.directory_id, DirectoryId::from_u128(3));
        assert_eq!(moved.source_directory_id, DirectoryId::from_u128(1));
    }
}
