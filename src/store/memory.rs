//! In-memory permission store
//!
//! Same contract as the SQLite store, held in ordered maps behind one mutex.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::PermissionStore;
use crate::types::{
    AssignmentQuery, DirectoryId, DirectoryPermissionLink, EffectivePermission, EffectiveQuery,
    LintelError, NewRole, NodeDelta, NodeState, Permission, Result, Role, RoleAssignment, RoleId,
    RoleUpdate,
};

#[derive(Default)]
struct MemoryState {
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<String, Permission>,
    role_permissions: BTreeSet<(RoleId, String)>,
    assignments: BTreeSet<RoleAssignment>,
    links: BTreeMap<DirectoryId, BTreeSet<DirectoryPermissionLink>>,
    cursors: HashMap<DirectoryId, CursorRow>,
}

#[derive(Debug, Clone, Copy, Default)]
struct CursorRow {
    sequence: Option<u64>,
    revision: u64,
    deleted: bool,
}

impl MemoryState {
    fn require_role(&self, id: RoleId) -> Result<&Role> {
        self.roles
            .get(&id)
            .ok_or_else(|| LintelError::NotFound(format!("role {}", id)))
    }

    fn permissions_of(&self, role: RoleId) -> Vec<Permission> {
        self.role_permissions
            .iter()
            .filter(|(r, _)| *r == role)
            .filter_map(|(_, target)| self.permissions.get(target).cloned())
            .collect()
    }
}

/// In-memory permission store
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MemoryState) -> Result<T>) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| LintelError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut state)
    }

    /// Every link held by any node, for assertions in tests
    pub fn all_links(&self) -> Result<BTreeSet<DirectoryPermissionLink>> {
        self.with_state(|s| Ok(s.links.values().flatten().cloned().collect()))
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn list_roles(&self) -> Result<Vec<Role>> {
        self.with_state(|s| Ok(s.roles.values().cloned().collect()))
    }

    async fn create_role(&self, input: NewRole) -> Result<Role> {
        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4(),
            name: input.name,
            description: input.description,
            created_at: now,
            updated_at: now,
            permissions: Vec::new(),
        };
        self.with_state(|s| {
            s.roles.insert(role.id, role.clone());
            Ok(role)
        })
    }

    async fn get_role(&self, id: RoleId) -> Result<Role> {
        self.with_state(|s| {
            let mut role = s.require_role(id)?.clone();
            role.permissions = s.permissions_of(id);
            Ok(role)
        })
    }

    async fn update_role(&self, id: RoleId, update: RoleUpdate) -> Result<Role> {
        self.with_state(|s| {
            let role = s
                .roles
                .get_mut(&id)
                .ok_or_else(|| LintelError::NotFound(format!("role {}", id)))?;
            if let Some(name) = update.name {
                role.name = name;
            }
            if let Some(description) = update.description {
                role.description = Some(description);
            }
            role.updated_at = Utc::now();
            Ok(role.clone())
        })
    }

    async fn delete_role(&self, id: RoleId) -> Result<()> {
        self.with_state(|s| {
            s.roles
                .remove(&id)
                .ok_or_else(|| LintelError::NotFound(format!("role {}", id)))?;
            s.role_permissions.retain(|(r, _)| *r != id);
            s.assignments.retain(|a| a.role_id != id);
            Ok(())
        })
    }

    async fn create_permission(&self, permission: Permission) -> Result<Permission> {
        self.with_state(|s| {
            s.permissions.insert(permission.target.clone(), permission.clone());
            Ok(permission)
        })
    }

    async fn list_permissions(&self, target: Option<&str>) -> Result<Vec<Permission>> {
        self.with_state(|s| {
            Ok(s.permissions
                .values()
                .filter(|p| target.map_or(true, |t| p.target == t))
                .cloned()
                .collect())
        })
    }

    async fn add_role_permission(&self, role: RoleId, target: &str) -> Result<()> {
        self.with_state(|s| {
            s.require_role(role)?;
            if !s.permissions.contains_key(target) {
                return Err(LintelError::NotFound(format!("permission {}", target)));
            }
            s.role_permissions.insert((role, target.to_string()));
            Ok(())
        })
    }

    async fn remove_role_permission(&self, role: RoleId, target: &str) -> Result<()> {
        self.with_state(|s| {
            s.require_role(role)?;
            if !s.role_permissions.remove(&(role, target.to_string())) {
                return Err(LintelError::NotFound(format!(
                    "permission {} on role {}",
                    target, role
                )));
            }
            Ok(())
        })
    }

    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>> {
        self.with_state(|s| {
            s.require_role(role)?;
            Ok(s.permissions_of(role))
        })
    }

    async fn assign_role(&self, assignment: RoleAssignment) -> Result<()> {
        self.with_state(|s| {
            s.require_role(assignment.role_id)?;
            s.assignments.insert(assignment);
            Ok(())
        })
    }

    async fn remove_role_assignment(&self, assignment: &RoleAssignment) -> Result<()> {
        self.with_state(|s| {
            if !s.assignments.remove(assignment) {
                return Err(LintelError::NotFound(format!(
                    "assignment of role {} to {} in {}",
                    assignment.role_id, assignment.subject_id, assignment.scope
                )));
            }
            Ok(())
        })
    }

    async fn role_assignments(&self, role: RoleId) -> Result<Vec<RoleAssignment>> {
        self.with_state(|s| {
            s.require_role(role)?;
            Ok(s.assignments.iter().filter(|a| a.role_id == role).cloned().collect())
        })
    }

    async fn list_assignments(&self, query: &AssignmentQuery) -> Result<Vec<RoleAssignment>> {
        self.with_state(|s| Ok(s.assignments.iter().filter(|a| query.matches(a)).cloned().collect()))
    }

    async fn effective_permissions(
        &self,
        query: &EffectiveQuery,
    ) -> Result<Vec<EffectivePermission>> {
        self.with_state(|s| {
            let explicit = s
                .assignments
                .iter()
                .filter(|a| a.directory_id == query.directory)
                .map(|a| (a.role_id, &a.subject_id, &a.scope, a.directory_id));
            let inherited = s
                .links
                .get(&query.directory)
                .into_iter()
                .flatten()
                .map(|l| (l.role_id, &l.subject_id, &l.scope, l.source_directory_id));

            let mut rows = BTreeSet::new();
            for (role_id, subject, scope, source) in explicit.chain(inherited) {
                for permission in s.permissions_of(role_id) {
                    let row = EffectivePermission {
                        directory_id: query.directory,
                        subject_id: subject.clone(),
                        scope: scope.clone(),
                        role_id,
                        target: permission.target,
                        source_directory_id: source,
                    };
                    if query.matches(&row) {
                        rows.insert(row);
                    }
                }
            }
            Ok(rows.into_iter().collect())
        })
    }

    async fn explicit_assignments(
        &self,
        directories: &[DirectoryId],
    ) -> Result<Vec<RoleAssignment>> {
        self.with_state(|s| {
            Ok(s.assignments
                .iter()
                .filter(|a| directories.contains(&a.directory_id))
                .cloned()
                .collect())
        })
    }

    async fn node_state(&self, directory: DirectoryId) -> Result<NodeState> {
        self.with_state(|s| {
            let row = s.cursors.get(&directory).copied().unwrap_or_default();
            Ok(NodeState {
                cursor: row.sequence,
                revision: row.revision,
                links: s.links.get(&directory).cloned().unwrap_or_default(),
                deleted: row.deleted,
            })
        })
    }

    async fn apply_node_delta(&self, delta: NodeDelta) -> Result<u64> {
        self.with_state(|s| {
            let row = s.cursors.get(&delta.directory_id).copied().unwrap_or_default();
            if row.revision != delta.expected_revision {
                return Err(LintelError::Conflict(format!(
                    "node {} at revision {}, delta computed against {}",
                    delta.directory_id, row.revision, delta.expected_revision
                )));
            }

            let links = s.links.entry(delta.directory_id).or_default();
            for link in &delta.delete {
                links.remove(link);
            }
            links.extend(delta.insert.iter().cloned());
            if links.is_empty() {
                s.links.remove(&delta.directory_id);
            }

            let sequence = match (row.sequence, delta.cursor) {
                (Some(old), Some(new)) => Some(old.max(new)),
                (old, new) => new.or(old),
            };
            let next = row.revision + 1;
            s.cursors.insert(
                delta.directory_id,
                CursorRow { sequence, revision: next, deleted: delta.deleted },
            );
            Ok(next)
        })
    }

    async fn known_directories(&self) -> Result<Vec<DirectoryId>> {
        self.with_state(|s| {
            let mut known: BTreeSet<DirectoryId> = s.links.keys().copied().collect();
            known.extend(s.assignments.iter().map(|a| a.directory_id));
            known.extend(
                s.cursors
                    .iter()
                    .filter(|(_, row)| !row.deleted)
                    .map(|(node, _)| *node),
            );
            Ok(known.into_iter().collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_assignment_uniqueness() {
        let store = MemoryStore::new();
        let role = store.create_role(NewRole::named("viewer")).await.unwrap();
        let a = RoleAssignment::new(role.id, "u1", "org", DirectoryId::from_u128(1));

        store.assign_role(a.clone()).await.unwrap();
        store.assign_role(a).await.unwrap();

        assert_eq!(store.role_assignments(role.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_add_unknown_permission() {
        let store = MemoryStore::new();
        let role = store.create_role(NewRole::named("viewer")).await.unwrap();
        let err = store.add_role_permission(role.id, "missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stale_revision_conflicts() {
        let store = MemoryStore::new();
        let node = DirectoryId::from_u128(4);
        let delta = NodeDelta {
            directory_id: node,
            expected_revision: 0,
            cursor: Some(2),
            insert: vec![],
            delete: vec![],
            deleted: false,
        };
        store.apply_node_delta(delta.clone()).await.unwrap();

        let err = store.apply_node_delta(delta).await.unwrap_err();
        assert!(matches!(err, LintelError::Conflict(_)));
        assert_eq!(store.node_state(node).await.unwrap().cursor, Some(2));
    }
}
