//! Permission Store
//!
//! Owns roles, permissions, explicit assignments, directory permission links
//! and per-node reconciliation state.
//!
//! ## Variants
//!
//! - [`SqliteStore`] - rusqlite database, used by the service
//! - [`MemoryStore`] - in-process maps, used by tests
//!
//! ## Transaction discipline
//!
//! Every write the reconciler makes to one node goes through
//! [`PermissionStore::apply_node_delta`]: link deletes, link inserts and the
//! cursor update commit together or not at all. The delta names the node
//! revision it was computed against; if another writer committed first the
//! call fails with `Conflict` and the caller rereads.

pub mod memory;
pub mod schema;
pub mod sqlite;

use async_trait::async_trait;

use crate::types::{
    AssignmentQuery, DirectoryId, EffectivePermission, EffectiveQuery, NewRole, NodeDelta,
    NodeState, Permission, Result, Role, RoleAssignment, RoleId, RoleUpdate,
};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

#[async_trait]
pub trait PermissionStore: Send + Sync {
    // ---------------------------------------------------------------------
    // CRUD boundary
    // ---------------------------------------------------------------------

    async fn list_roles(&self) -> Result<Vec<Role>>;

    async fn create_role(&self, role: NewRole) -> Result<Role>;

    /// Role with its permission set
    async fn get_role(&self, id: RoleId) -> Result<Role>;

    async fn update_role(&self, id: RoleId, update: RoleUpdate) -> Result<Role>;

    /// Deletes the role along with its assignments and permission links
    async fn delete_role(&self, id: RoleId) -> Result<()>;

    /// Upsert by target
    async fn create_permission(&self, permission: Permission) -> Result<Permission>;

    async fn list_permissions(&self, target: Option<&str>) -> Result<Vec<Permission>>;

    /// Idempotent; NotFound if either side is missing
    async fn add_role_permission(&self, role: RoleId, target: &str) -> Result<()>;

    async fn remove_role_permission(&self, role: RoleId, target: &str) -> Result<()>;

    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>>;

    /// Idempotent: assigning an existing (role, subject, scope) at the same
    /// directory is a no-op
    async fn assign_role(&self, assignment: RoleAssignment) -> Result<()>;

    async fn remove_role_assignment(&self, assignment: &RoleAssignment) -> Result<()>;

    async fn role_assignments(&self, role: RoleId) -> Result<Vec<RoleAssignment>>;

    async fn list_assignments(&self, query: &AssignmentQuery) -> Result<Vec<RoleAssignment>>;

    /// Explicit and inherited grants of one directory, expanded to permission targets
    async fn effective_permissions(
        &self,
        query: &EffectiveQuery,
    ) -> Result<Vec<EffectivePermission>>;

    // ---------------------------------------------------------------------
    // Reconciler side
    // ---------------------------------------------------------------------

    /// Explicit assignments anchored at any of `directories`
    async fn explicit_assignments(&self, directories: &[DirectoryId])
        -> Result<Vec<RoleAssignment>>;

    /// Cursor, revision and links of one node (defaults if never written)
    async fn node_state(&self, directory: DirectoryId) -> Result<NodeState>;

    /// Apply one node's delta atomically; returns the new revision
    async fn apply_node_delta(&self, delta: NodeDelta) -> Result<u64>;

    /// Nodes with links, explicit assignments or a cursor row
    async fn known_directories(&self) -> Result<Vec<DirectoryId>>;
}
