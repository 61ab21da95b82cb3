//! SQLite-backed permission store
//!
//! A single connection behind a mutex, driven from `spawn_blocking` so that
//! rusqlite calls never stall the async runtime.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use super::schema;
use super::PermissionStore;
use crate::types::{
    AssignmentQuery, DirectoryId, DirectoryPermissionLink, EffectivePermission, EffectiveQuery,
    LintelError, NewRole, NodeDelta, NodeState, Permission, Result, Role, RoleAssignment, RoleId,
    RoleUpdate,
};

/// SQLite permission store
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create the permission database and apply the schema
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening SQLite database at {:?}", path);

        let conn = Connection::open(path)
            .map_err(|e| LintelError::Database(format!("Failed to open SQLite: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )
        .map_err(|e| LintelError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory().map_err(|e| {
            LintelError::Database(format!("Failed to open in-memory SQLite: {}", e))
        })?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| LintelError::Database(format!("Failed to set PRAGMA: {}", e)))?;

        schema::init_schema(&conn)?;

        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| LintelError::Internal(format!("Lock poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await?
    }

    /// Schema version recorded in the database
    pub async fn schema_version(&self) -> Result<i32> {
        self.run(|conn| schema::get_schema_version(conn)).await
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        permissions: Vec::new(),
    })
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission { target: row.get(0)?, description: row.get(1)? })
}

fn assignment_from_row(row: &Row<'_>) -> rusqlite::Result<RoleAssignment> {
    Ok(RoleAssignment {
        role_id: row.get(0)?,
        subject_id: row.get(1)?,
        scope: row.get(2)?,
        directory_id: DirectoryId(row.get(3)?),
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<DirectoryPermissionLink> {
    Ok(DirectoryPermissionLink {
        directory_id: DirectoryId(row.get(0)?),
        role_id: row.get(1)?,
        subject_id: row.get(2)?,
        scope: row.get(3)?,
        source_directory_id: DirectoryId(row.get(4)?),
    })
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut results = Vec::new();
    for row in rows {
        results.push(row?);
    }
    Ok(results)
}

// =============================================================================
// Catalog operations
// =============================================================================

const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";

fn find_role(conn: &Connection, id: RoleId) -> Result<Option<Role>> {
    let sql = format!("SELECT {} FROM roles WHERE id = ?", ROLE_COLUMNS);
    Ok(conn.query_row(&sql, params![id], role_from_row).optional()?)
}

fn require_role(conn: &Connection, id: RoleId) -> Result<Role> {
    find_role(conn, id)?.ok_or_else(|| LintelError::NotFound(format!("role {}", id)))
}

fn list_roles(conn: &Connection) -> Result<Vec<Role>> {
    let sql = format!("SELECT {} FROM roles ORDER BY created_at, id", ROLE_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], role_from_row)?;
    collect(rows)
}

fn create_role(conn: &Connection, input: NewRole) -> Result<Role> {
    let now = Utc::now();
    let role = Role {
        id: Uuid::new_v4(),
        name: input.name,
        description: input.description,
        created_at: now,
        updated_at: now,
        permissions: Vec::new(),
    };

    conn.execute(
        "INSERT INTO roles (id, name, description, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        params![role.id, role.name, role.description, role.created_at, role.updated_at],
    )?;

    Ok(role)
}

fn get_role(conn: &Connection, id: RoleId) -> Result<Role> {
    let mut role = require_role(conn, id)?;
    role.permissions = role_permissions(conn, id)?;
    Ok(role)
}

fn update_role(conn: &Connection, id: RoleId, update: RoleUpdate) -> Result<Role> {
    let mut role = require_role(conn, id)?;
    if let Some(name) = update.name {
        role.name = name;
    }
    if let Some(description) = update.description {
        role.description = Some(description);
    }
    role.updated_at = Utc::now();

    conn.execute(
        "UPDATE roles SET name = ?, description = ?, updated_at = ? WHERE id = ?",
        params![role.name, role.description, role.updated_at, id],
    )?;

    Ok(role)
}

fn delete_role(conn: &Connection, id: RoleId) -> Result<()> {
    let rows = conn.execute("DELETE FROM roles WHERE id = ?", params![id])?;
    if rows == 0 {
        return Err(LintelError::NotFound(format!("role {}", id)));
    }
    Ok(())
}

fn create_permission(conn: &Connection, permission: Permission) -> Result<Permission> {
    conn.execute(
        "INSERT INTO permissions (target, description) VALUES (?, ?)
         ON CONFLICT(target) DO UPDATE SET description = excluded.description",
        params![permission.target, permission.description],
    )?;
    Ok(permission)
}

fn list_permissions(conn: &Connection, target: Option<String>) -> Result<Vec<Permission>> {
    let mut stmt = conn.prepare(
        "SELECT target, description FROM permissions
         WHERE (?1 IS NULL OR target = ?1) ORDER BY target",
    )?;
    let rows = stmt.query_map(params![target], permission_from_row)?;
    collect(rows)
}

fn add_role_permission(conn: &Connection, role: RoleId, target: &str) -> Result<()> {
    require_role(conn, role)?;

    let exists: Option<String> = conn
        .query_row("SELECT target FROM permissions WHERE target = ?", params![target], |row| {
            row.get(0)
        })
        .optional()?;
    if exists.is_none() {
        return Err(LintelError::NotFound(format!("permission {}", target)));
    }

    conn.execute(
        "INSERT OR IGNORE INTO role_permissions (role_id, target) VALUES (?, ?)",
        params![role, target],
    )?;
    Ok(())
}

fn remove_role_permission(conn: &Connection, role: RoleId, target: &str) -> Result<()> {
    require_role(conn, role)?;

    let rows = conn.execute(
        "DELETE FROM role_permissions WHERE role_id = ? AND target = ?",
        params![role, target],
    )?;
    if rows == 0 {
        return Err(LintelError::NotFound(format!("permission {} on role {}", target, role)));
    }
    Ok(())
}

fn role_permissions(conn: &Connection, role: RoleId) -> Result<Vec<Permission>> {
    let mut stmt = conn.prepare(
        "SELECT p.target, p.description FROM role_permissions rp
         JOIN permissions p ON p.target = rp.target
         WHERE rp.role_id = ? ORDER BY p.target",
    )?;
    let rows = stmt.query_map(params![role], permission_from_row)?;
    collect(rows)
}

fn assign_role(conn: &Connection, a: &RoleAssignment) -> Result<()> {
    require_role(conn, a.role_id)?;

    let inserted = conn.execute(
        "INSERT OR IGNORE INTO role_assignments (role_id, subject_id, scope, directory_id)
         VALUES (?, ?, ?, ?)",
        params![a.role_id, a.subject_id, a.scope, a.directory_id.0],
    )?;
    if inserted == 0 {
        debug!(role = %a.role_id, subject = %a.subject_id, scope = %a.scope, "Assignment already present");
    }
    Ok(())
}

fn remove_role_assignment(conn: &Connection, a: &RoleAssignment) -> Result<()> {
    let rows = conn.execute(
        "DELETE FROM role_assignments
         WHERE role_id = ? AND subject_id = ? AND scope = ? AND directory_id = ?",
        params![a.role_id, a.subject_id, a.scope, a.directory_id.0],
    )?;
    if rows == 0 {
        return Err(LintelError::NotFound(format!(
            "assignment of role {} to {} in {}",
            a.role_id, a.subject_id, a.scope
        )));
    }
    Ok(())
}

fn list_assignments(conn: &Connection, query: &AssignmentQuery) -> Result<Vec<RoleAssignment>> {
    let mut sql = String::from(
        "SELECT role_id, subject_id, scope, directory_id FROM role_assignments WHERE 1=1",
    );
    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(subject) = &query.subject {
        sql.push_str(" AND subject_id = ?");
        params_vec.push(Box::new(subject.clone()));
    }
    if let Some(scope) = &query.scope {
        sql.push_str(" AND scope = ?");
        params_vec.push(Box::new(scope.clone()));
    }
    if let Some(role) = query.role {
        sql.push_str(" AND role_id = ?");
        params_vec.push(Box::new(role));
    }
    if let Some(directory) = query.directory {
        sql.push_str(" AND directory_id = ?");
        params_vec.push(Box::new(directory.0));
    }
    sql.push_str(" ORDER BY created_at, subject_id");

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_refs.as_slice(), assignment_from_row)?;
    collect(rows)
}

fn effective_permissions(
    conn: &Connection,
    query: &EffectiveQuery,
) -> Result<Vec<EffectivePermission>> {
    let directory = query.directory;
    let mut stmt = conn.prepare(
        "SELECT ra.subject_id, ra.scope, ra.role_id, rp.target, ra.directory_id
         FROM role_assignments ra JOIN role_permissions rp ON rp.role_id = ra.role_id
         WHERE ra.directory_id = ?1
         UNION
         SELECT l.subject_id, l.scope, l.role_id, rp.target, l.source_directory_id
         FROM directory_permission_links l JOIN role_permissions rp ON rp.role_id = l.role_id
         WHERE l.directory_id = ?1
         ORDER BY 1, 2, 4",
    )?;
    let rows = stmt.query_map(params![directory.0], |row| {
        Ok(EffectivePermission {
            directory_id: directory,
            subject_id: row.get(0)?,
            scope: row.get(1)?,
            role_id: row.get(2)?,
            target: row.get(3)?,
            source_directory_id: DirectoryId(row.get(4)?),
        })
    })?;

    Ok(collect(rows)?.into_iter().filter(|p| query.matches(p)).collect())
}

// =============================================================================
// Reconciliation operations
// =============================================================================

fn explicit_assignments(
    conn: &Connection,
    directories: &[DirectoryId],
) -> Result<Vec<RoleAssignment>> {
    if directories.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; directories.len()].join(", ");
    let sql = format!(
        "SELECT role_id, subject_id, scope, directory_id FROM role_assignments
         WHERE directory_id IN ({})",
        placeholders
    );
    let ids: Vec<Uuid> = directories.iter().map(|d| d.0).collect();

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), assignment_from_row)?;
    collect(rows)
}

fn node_state(conn: &Connection, directory: DirectoryId) -> Result<NodeState> {
    let cursor_row: Option<(Option<i64>, i64, bool)> = conn
        .query_row(
            "SELECT sequence, revision, deleted FROM reconciliation_cursors WHERE directory_id = ?",
            params![directory.0],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let mut stmt = conn.prepare(
        "SELECT directory_id, role_id, subject_id, scope, source_directory_id
         FROM directory_permission_links WHERE directory_id = ?",
    )?;
    let links = collect(stmt.query_map(params![directory.0], link_from_row)?)?;

    let (cursor, revision, deleted) = cursor_row.unwrap_or((None, 0, false));
    Ok(NodeState {
        cursor: cursor.map(|c| c as u64),
        revision: revision as u64,
        links: links.into_iter().collect(),
        deleted,
    })
}

fn apply_node_delta(conn: &mut Connection, delta: &NodeDelta) -> Result<u64> {
    let directory = delta.directory_id.0;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let revision: i64 = tx
        .query_row(
            "SELECT revision FROM reconciliation_cursors WHERE directory_id = ?",
            params![directory],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    if revision as u64 != delta.expected_revision {
        return Err(LintelError::Conflict(format!(
            "node {} at revision {}, delta computed against {}",
            delta.directory_id, revision, delta.expected_revision
        )));
    }

    for link in &delta.delete {
        tx.execute(
            "DELETE FROM directory_permission_links
             WHERE directory_id = ? AND role_id = ? AND subject_id = ? AND scope = ?
               AND source_directory_id = ?",
            params![
                link.directory_id.0,
                link.role_id,
                link.subject_id,
                link.scope,
                link.source_directory_id.0
            ],
        )?;
    }

    for link in &delta.insert {
        tx.execute(
            "INSERT OR IGNORE INTO directory_permission_links
             (directory_id, role_id, subject_id, scope, source_directory_id)
             VALUES (?, ?, ?, ?, ?)",
            params![
                link.directory_id.0,
                link.role_id,
                link.subject_id,
                link.scope,
                link.source_directory_id.0
            ],
        )?;
    }

    let next = revision + 1;
    let now: DateTime<Utc> = Utc::now();
    tx.execute(
        "INSERT INTO reconciliation_cursors (directory_id, sequence, revision, deleted, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(directory_id) DO UPDATE SET
           sequence = CASE
             WHEN excluded.sequence IS NULL THEN reconciliation_cursors.sequence
             WHEN reconciliation_cursors.sequence IS NULL THEN excluded.sequence
             ELSE MAX(excluded.sequence, reconciliation_cursors.sequence)
           END,
           revision = excluded.revision,
           deleted = excluded.deleted,
           updated_at = excluded.updated_at",
        params![directory, delta.cursor.map(|c| c as i64), next, delta.deleted, now],
    )?;

    tx.commit()?;
    Ok(next as u64)
}

/// Tombstoned cursor rows are left out; their links are already empty
fn known_directories(conn: &Connection) -> Result<Vec<DirectoryId>> {
    let mut stmt = conn.prepare(
        "SELECT directory_id FROM directory_permission_links
         UNION SELECT directory_id FROM role_assignments
         UNION SELECT directory_id FROM reconciliation_cursors WHERE deleted = 0",
    )?;
    let rows = stmt.query_map([], |row| Ok(DirectoryId(row.get(0)?)))?;
    collect(rows)
}

// =============================================================================
// Trait implementation
// =============================================================================

#[async_trait]
impl PermissionStore for SqliteStore {
    async fn list_roles(&self) -> Result<Vec<Role>> {
        self.run(|conn| list_roles(conn)).await
    }

    async fn create_role(&self, role: NewRole) -> Result<Role> {
        self.run(move |conn| create_role(conn, role)).await
    }

    async fn get_role(&self, id: RoleId) -> Result<Role> {
        self.run(move |conn| get_role(conn, id)).await
    }

    async fn update_role(&self, id: RoleId, update: RoleUpdate) -> Result<Role> {
        self.run(move |conn| update_role(conn, id, update)).await
    }

    async fn delete_role(&self, id: RoleId) -> Result<()> {
        self.run(move |conn| delete_role(conn, id)).await
    }

    async fn create_permission(&self, permission: Permission) -> Result<Permission> {
        self.run(move |conn| create_permission(conn, permission)).await
    }

    async fn list_permissions(&self, target: Option<&str>) -> Result<Vec<Permission>> {
        let target = target.map(str::to_string);
        self.run(move |conn| list_permissions(conn, target)).await
    }

    async fn add_role_permission(&self, role: RoleId, target: &str) -> Result<()> {
        let target = target.to_string();
        self.run(move |conn| add_role_permission(conn, role, &target)).await
    }

    async fn remove_role_permission(&self, role: RoleId, target: &str) -> Result<()> {
        let target = target.to_string();
        self.run(move |conn| remove_role_permission(conn, role, &target)).await
    }

    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>> {
        self.run(move |conn| {
            require_role(conn, role)?;
            role_permissions(conn, role)
        })
        .await
    }

    async fn assign_role(&self, assignment: RoleAssignment) -> Result<()> {
        self.run(move |conn| assign_role(conn, &assignment)).await
    }

    async fn remove_role_assignment(&self, assignment: &RoleAssignment) -> Result<()> {
        let assignment = assignment.clone();
        self.run(move |conn| remove_role_assignment(conn, &assignment)).await
    }

    async fn role_assignments(&self, role: RoleId) -> Result<Vec<RoleAssignment>> {
        self.run(move |conn| {
            require_role(conn, role)?;
            list_assignments(conn, &AssignmentQuery::default().role(role))
        })
        .await
    }

    async fn list_assignments(&self, query: &AssignmentQuery) -> Result<Vec<RoleAssignment>> {
        let query = query.clone();
        self.run(move |conn| list_assignments(conn, &query)).await
    }

    async fn effective_permissions(
        &self,
        query: &EffectiveQuery,
    ) -> Result<Vec<EffectivePermission>> {
        let query = query.clone();
        self.run(move |conn| effective_permissions(conn, &query)).await
    }

    async fn explicit_assignments(
        &self,
        directories: &[DirectoryId],
    ) -> Result<Vec<RoleAssignment>> {
        let directories = directories.to_vec();
        self.run(move |conn| explicit_assignments(conn, &directories)).await
    }

    async fn node_state(&self, directory: DirectoryId) -> Result<NodeState> {
        self.run(move |conn| node_state(conn, directory)).await
    }

    async fn apply_node_delta(&self, delta: NodeDelta) -> Result<u64> {
        self.run(move |conn| apply_node_delta(conn, &delta)).await
    }

    async fn known_directories(&self) -> Result<Vec<DirectoryId>> {
        self.run(|conn| known_directories(conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dir(n: u128) -> DirectoryId {
        DirectoryId::from_u128(n)
    }

    async fn admin_role(store: &SqliteStore) -> Role {
        let role = store.create_role(NewRole::named("admin")).await.unwrap();
        for target in ["read", "write"] {
            store.create_permission(Permission::new(target)).await.unwrap();
            store.add_role_permission(role.id, target).await.unwrap();
        }
        role
    }

    #[tokio::test]
    async fn test_role_roundtrip_with_permissions() {
        let store = SqliteStore::open_in_memory().unwrap();
        let role = admin_role(&store).await;

        let fetched = store.get_role(role.id).await.unwrap();
        assert_eq!(fetched.name, "admin");
        let targets: Vec<_> = fetched.permissions.iter().map(|p| p.target.as_str()).collect();
        assert_eq!(targets, vec!["read", "write"]);
    }

    #[tokio::test]
    async fn test_duplicate_assignment_is_noop() {
        let store = SqliteStore::open_in_memory().unwrap();
        let role = admin_role(&store).await;
        let a = RoleAssignment::new(role.id, "u1", "org", dir(1));

        store.assign_role(a.clone()).await.unwrap();
        store.assign_role(a.clone()).await.unwrap();

        let rows = store.list_assignments(&AssignmentQuery::default()).await.unwrap();
        assert_eq!(rows, vec![a]);
    }

    #[tokio::test]
    async fn test_assign_unknown_role_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = RoleAssignment::new(Uuid::new_v4(), "u1", "org", dir(1));
        assert!(store.assign_role(a).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_role_cascades_assignments() {
        let store = SqliteStore::open_in_memory().unwrap();
        let role = admin_role(&store).await;
        store.assign_role(RoleAssignment::new(role.id, "u1", "org", dir(1))).await.unwrap();

        store.delete_role(role.id).await.unwrap();

        assert!(store.list_assignments(&AssignmentQuery::default()).await.unwrap().is_empty());
        assert!(store.delete_role(role.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_apply_delta_checks_revision() {
        let store = SqliteStore::open_in_memory().unwrap();
        let link = DirectoryPermissionLink {
            directory_id: dir(2),
            role_id: Uuid::from_u128(9),
            subject_id: "u1".into(),
            scope: "org".into(),
            source_directory_id: dir(1),
        };
        let delta = NodeDelta {
            directory_id: dir(2),
            expected_revision: 0,
            cursor: Some(1),
            insert: vec![link.clone()],
            delete: vec![],
            deleted: false,
        };

        assert_eq!(store.apply_node_delta(delta.clone()).await.unwrap(), 1);

        // Same delta again was computed against a stale revision
        let err = store.apply_node_delta(delta).await.unwrap_err();
        assert!(matches!(err, LintelError::Conflict(_)));

        let state = store.node_state(dir(2)).await.unwrap();
        assert_eq!(state.cursor, Some(1));
        assert_eq!(state.revision, 1);
        assert!(state.links.contains(&link));
    }

    #[tokio::test]
    async fn test_refresh_delta_keeps_cursor() {
        let store = SqliteStore::open_in_memory().unwrap();
        let first = NodeDelta {
            directory_id: dir(3),
            expected_revision: 0,
            cursor: Some(5),
            insert: vec![],
            delete: vec![],
            deleted: false,
        };
        store.apply_node_delta(first).await.unwrap();

        let refresh = NodeDelta {
            directory_id: dir(3),
            expected_revision: 1,
            cursor: None,
            insert: vec![],
            delete: vec![],
            deleted: false,
        };
        store.apply_node_delta(refresh).await.unwrap();

        let state = store.node_state(dir(3)).await.unwrap();
        assert_eq!(state.cursor, Some(5));
        assert_eq!(state.revision, 2);
    }

    #[tokio::test]
    async fn test_effective_permissions_explicit_and_inherited() {
        let store = SqliteStore::open_in_memory().unwrap();
        let role = admin_role(&store).await;
        let a = RoleAssignment::new(role.id, "u1", "org", dir(1));
        store.assign_role(a.clone()).await.unwrap();
        store
            .apply_node_delta(NodeDelta {
                directory_id: dir(2),
                expected_revision: 0,
                cursor: Some(1),
                insert: vec![DirectoryPermissionLink::inherited(dir(2), &a)],
                delete: vec![],
                deleted: false,
            })
            .await
            .unwrap();

        let at_root = store.effective_permissions(&EffectiveQuery::for_directory(dir(1))).await.unwrap();
        let at_child = store.effective_permissions(&EffectiveQuery::for_directory(dir(2))).await.unwrap();

        assert_eq!(at_root.len(), 2);
        assert_eq!(at_child.len(), 2);
        assert!(at_child.iter().all(|p| p.source_directory_id == dir(1) && p.subject_id == "u1"));

        let known = store.known_directories().await.unwrap();
        assert!(known.contains(&dir(1)) && known.contains(&dir(2)));
    }

    #[tokio::test]
    async fn test_tombstoned_node_not_known() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (node, deleted) in [(dir(5), false), (dir(6), true)] {
            store
                .apply_node_delta(NodeDelta {
                    directory_id: node,
                    expected_revision: 0,
                    cursor: Some(2),
                    insert: vec![],
                    delete: vec![],
                    deleted,
                })
                .await
                .unwrap();
        }

        let known = store.known_directories().await.unwrap();
        assert_eq!(known, vec![dir(5)]);

        // The cursor survives, so stale replays are still rejected
        let state = store.node_state(dir(6)).await.unwrap();
        assert!(state.deleted);
        assert!(state.has_applied(2));
    }
}
