//! SQLite schema and migrations
//!
//! `schema_version` holds one row. A fresh database gets the current tables
//! directly; an older one is stepped forward one version at a time.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::types::{LintelError, Result};

pub const SCHEMA_VERSION: i32 = 2;

/// Create or upgrade the schema in place
pub fn init_schema(conn: &Connection) -> Result<()> {
    match get_schema_version(conn)? {
        0 => {
            info!(version = SCHEMA_VERSION, "Creating database schema");
            conn.execute_batch(CATALOG_SCHEMA)?;
            conn.execute_batch(RECONCILIATION_SCHEMA)?;
            conn.execute_batch(INDEXES_SCHEMA)?;
        }
        found if found < SCHEMA_VERSION => {
            info!(from = found, to = SCHEMA_VERSION, "Migrating database schema");
            for version in found..SCHEMA_VERSION {
                upgrade_from(conn, version)?;
            }
        }
        found if found > SCHEMA_VERSION => {
            return Err(LintelError::Config(format!(
                "database schema v{} is newer than this binary (v{})",
                found, SCHEMA_VERSION
            )));
        }
        found => {
            debug!(version = found, "Database schema current");
            return Ok(());
        }
    }

    set_schema_version(conn, SCHEMA_VERSION)
}

/// Stored schema version, 0 for a database that was never initialized
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;
    let version = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;
    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// One step: `version` to `version + 1`
fn upgrade_from(conn: &Connection, version: i32) -> Result<()> {
    match version {
        // Tombstone for nodes whose last event was a deletion
        1 => conn.execute_batch(
            "ALTER TABLE reconciliation_cursors ADD COLUMN deleted INTEGER NOT NULL DEFAULT 0;",
        )?,
        other => {
            return Err(LintelError::Config(format!(
                "no migration from schema v{}",
                other
            )))
        }
    }
    Ok(())
}

/// Roles, permissions and explicit assignments (written by the CRUD boundary)
const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS roles (
    id BLOB PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS permissions (
    target TEXT PRIMARY KEY NOT NULL,
    description TEXT
);

CREATE TABLE IF NOT EXISTS role_permissions (
    role_id BLOB NOT NULL,
    target TEXT NOT NULL,
    PRIMARY KEY (role_id, target),
    FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE CASCADE,
    FOREIGN KEY (target) REFERENCES permissions(target) ON DELETE CASCADE
);

-- At most one row per (role, subject, scope) at a given directory
CREATE TABLE IF NOT EXISTS role_assignments (
    role_id BLOB NOT NULL,
    subject_id TEXT NOT NULL,
    scope TEXT NOT NULL,
    directory_id BLOB NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (role_id, subject_id, scope, directory_id),
    FOREIGN KEY (role_id) REFERENCES roles(id) ON DELETE CASCADE
);
"#;

/// Inherited links and per-node cursors (written only by the reconciler)
const RECONCILIATION_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS directory_permission_links (
    directory_id BLOB NOT NULL,
    role_id BLOB NOT NULL,
    subject_id TEXT NOT NULL,
    scope TEXT NOT NULL,
    source_directory_id BLOB NOT NULL,
    PRIMARY KEY (directory_id, role_id, subject_id, scope, source_directory_id)
);

CREATE TABLE IF NOT EXISTS reconciliation_cursors (
    directory_id BLOB PRIMARY KEY NOT NULL,
    sequence INTEGER,
    revision INTEGER NOT NULL DEFAULT 0,
    deleted INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_role_assignments_directory ON role_assignments(directory_id);
CREATE INDEX IF NOT EXISTS idx_role_assignments_subject ON role_assignments(subject_id, scope);
CREATE INDEX IF NOT EXISTS idx_links_source ON directory_permission_links(source_directory_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        let err = init_schema(&conn).unwrap_err();
        assert!(matches!(err, LintelError::Config(_)));
    }

    #[test]
    fn test_v1_database_gains_tombstone_column() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE reconciliation_cursors (
                 directory_id BLOB PRIMARY KEY NOT NULL,
                 sequence INTEGER,
                 revision INTEGER NOT NULL DEFAULT 0,
                 updated_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             INSERT INTO reconciliation_cursors (directory_id, sequence) VALUES (x'01', 4);",
        )
        .unwrap();
        get_schema_version(&conn).unwrap();
        set_schema_version(&conn, 1).unwrap();

        init_schema(&conn).unwrap();

        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        let deleted: i64 = conn
            .query_row("SELECT deleted FROM reconciliation_cursors", [], |row| row.get(0))
            .unwrap();
        assert_eq!(deleted, 0);
    }

    #[test]
    fn test_unreadable_version_is_an_error() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE schema_version (version TEXT NOT NULL);
                            INSERT INTO schema_version VALUES ('two');")
            .unwrap();

        assert!(get_schema_version(&conn).is_err());
    }
}
