// src/store/schema.rs

//! State store schema and migrations.
//!
//! The store is transactional by construction: every mutation happens
//! inside a SQLite transaction, so a crash mid-write can never leave a
//! half-updated record.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database.
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version >= SCHEMA_VERSION {
        debug!("schema is up to date at version {}", current_version);
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("applying state store migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => unreachable!("unknown migration version: {}", version),
    }
}

/// Initial schema - Version 1
///
/// - components: one row per installed component
/// - operations: the ordered operation list that created each component,
///   kept so a later session can compute the inverse plan without the
///   original repository
/// - sessions: audit trail of every session that reached execution
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("creating state store schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE components (
            identity TEXT PRIMARY KEY,
            version TEXT NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            dependencies TEXT NOT NULL DEFAULT '[]',
            session_uuid TEXT,
            installed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            component_identity TEXT NOT NULL,
            seq INTEGER NOT NULL,
            op_json TEXT NOT NULL,
            UNIQUE(component_identity, seq),
            FOREIGN KEY (component_identity)
                REFERENCES components(identity) ON DELETE CASCADE
        );

        CREATE INDEX idx_operations_component ON operations(component_identity);

        CREATE TABLE sessions (
            uuid TEXT PRIMARY KEY,
            action TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('running', 'committed', 'rolled_back')),
            started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            finished_at TEXT
        );

        CREATE INDEX idx_sessions_status ON sessions(status);
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn test_schema_version_tracking() {
        let conn = create_test_db();

        assert_eq!(get_schema_version(&conn).unwrap(), 0);

        set_schema_version(&conn, 1).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_migrate_creates_all_tables() {
        let conn = create_test_db();
        migrate(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"components".to_string()));
        assert!(tables.contains(&"operations".to_string()));
        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = create_test_db();

        migrate(&conn).unwrap();
        let v1 = get_schema_version(&conn).unwrap();
        migrate(&conn).unwrap();
        let v2 = get_schema_version(&conn).unwrap();

        assert_eq!(v1, v2);
        assert_eq!(v1, SCHEMA_VERSION);
    }

    #[test]
    fn test_operations_cascade_on_component_delete() {
        let conn = create_test_db();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        migrate(&conn).unwrap();

        conn.execute(
            "INSERT INTO components (identity, version) VALUES ('componentA', '1.0.0')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO operations (component_identity, seq, op_json)
             VALUES ('componentA', 0, '{}')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM components WHERE identity = 'componentA'", [])
            .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM operations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
