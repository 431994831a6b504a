// src/store/records.rs

//! Row models for the state store.
//!
//! `ComponentRecord` is the persisted form of one installed component. It
//! carries the ordered operation list that created it, so uninstall and
//! update planning work without the original repository.

use crate::error::Result;
use crate::operation::Operation;
use crate::version::DependencySpec;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// Persisted record of one installed component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub size: u64,
    /// Raw dependency declarations ("componentB >= 1.0"), re-parseable via
    /// `DependencySpec::parse`.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Forward operations that created this component, excluding its own
    /// registration (the registration is re-synthesized on uninstall).
    #[serde(default)]
    pub operations: Vec<Operation>,
}

impl ComponentRecord {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            size: 0,
            dependencies: Vec::new(),
            operations: Vec::new(),
        }
    }

    /// Parsed dependency specs. Stored declarations were validated at
    /// resolution time; anything unparseable is skipped.
    pub fn dependency_specs(&self) -> Vec<DependencySpec> {
        self.dependencies
            .iter()
            .filter_map(|d| DependencySpec::parse(d).ok())
            .collect()
    }

    /// Insert or replace this record and its operation rows. Runs inside
    /// the supplied connection's ambient transaction.
    pub fn upsert(&self, conn: &Connection, session_uuid: Option<&str>) -> Result<()> {
        conn.execute(
            "INSERT INTO components (identity, version, size, dependencies, session_uuid)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(identity) DO UPDATE SET
                 version = excluded.version,
                 size = excluded.size,
                 dependencies = excluded.dependencies,
                 session_uuid = excluded.session_uuid,
                 installed_at = CURRENT_TIMESTAMP",
            params![
                &self.name,
                &self.version,
                self.size as i64,
                serde_json::to_string(&self.dependencies)
                    .map_err(|e| crate::Error::Parse(e.to_string()))?,
                session_uuid,
            ],
        )?;

        conn.execute(
            "DELETE FROM operations WHERE component_identity = ?1",
            [&self.name],
        )?;
        for (seq, op) in self.operations.iter().enumerate() {
            conn.execute(
                "INSERT INTO operations (component_identity, seq, op_json) VALUES (?1, ?2, ?3)",
                params![
                    &self.name,
                    seq as i64,
                    serde_json::to_string(op).map_err(|e| crate::Error::Parse(e.to_string()))?,
                ],
            )?;
        }

        Ok(())
    }

    /// Find a record by identity, operations included.
    pub fn find(conn: &Connection, name: &str) -> Result<Option<Self>> {
        let row = conn
            .query_row(
                "SELECT identity, version, size, dependencies FROM components WHERE identity = ?1",
                [name],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((name, version, size, deps_json)) = row else {
            return Ok(None);
        };

        let dependencies: Vec<String> = serde_json::from_str(&deps_json)
            .map_err(|e| crate::Error::Parse(format!("dependencies for '{}': {}", name, e)))?;

        let mut stmt = conn.prepare(
            "SELECT op_json FROM operations WHERE component_identity = ?1 ORDER BY seq",
        )?;
        let operations = stmt
            .query_map([&name], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|json| {
                serde_json::from_str(&json)
                    .map_err(|e| crate::Error::Parse(format!("operation for '{}': {}", name, e)))
            })
            .collect::<Result<Vec<Operation>>>()?;

        Ok(Some(Self {
            name,
            version,
            size: size as u64,
            dependencies,
            operations,
        }))
    }

    /// List all installed records, ordered by identity.
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare("SELECT identity FROM components ORDER BY identity")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(names.len());
        for name in names {
            if let Some(record) = Self::find(conn, &name)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Delete a record (operation rows cascade).
    pub fn delete(conn: &Connection, name: &str) -> Result<()> {
        conn.execute("DELETE FROM components WHERE identity = ?1", [name])?;
        Ok(())
    }
}

/// Session status values persisted to the audit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Committed,
    RolledBack,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Committed => "committed",
            SessionStatus::RolledBack => "rolled_back",
        }
    }
}

/// One row in the session audit table.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub uuid: String,
    pub action: String,
    pub description: String,
    pub status: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl SessionRow {
    /// Record a session entering execution.
    pub fn insert(
        conn: &Connection,
        uuid: &str,
        action: &str,
        description: &str,
    ) -> Result<()> {
        conn.execute(
            "INSERT INTO sessions (uuid, action, description, status) VALUES (?1, ?2, ?3, 'running')",
            params![uuid, action, description],
        )?;
        Ok(())
    }

    /// Record a session's terminal status.
    pub fn finish(conn: &Connection, uuid: &str, status: SessionStatus) -> Result<()> {
        conn.execute(
            "UPDATE sessions SET status = ?2, finished_at = CURRENT_TIMESTAMP WHERE uuid = ?1",
            params![uuid, status.as_str()],
        )?;
        Ok(())
    }

    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT uuid, action, description, status, started_at, finished_at
             FROM sessions ORDER BY started_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SessionRow {
                    uuid: row.get(0)?,
                    action: row.get(1)?,
                    description: row.get(2)?,
                    status: row.get(3)?,
                    started_at: row.get(4)?,
                    finished_at: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
