// src/store/mod.rs

//! On-disk state store.
//!
//! SQLite database holding the installed-component records, their operation
//! lists, and the session audit trail. Mutated only by the session executor
//! while it holds the session lock.

pub mod records;
pub mod schema;

pub use records::{ComponentRecord, SessionRow, SessionStatus};

use crate::error::Result;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Handle to the state store database.
pub struct StateStore {
    conn: Connection,
}

impl StateStore {
    /// Open (creating if needed) the store at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a SQLite transaction, committing on Ok.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T>,
    ) -> Result<T> {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Load the full installed state.
    pub fn load_state(&self) -> Result<InstalledState> {
        let records = ComponentRecord::list_all(&self.conn)?;
        Ok(InstalledState::from_records(records))
    }

    /// Insert or replace a component record atomically.
    pub fn replace_record(&mut self, record: &ComponentRecord, session_uuid: &str) -> Result<()> {
        self.transaction(|tx| record.upsert(tx, Some(session_uuid)))
    }

    /// Remove a component record atomically.
    pub fn delete_record(&mut self, name: &str) -> Result<()> {
        self.transaction(|tx| ComponentRecord::delete(tx, name))
    }

    pub fn find_record(&self, name: &str) -> Result<Option<ComponentRecord>> {
        ComponentRecord::find(&self.conn, name)
    }

    /// Record a session entering execution.
    pub fn session_started(&mut self, uuid: &str, action: &str, description: &str) -> Result<()> {
        self.transaction(|tx| SessionRow::insert(tx, uuid, action, description))
    }

    /// Record a session's terminal status.
    pub fn session_finished(&mut self, uuid: &str, status: SessionStatus) -> Result<()> {
        self.transaction(|tx| SessionRow::finish(tx, uuid, status))
    }

    pub fn sessions(&self) -> Result<Vec<SessionRow>> {
        SessionRow::list_all(&self.conn)
    }
}

/// Immutable snapshot of installed components, keyed by identity.
///
/// `PartialEq` makes the rollback round-trip property directly testable:
/// after a failed session, the reloaded state must equal the pre-session
/// snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstalledState {
    records: BTreeMap<String, ComponentRecord>,
}

impl InstalledState {
    pub fn from_records(records: Vec<ComponentRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ComponentRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ComponentRecord> {
        self.records.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested/state.db");
        let store = StateStore::open(&db_path).unwrap();
        drop(store);
        assert!(db_path.exists());
    }

    #[test]
    fn test_replace_and_load_state() {
        let mut store = StateStore::open_in_memory().unwrap();
        let record = ComponentRecord::new("componentA", "1.0.0");
        store.replace_record(&record, "session-1").unwrap();

        let state = store.load_state().unwrap();
        assert!(state.contains("componentA"));
        assert_eq!(state.get("componentA").unwrap().version, "1.0.0");
    }

    #[test]
    fn test_state_snapshot_equality() {
        let mut store = StateStore::open_in_memory().unwrap();
        store
            .replace_record(&ComponentRecord::new("componentA", "1.0.0"), "s1")
            .unwrap();

        let before = store.load_state().unwrap();

        store
            .replace_record(&ComponentRecord::new("componentB", "1.0.0"), "s2")
            .unwrap();
        assert_ne!(before, store.load_state().unwrap());

        store.delete_record("componentB").unwrap();
        assert_eq!(before, store.load_state().unwrap());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let mut store = StateStore::open_in_memory().unwrap();
        let result: Result<()> = store.transaction(|tx| {
            ComponentRecord::new("componentA", "1.0.0").upsert(tx, None)?;
            Err(crate::Error::Parse("forced failure".to_string()))
        });
        assert!(result.is_err());
        assert!(store.load_state().unwrap().is_empty());
    }
}
