// src/session/journal.rs

//! Append-only session journal for crash recovery.
//!
//! The journal is the durable record of a session's progress and the single
//! source of truth on restart: in-memory session state is never trusted
//! across a crash. Each record is one line with a CRC32 checksum.
//!
//! Format: `{crc32_hex}|{json}\n`
//!
//! Barriers use fsync so the persist-before-proceed invariant holds: an
//! operation's `Applied` record is durable before the next operation's side
//! effect begins.

use crate::error::Result;
use crate::session::planner::PlannedStep;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// A record in the session journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalRecord {
    /// Session started.
    Begin {
        session_uuid: String,
        action: String,
        root: PathBuf,
        description: String,
        timestamp: DateTime<Utc>,
    },

    /// Full ordered step plan.
    Plan { steps: Vec<PlannedStep> },

    /// All payloads staged into the session work area.
    Staged { components: usize, files: usize },

    /// Step `seq` applied successfully.
    Applied { seq: usize },

    /// Step `seq` rolled back successfully.
    Undone { seq: usize },

    /// Step `seq` could not be rolled back.
    UndoFailed { seq: usize, error: String },

    /// All steps applied; records finalized.
    Committed { timestamp: DateTime<Utc> },

    /// Session rolled back.
    RolledBack { reason: String },

    /// Session finished (terminal record).
    Done { success: bool, duration_ms: u64 },
}

/// Append-only session journal with fsync barriers.
pub struct SessionJournal {
    path: PathBuf,
    file: File,
    session_uuid: String,
}

impl SessionJournal {
    /// Create a new journal for a session.
    pub fn create(journal_dir: &Path, session_uuid: &str) -> Result<Self> {
        fs::create_dir_all(journal_dir)?;

        let path = journal_dir.join(format!("session-{}.journal", session_uuid));
        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;

        Ok(Self {
            path,
            file,
            session_uuid: session_uuid.to_string(),
        })
    }

    /// Open an existing journal for recovery.
    pub fn open(path: PathBuf) -> Result<Self> {
        let filename = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| crate::Error::Parse("invalid journal filename".to_string()))?;

        let session_uuid = filename
            .strip_prefix("session-")
            .ok_or_else(|| crate::Error::Parse("invalid journal filename format".to_string()))?
            .to_string();

        let file = OpenOptions::new().append(true).open(&path)?;

        Ok(Self {
            path,
            file,
            session_uuid,
        })
    }

    pub fn session_uuid(&self) -> &str {
        &self.session_uuid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a record without fsync.
    pub fn write(&mut self, record: JournalRecord) -> Result<()> {
        let json = serde_json::to_string(&record)
            .map_err(|e| crate::Error::Parse(format!("serializing journal record: {}", e)))?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{:08x}|{}", crc, json)?;
        Ok(())
    }

    /// Write a record and fsync. Every record that gates forward progress
    /// goes through here.
    pub fn write_barrier(&mut self, record: JournalRecord) -> Result<()> {
        self.write(record)?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Read all valid records, stopping at the first corrupted line.
    pub fn read_all(&self) -> Result<Vec<JournalRecord>> {
        read_records(&self.path)
    }

    /// Archive the journal. Archived journals are kept, never deleted, so
    /// later sessions and operators can inspect them.
    pub fn archive(self) -> Result<PathBuf> {
        let archive_dir = self.path.parent().unwrap_or(Path::new(".")).join("archive");
        fs::create_dir_all(&archive_dir)?;

        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| crate::Error::InvalidPath(self.path.clone()))?;
        let archive_path = archive_dir.join(file_name);
        fs::rename(&self.path, &archive_path)?;

        Ok(archive_path)
    }

    /// Delete the journal. Only used for sessions that never reached
    /// execution (nothing worth keeping).
    pub fn delete(self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Read and CRC-verify the records of a journal file.
pub fn read_records(path: &Path) -> Result<Vec<JournalRecord>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.is_empty() {
            continue;
        }

        let Some((crc_hex, json)) = line.split_once('|') else {
            log::warn!("malformed journal line {}: missing delimiter", line_num + 1);
            continue;
        };

        let expected_crc = u32::from_str_radix(crc_hex, 16).map_err(|_| {
            crate::Error::Parse(format!("invalid CRC32 at line {}: {}", line_num + 1, crc_hex))
        })?;

        let actual_crc = crc32fast::hash(json.as_bytes());
        if expected_crc != actual_crc {
            log::warn!(
                "CRC mismatch at journal line {}: expected {:08x}, got {:08x}",
                line_num + 1,
                expected_crc,
                actual_crc
            );
            // A torn write ends the trustworthy prefix
            break;
        }

        let record: JournalRecord = serde_json::from_str(json).map_err(|e| {
            crate::Error::Parse(format!("journal record at line {}: {}", line_num + 1, e))
        })?;

        records.push(record);
    }

    Ok(records)
}

/// Find session journals without a terminal `Done` record.
pub fn find_incomplete_journals(journal_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut journals = Vec::new();

    if !journal_dir.exists() {
        return Ok(journals);
    }

    for entry in fs::read_dir(journal_dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file()
            && path.extension().is_some_and(|e| e == "journal")
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("session-"))
        {
            let records = read_records(&path)?;
            let has_done = records.iter().any(|r| matches!(r, JournalRecord::Done { .. }));
            if !has_done {
                journals.push(path);
            }
        }
    }

    journals.sort();
    Ok(journals)
}
