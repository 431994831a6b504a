// src/session/recovery.rs

//! Crash recovery for interrupted sessions.
//!
//! On restart the journal is the single source of truth; in-memory session
//! state from the previous process is never trusted. The rules:
//!
//! - Journal has a `Committed` barrier: the session finished its mutations,
//!   only cleanup remained. Roll forward (archive, cleanup).
//! - Journal has a plan but no `Committed`: roll back every step marked
//!   `Applied` and not yet `Undone`, newest first, then archive.
//! - Journal has no plan: nothing was mutated. Delete it.
//!
//! Inverse failures during recovery leave the session work area in place
//! and surface as a `Corrupted` outcome for the operator.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::operation::OpContext;
use crate::repository::Repository;
use crate::session::journal::{find_incomplete_journals, JournalRecord, SessionJournal};
use crate::session::planner::PlannedStep;
use crate::store::{SessionStatus, StateStore};
use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Outcome of recovering one interrupted session.
#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    /// Applied steps were undone; the target matches the pre-session state.
    RolledBack { session_uuid: String, reason: String },
    /// The session had committed; cleanup was completed.
    Completed { session_uuid: String },
    /// Nothing had been mutated; the journal was discarded.
    Clean { session_uuid: String },
    /// The journal was unreadable or an inverse failed. Manual
    /// intervention required; the work area is preserved.
    Corrupted { session_uuid: String, error: String },
}

/// Recover every incomplete session journal. The caller must hold the
/// session lock.
pub fn recover_all(config: &EngineConfig) -> Result<Vec<RecoveryOutcome>> {
    let journals = find_incomplete_journals(&config.journal_dir)?;
    let mut outcomes = Vec::new();

    for path in journals {
        outcomes.push(recover_single(config, path)?);
    }

    Ok(outcomes)
}

fn recover_single(config: &EngineConfig, path: PathBuf) -> Result<RecoveryOutcome> {
    let journal = match SessionJournal::open(path.clone()) {
        Ok(j) => j,
        Err(e) => {
            return Ok(RecoveryOutcome::Corrupted {
                session_uuid: "unknown".to_string(),
                error: format!("failed to open journal {}: {}", path.display(), e),
            });
        }
    };

    let session_uuid = journal.session_uuid().to_string();
    let records = match journal.read_all() {
        Ok(r) => r,
        Err(e) => {
            return Ok(RecoveryOutcome::Corrupted {
                session_uuid,
                error: format!("failed to read journal: {}", e),
            });
        }
    };

    if records.is_empty() {
        journal.delete()?;
        return Ok(RecoveryOutcome::Clean { session_uuid });
    }

    info!("recovering session {}", session_uuid);

    let steps: Option<Vec<PlannedStep>> = records.iter().find_map(|r| match r {
        JournalRecord::Plan { steps } => Some(steps.clone()),
        _ => None,
    });
    let committed = records
        .iter()
        .any(|r| matches!(r, JournalRecord::Committed { .. }));

    let work_dir = config.txn_dir.join(&session_uuid);

    if committed {
        // All mutations landed; only finalization was interrupted
        let mut store = StateStore::open(&config.db_path)?;
        store.session_finished(&session_uuid, SessionStatus::Committed)?;

        let mut journal = journal;
        journal.write_barrier(JournalRecord::Done {
            success: true,
            duration_ms: 0,
        })?;
        journal.archive()?;
        if work_dir.exists() {
            fs::remove_dir_all(&work_dir)?;
        }
        return Ok(RecoveryOutcome::Completed { session_uuid });
    }

    let Some(steps) = steps else {
        // Crashed before a plan was journaled: nothing was mutated
        journal.delete()?;
        if work_dir.exists() {
            fs::remove_dir_all(&work_dir)?;
        }
        return Ok(RecoveryOutcome::Clean { session_uuid });
    };

    // Steps applied and not yet undone. UndoFailed entries stay in: their
    // inverses are idempotent and a retry after reboot may succeed.
    let mut applied: BTreeSet<usize> = BTreeSet::new();
    for record in &records {
        match record {
            JournalRecord::Applied { seq } => {
                applied.insert(*seq);
            }
            JournalRecord::Undone { seq } => {
                applied.remove(seq);
            }
            _ => {}
        }
    }

    let mut journal = journal;
    let mut store = StateStore::open(&config.db_path)?;
    let repo = config
        .repository
        .as_ref()
        .and_then(|dir| Repository::open(dir).ok());
    let backup_dir = work_dir.join("backup");
    let stage_dir = work_dir.join("stage");
    fs::create_dir_all(&backup_dir)?;
    fs::create_dir_all(&stage_dir)?;

    let mut failures = Vec::new();
    {
        let mut ctx = OpContext::new(
            config,
            &backup_dir,
            &stage_dir,
            repo.as_ref(),
            &mut store,
            &session_uuid,
        );

        // The step after the last Applied mark may have half-run before the
        // crash; unwind it first, best-effort, without an Undone mark
        let in_flight = applied.iter().max().map(|m| m + 1).unwrap_or(0);
        if in_flight < steps.len() {
            if let Err(e) = steps[in_flight].rollback(&mut ctx) {
                warn!(
                    "best-effort unwind of in-flight step {} failed: {}",
                    in_flight, e
                );
            }
        }

        for seq in applied.iter().rev() {
            let Some(step) = steps.get(*seq) else {
                warn!("journal references unknown step {}", seq);
                continue;
            };
            match step.rollback(&mut ctx) {
                Ok(()) => {
                    journal.write_barrier(JournalRecord::Undone { seq: *seq })?;
                }
                Err(e) => {
                    journal.write_barrier(JournalRecord::UndoFailed {
                        seq: *seq,
                        error: e.to_string(),
                    })?;
                    failures.push(format!("{}: {}", step.describe(), e));
                }
            }
        }
    }

    store.session_finished(&session_uuid, SessionStatus::RolledBack)?;
    journal.write_barrier(JournalRecord::RolledBack {
        reason: "recovered after crash".to_string(),
    })?;
    journal.write_barrier(JournalRecord::Done {
        success: false,
        duration_ms: 0,
    })?;
    journal.archive()?;

    if failures.is_empty() {
        if work_dir.exists() {
            fs::remove_dir_all(&work_dir)?;
        }
        Ok(RecoveryOutcome::RolledBack {
            session_uuid,
            reason: "crashed during execution".to_string(),
        })
    } else {
        // Preserve backups for manual remediation
        Ok(RecoveryOutcome::Corrupted {
            session_uuid,
            error: failures.join("; "),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::Operation;
    use crate::session::planner::Direction;
    use chrono::Utc;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> EngineConfig {
        let config = EngineConfig::new(dir.path().join("root"));
        fs::create_dir_all(&config.root).unwrap();
        fs::create_dir_all(&config.journal_dir).unwrap();
        fs::create_dir_all(&config.txn_dir).unwrap();
        config
    }

    fn begin_record(uuid: &str, config: &EngineConfig) -> JournalRecord {
        JournalRecord::Begin {
            session_uuid: uuid.to_string(),
            action: "install".to_string(),
            root: config.root.clone(),
            description: "test".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_recover_empty_journal_is_clean() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        SessionJournal::create(&config.journal_dir, "empty-1").unwrap();

        let outcomes = recover_all(&config).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0], RecoveryOutcome::Clean { .. }));
        assert!(find_incomplete_journals(&config.journal_dir)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_recover_without_plan_is_clean() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let mut journal = SessionJournal::create(&config.journal_dir, "noplan-1").unwrap();
        journal.write(begin_record("noplan-1", &config)).unwrap();
        drop(journal);

        let outcomes = recover_all(&config).unwrap();
        assert!(matches!(outcomes[0], RecoveryOutcome::Clean { .. }));
    }

    #[test]
    fn test_recover_rolls_back_applied_steps() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        // Simulate a crash after one applied CopyFile: file exists in the
        // target, journal has Plan + Applied{0} but no Committed
        fs::write(config.root.join("orphan.txt"), "from crashed session").unwrap();

        let steps = vec![PlannedStep {
            component: "componentA".to_string(),
            direction: Direction::Forward,
            operation: Operation::CopyFile {
                component: "componentA".to_string(),
                source: "orphan.txt".to_string(),
                target: "orphan.txt".to_string(),
                sha256: "unused".to_string(),
                size: 0,
            },
        }];

        let mut journal = SessionJournal::create(&config.journal_dir, "crash-1").unwrap();
        journal.write(begin_record("crash-1", &config)).unwrap();
        journal
            .write_barrier(JournalRecord::Plan {
                steps: steps.clone(),
            })
            .unwrap();
        journal
            .write_barrier(JournalRecord::Applied { seq: 0 })
            .unwrap();
        drop(journal);

        let outcomes = recover_all(&config).unwrap();
        assert!(matches!(outcomes[0], RecoveryOutcome::RolledBack { .. }));

        // The orphaned file was removed by the CopyFile inverse
        assert!(!config.root.join("orphan.txt").exists());
        // The journal was archived, not left behind
        assert!(find_incomplete_journals(&config.journal_dir)
            .unwrap()
            .is_empty());
        assert!(config
            .journal_dir
            .join("archive")
            .join("session-crash-1.journal")
            .exists());
    }

    #[test]
    fn test_recover_committed_session_completes() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        fs::write(config.root.join("kept.txt"), "committed content").unwrap();

        let steps = vec![PlannedStep {
            component: "componentA".to_string(),
            direction: Direction::Forward,
            operation: Operation::CopyFile {
                component: "componentA".to_string(),
                source: "kept.txt".to_string(),
                target: "kept.txt".to_string(),
                sha256: "unused".to_string(),
                size: 0,
            },
        }];

        let mut journal = SessionJournal::create(&config.journal_dir, "committed-1").unwrap();
        journal.write(begin_record("committed-1", &config)).unwrap();
        journal.write_barrier(JournalRecord::Plan { steps }).unwrap();
        journal
            .write_barrier(JournalRecord::Applied { seq: 0 })
            .unwrap();
        journal
            .write_barrier(JournalRecord::Committed {
                timestamp: Utc::now(),
            })
            .unwrap();
        drop(journal);

        let outcomes = recover_all(&config).unwrap();
        assert!(matches!(outcomes[0], RecoveryOutcome::Completed { .. }));

        // Committed sessions are rolled forward: the file stays
        assert_eq!(
            fs::read_to_string(config.root.join("kept.txt")).unwrap(),
            "committed content"
        );
    }

    #[test]
    fn test_recover_restores_backed_up_file() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        // A DeleteFile ran: the original was moved into the session backup
        let session = "backup-1";
        let backup_dir = config.txn_dir.join(session).join("backup");
        fs::create_dir_all(&backup_dir).unwrap();
        fs::write(backup_dir.join("old.txt"), "original content").unwrap();

        let steps = vec![PlannedStep {
            component: "componentA".to_string(),
            direction: Direction::Forward,
            operation: Operation::DeleteFile {
                path: "old.txt".to_string(),
            },
        }];

        let mut journal = SessionJournal::create(&config.journal_dir, session).unwrap();
        journal.write(begin_record(session, &config)).unwrap();
        journal.write_barrier(JournalRecord::Plan { steps }).unwrap();
        journal
            .write_barrier(JournalRecord::Applied { seq: 0 })
            .unwrap();
        drop(journal);

        let outcomes = recover_all(&config).unwrap();
        assert!(matches!(outcomes[0], RecoveryOutcome::RolledBack { .. }));
        assert_eq!(
            fs::read_to_string(config.root.join("old.txt")).unwrap(),
            "original content"
        );
    }
}
