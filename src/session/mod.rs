// src/session/mod.rs

//! Session execution engine.
//!
//! A session is one resolve -> plan -> execute -> commit/rollback
//! invocation over a target root:
//!
//! ```text
//! Idle -> Resolving -> Planning -> Executing -> { Committed, RolledBack }
//! ```
//!
//! Resolution and planning failures abort before any mutation. During
//! execution every step is applied, journaled `Applied`, and fsynced before
//! the next step starts. Any failure - including cancellation - walks the
//! journal backward invoking inverses. Inverse failures are surfaced as
//! `RollbackIncomplete`, the most prominent error the engine can produce,
//! while the remaining rollback continues best-effort.
//!
//! The state store is only ever mutated by the executor while it holds the
//! exclusive session lock; a concurrent session fails `SessionBusy`.

pub mod journal;
pub mod planner;
pub mod recovery;

pub use journal::{JournalRecord, SessionJournal};
pub use planner::{Direction, Manifests, PlannedStep};
pub use recovery::RecoveryOutcome;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::operation::OpContext;
use crate::progress::{ProgressReporter, SilentProgress};
use crate::repository::Repository;
use crate::resolver::{resolve, Decision, ResolutionResult, SessionAction};
use crate::store::{SessionRow, SessionStatus, StateStore};
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use strum_macros::Display;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Session state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionPhase {
    Idle,
    Resolving,
    Planning,
    Executing,
    Committed,
    RolledBack,
}

/// Options controlling session execution.
pub struct SessionOptions {
    /// Resolve and plan, but execute nothing.
    pub dry_run: bool,
    /// Cancellation token; set to true to request rollback.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Progress sink. Observation only.
    pub reporter: Arc<dyn ProgressReporter>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            cancel: None,
            reporter: Arc::new(SilentProgress::new()),
        }
    }
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }

    fn check_cancelled(&self, stage: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(stage.to_string()))
        } else {
            Ok(())
        }
    }
}

/// Result of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    /// Absent for dry runs and no-op sessions (nothing was journaled).
    pub session_uuid: Option<String>,
    pub phase: SessionPhase,
    pub action: SessionAction,
    pub resolution: ResolutionResult,
    pub steps: Vec<PlannedStep>,
    pub applied: usize,
    pub dry_run: bool,
}

/// The session engine for one target root.
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Create an engine, materializing the state directory layout.
    pub fn new(config: EngineConfig) -> Result<Self> {
        fs::create_dir_all(&config.txn_dir)?;
        fs::create_dir_all(&config.journal_dir)?;
        fs::create_dir_all(config.journal_dir.join("archive"))?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Acquire the exclusive session lock with bounded backoff.
    fn acquire_lock(&self) -> Result<File> {
        let lock_path = self.config.txn_dir.join("keystone.lock");
        let lock_file = File::create(&lock_path)?;

        // Tries: 0ms, 100ms, 200ms, 400ms, 800ms (~1.5s total)
        const MAX_RETRIES: u32 = 5;
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            match lock_file.try_lock_exclusive() {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    last_error = Some(e);
                    if attempt < MAX_RETRIES - 1 {
                        let delay = std::time::Duration::from_millis(100 * (1 << attempt));
                        std::thread::sleep(delay);
                    }
                }
            }
        }

        if let Some(e) = last_error {
            return Err(Error::SessionBusy(format!(
                "could not acquire session lock at {} ({})",
                lock_path.display(),
                e
            )));
        }

        Ok(lock_file)
    }

    /// Sweep and resolve incomplete journals left by crashed sessions.
    pub fn recover(&self) -> Result<Vec<RecoveryOutcome>> {
        let lock = self.acquire_lock()?;
        let outcomes = recovery::recover_all(&self.config);
        let _ = fs2::FileExt::unlock(&lock);
        outcomes
    }

    /// Installed state, for introspection commands.
    pub fn installed_state(&self) -> Result<crate::store::InstalledState> {
        StateStore::open(&self.config.db_path)?.load_state()
    }

    /// Session audit rows, for introspection commands.
    pub fn sessions(&self) -> Result<Vec<SessionRow>> {
        StateStore::open(&self.config.db_path)?.sessions()
    }

    /// Run one session to a terminal phase.
    pub fn run(
        &self,
        action: SessionAction,
        selection: &[String],
        options: &SessionOptions,
    ) -> Result<SessionReport> {
        let lock = self.acquire_lock()?;
        let result = self.run_locked(action, selection, options);
        let _ = fs2::FileExt::unlock(&lock);
        result
    }

    fn run_locked(
        &self,
        action: SessionAction,
        selection: &[String],
        options: &SessionOptions,
    ) -> Result<SessionReport> {
        // Crashed predecessors are resolved before anything else reads state
        for outcome in recovery::recover_all(&self.config)? {
            info!("recovered incomplete session: {:?}", outcome);
        }

        let mut store = StateStore::open(&self.config.db_path)?;
        let installed = store.load_state()?;

        debug!("session phase: {}", SessionPhase::Resolving);
        let repo = match &self.config.repository {
            Some(dir) => Some(Repository::open(dir)?),
            None => None,
        };
        let model = match action {
            SessionAction::Uninstall => None,
            _ => {
                let repo = repo.as_ref().ok_or_else(|| {
                    Error::MalformedDescriptor(
                        "no repository configured (use --repository or settings.toml)".to_string(),
                    )
                })?;
                Some(repo.load_model()?)
            }
        };
        let empty_model = crate::model::ComponentModel::load(Vec::new())?;
        let model_ref = model.as_ref().unwrap_or(&empty_model);

        let resolution = resolve(model_ref, &installed, selection, action)?;

        debug!("session phase: {}", SessionPhase::Planning);
        let mut manifests = Manifests::new();
        if let (Some(model), Some(repo)) = (&model, &repo) {
            for entry in resolution.changes() {
                if !matches!(entry.decision, Decision::Install | Decision::Update { .. }) {
                    continue;
                }
                let component = model
                    .versions(&entry.name)
                    .iter()
                    .find(|c| c.version == entry.version)
                    .ok_or_else(|| {
                        Error::UnknownComponent(format!("{} {}", entry.name, entry.version))
                    })?;
                if let Some(payload) = &component.payload {
                    manifests.insert(entry.name.clone(), repo.payload_manifest(payload)?);
                }
            }
        }
        let steps = planner::plan(&resolution, &installed, model.as_ref(), &manifests)?;

        if options.dry_run {
            return Ok(SessionReport {
                session_uuid: None,
                phase: SessionPhase::Planning,
                action,
                resolution,
                steps,
                applied: 0,
                dry_run: true,
            });
        }

        if steps.is_empty() {
            info!("nothing to do for {} session", action);
            return Ok(SessionReport {
                session_uuid: None,
                phase: SessionPhase::Committed,
                action,
                resolution,
                steps,
                applied: 0,
                dry_run: false,
            });
        }

        debug!("session phase: {}", SessionPhase::Executing);
        let session_uuid = Uuid::new_v4().to_string();
        let started = Utc::now();
        let description = describe_session(action, &resolution);

        let mut journal = SessionJournal::create(&self.config.journal_dir, &session_uuid)?;
        journal.write_barrier(JournalRecord::Begin {
            session_uuid: session_uuid.clone(),
            action: action.to_string(),
            root: self.config.root.clone(),
            description: description.clone(),
            timestamp: started,
        })?;
        journal.write_barrier(JournalRecord::Plan {
            steps: steps.clone(),
        })?;

        let work_dir = self.config.txn_dir.join(&session_uuid);
        let backup_dir = work_dir.join("backup");
        let stage_dir = work_dir.join("stage");
        fs::create_dir_all(&backup_dir)?;
        fs::create_dir_all(&stage_dir)?;

        // Staging reads the repository and writes only the work area; a
        // failure here leaves the target untouched
        match self.stage_payloads(&resolution, model.as_ref(), repo.as_ref(), &stage_dir) {
            Ok((components, files)) => {
                journal.write_barrier(JournalRecord::Staged { components, files })?;
            }
            Err(e) => {
                journal.delete()?;
                let _ = fs::remove_dir_all(&work_dir);
                return Err(e);
            }
        }

        store.session_started(&session_uuid, &action.to_string(), &description)?;
        options.reporter.set_length(steps.len() as u64);

        let exec_result = {
            let mut ctx = OpContext::new(
                &self.config,
                &backup_dir,
                &stage_dir,
                repo.as_ref(),
                &mut store,
                &session_uuid,
            );
            execute_steps(&steps, &mut journal, &mut ctx, options)
        };

        let duration_ms = (Utc::now() - started).num_milliseconds().max(0) as u64;
        match exec_result {
            Ok(()) => {
                journal.write_barrier(JournalRecord::Committed {
                    timestamp: Utc::now(),
                })?;
                store.session_finished(&session_uuid, SessionStatus::Committed)?;
                journal.write_barrier(JournalRecord::Done {
                    success: true,
                    duration_ms,
                })?;
                journal.archive()?;
                fs::remove_dir_all(&work_dir)?;
                options
                    .reporter
                    .finish_with_message(&format!("{} complete", action));

                Ok(SessionReport {
                    session_uuid: Some(session_uuid),
                    phase: SessionPhase::Committed,
                    action,
                    resolution,
                    applied: steps.len(),
                    steps,
                    dry_run: false,
                })
            }
            Err(err) => {
                store.session_finished(&session_uuid, SessionStatus::RolledBack)?;
                journal.write_barrier(JournalRecord::RolledBack {
                    reason: err.to_string(),
                })?;
                journal.write_barrier(JournalRecord::Done {
                    success: false,
                    duration_ms,
                })?;
                // Archived, not deleted: the partial log is the diagnostic
                journal.archive()?;
                if matches!(err, Error::RollbackIncomplete(_)) {
                    // Backups may still be needed for manual remediation
                    error!(
                        "rollback incomplete; work area preserved at {}",
                        work_dir.display()
                    );
                } else {
                    let _ = fs::remove_dir_all(&work_dir);
                }
                options.reporter.finish_with_error(&err.to_string());
                Err(err)
            }
        }
    }

    /// Extract every needed payload into the session staging area.
    fn stage_payloads(
        &self,
        resolution: &ResolutionResult,
        model: Option<&crate::model::ComponentModel>,
        repo: Option<&Repository>,
        stage_dir: &std::path::Path,
    ) -> Result<(usize, usize)> {
        let (Some(model), Some(repo)) = (model, repo) else {
            return Ok((0, 0));
        };

        let mut components = 0;
        let mut files = 0;
        for entry in resolution.changes() {
            if !matches!(entry.decision, Decision::Install | Decision::Update { .. }) {
                continue;
            }
            let Some(component) = model
                .versions(&entry.name)
                .iter()
                .find(|c| c.version == entry.version)
            else {
                continue;
            };
            if let Some(payload) = &component.payload {
                let target = stage_dir.join(&entry.name);
                files += repo.stage_payload(payload, &target)?;
                components += 1;
            }
        }
        Ok((components, files))
    }
}

/// Apply steps strictly in order with persist-before-proceed, rolling back
/// everything applied on the first failure or cancellation.
fn execute_steps(
    steps: &[PlannedStep],
    journal: &mut SessionJournal,
    ctx: &mut OpContext,
    options: &SessionOptions,
) -> Result<()> {
    for (seq, step) in steps.iter().enumerate() {
        if let Err(cancel) = options.check_cancelled(&step.describe()) {
            warn!("cancellation requested; rolling back {} applied steps", seq);
            rollback_from(steps, seq, journal, ctx)?;
            return Err(cancel);
        }

        options.reporter.set_position(seq as u64);
        options.reporter.set_message(&step.describe());
        debug!("step {}: {}", seq, step.describe());

        if let Err(cause) = step.execute(ctx) {
            error!("step {} failed ({}): {}", seq, step.describe(), cause);

            // The failing step may be half-applied; its inverse is
            // idempotent, so unwind it first without an Undone mark
            if let Err(undo_err) = step.rollback(ctx) {
                journal.write_barrier(JournalRecord::UndoFailed {
                    seq,
                    error: undo_err.to_string(),
                })?;
                rollback_from(steps, seq, journal, ctx)?;
                return Err(Error::RollbackIncomplete(format!(
                    "step '{}' failed ({}) and could not be undone: {}",
                    step.describe(),
                    cause,
                    undo_err
                )));
            }

            rollback_from(steps, seq, journal, ctx)?;
            return Err(Error::OperationFailed {
                operation: step.describe(),
                cause: cause.to_string(),
            });
        }

        journal.write_barrier(JournalRecord::Applied { seq })?;
        options.reporter.set_position(seq as u64 + 1);
    }

    Ok(())
}

/// Walk applied steps backward invoking inverses, persisting an `Undone`
/// mark after each. Inverse failures are collected rather than aborting:
/// rollback continues best-effort, and the collected failures surface as
/// `RollbackIncomplete`.
fn rollback_from(
    steps: &[PlannedStep],
    applied_count: usize,
    journal: &mut SessionJournal,
    ctx: &mut OpContext,
) -> Result<()> {
    let mut failures = Vec::new();

    for seq in (0..applied_count).rev() {
        let step = &steps[seq];
        match step.rollback(ctx) {
            Ok(()) => {
                journal.write_barrier(JournalRecord::Undone { seq })?;
            }
            Err(e) => {
                error!("rollback of step {} ({}) failed: {}", seq, step.describe(), e);
                journal.write_barrier(JournalRecord::UndoFailed {
                    seq,
                    error: e.to_string(),
                })?;
                failures.push(format!("{}: {}", step.describe(), e));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::RollbackIncomplete(failures.join("; ")))
    }
}

fn describe_session(action: SessionAction, resolution: &ResolutionResult) -> String {
    let names: Vec<&str> = resolution.changes().map(|c| c.name.as_str()).collect();
    format!("{} {}", action, names.join(", "))
}
