// src/operation/mod.rs

//! Reversible operations.
//!
//! An operation is one unit of change with an explicit `apply`/`invert`
//! capability pair. The executor's ordering logic is kind-agnostic: it only
//! ever calls `apply` going forward and `invert` rolling back. Operations
//! are plain serializable data so they can be journaled, persisted with
//! installed-component records, and replayed during crash recovery.
//!
//! Side effects are designed to be idempotent on retry: applying or
//! inverting an operation that already happened logs and succeeds, which is
//! what makes replaying a journal after a crash safe.

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::fsutil::{move_file_atomic, safe_join, sanitize_path};
use crate::hash;
use crate::repository::Repository;
use crate::script::HookExecutor;
use crate::store::{ComponentRecord, StateStore};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Execution context shared by all operation kinds.
///
/// Owns nothing: the session executor wires up the directories, the store
/// handle, and the repository (when one is available).
pub struct OpContext<'a> {
    /// Target root operations mutate.
    pub root: &'a Path,
    /// Session backup area for overwritten/deleted files.
    pub backup_dir: &'a Path,
    /// Session staging area holding extracted payloads, one subdirectory
    /// per component identity.
    pub stage_dir: &'a Path,
    /// Repository for script hooks. Absent in repository-free sessions;
    /// forward script execution then fails, inverse execution warns.
    pub repository: Option<&'a Repository>,
    /// State store, mutated only by RegisterUninstall.
    pub store: &'a mut StateStore,
    /// Session identity recorded with store mutations.
    pub session_uuid: &'a str,
    /// Timeout for script hooks.
    pub script_timeout: Duration,
}

impl<'a> OpContext<'a> {
    pub fn new(
        config: &'a EngineConfig,
        backup_dir: &'a Path,
        stage_dir: &'a Path,
        repository: Option<&'a Repository>,
        store: &'a mut StateStore,
        session_uuid: &'a str,
    ) -> Self {
        Self {
            root: &config.root,
            backup_dir,
            stage_dir,
            repository,
            store,
            session_uuid,
            script_timeout: config.script_timeout,
        }
    }

    /// Backup location mirroring a target-relative path.
    fn backup_path(&self, target: &str) -> Result<PathBuf> {
        Ok(self.backup_dir.join(sanitize_path(target)?))
    }
}

/// One reversible unit of change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Operation {
    /// Create a directory (and parents) under the target root.
    CreateDirectory { path: String },

    /// Materialize one payload file at a target-relative path, verifying
    /// its content hash. An existing file at the target is backed up first
    /// so the inverse can restore it.
    CopyFile {
        component: String,
        /// Payload-relative source path.
        source: String,
        /// Target-relative destination path.
        target: String,
        sha256: String,
        size: u64,
    },

    /// Remove a file from the target root, preserving it in the session
    /// backup area so the inverse can restore it.
    DeleteFile { path: String },

    /// Run a script hook. The inverse runs the undo script when one is
    /// declared; hooks without one are irreversible.
    RunScript {
        component: String,
        version: String,
        script: String,
        undo: Option<String>,
    },

    /// Register the component in the state store so a later session can
    /// compute the inverse plan. `previous` snapshots the record being
    /// superseded (updates), letting the inverse restore it exactly.
    RegisterUninstall {
        record: ComponentRecord,
        previous: Option<ComponentRecord>,
    },

    /// No-op marker used to give otherwise-empty components a journal
    /// presence and a progress tick.
    Minimal { label: String },

    /// A fixed group of operations applied in order and inverted in
    /// reverse order.
    Compound {
        label: String,
        operations: Vec<Operation>,
    },
}

impl Operation {
    /// Human label for progress reporting and error messages.
    pub fn describe(&self) -> String {
        match self {
            Operation::CreateDirectory { path } => format!("create directory {}", path),
            Operation::CopyFile { target, .. } => format!("install {}", target),
            Operation::DeleteFile { path } => format!("remove {}", path),
            Operation::RunScript { component, .. } => {
                format!("run install hook for {}", component)
            }
            Operation::RegisterUninstall { record, .. } => {
                format!("register {} {}", record.name, record.version)
            }
            Operation::Minimal { label } => label.clone(),
            Operation::Compound { label, .. } => label.clone(),
        }
    }

    /// Whether the inverse action can fully undo this operation.
    pub fn is_reversible(&self) -> bool {
        match self {
            Operation::RunScript { undo, .. } => undo.is_some(),
            Operation::Compound { operations, .. } => {
                operations.iter().all(Operation::is_reversible)
            }
            _ => true,
        }
    }

    /// Target-relative path this operation installs, if it is a CopyFile.
    pub fn copy_target(&self) -> Option<&str> {
        match self {
            Operation::CopyFile { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Apply the operation's side effect.
    pub fn apply(&self, ctx: &mut OpContext) -> Result<()> {
        match self {
            Operation::CreateDirectory { path } => {
                let target = safe_join(ctx.root, path)?;
                fs::create_dir_all(&target)?;
                Ok(())
            }

            Operation::CopyFile {
                component,
                source,
                target,
                sha256,
                ..
            } => {
                let src = ctx
                    .stage_dir
                    .join(component)
                    .join(sanitize_path(source)?);
                let dst = safe_join(ctx.root, target)?;

                if let Some(parent) = dst.parent() {
                    fs::create_dir_all(parent)?;
                }

                // Backup-before-overwrite keeps the inverse exact
                if dst.exists() {
                    let backup = ctx.backup_path(target)?;
                    if let Some(parent) = backup.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    move_file_atomic(&dst, &backup)?;
                }

                fs::copy(&src, &dst).map_err(|e| {
                    Error::ExtractionFailed(format!(
                        "staging {} -> {}: {}",
                        src.display(),
                        dst.display(),
                        e
                    ))
                })?;
                hash::verify_file(&dst, sha256)
            }

            Operation::DeleteFile { path } => {
                let target = safe_join(ctx.root, path)?;
                if !target.exists() {
                    warn!("file already absent, skipping delete: {}", path);
                    return Ok(());
                }
                let backup = ctx.backup_path(path)?;
                if let Some(parent) = backup.parent() {
                    fs::create_dir_all(parent)?;
                }
                move_file_atomic(&target, &backup)?;
                Ok(())
            }

            Operation::RunScript {
                component,
                version,
                script,
                ..
            } => {
                let repo = ctx.repository.ok_or_else(|| {
                    Error::ScriptFailed(format!(
                        "no repository available to run '{}' for {}",
                        script, component
                    ))
                })?;
                let script_path = repo.script_path(script)?;
                HookExecutor::new(ctx.root, component, version, ctx.script_timeout)
                    .run(&script_path, "post-install")
            }

            Operation::RegisterUninstall { record, .. } => {
                ctx.store.replace_record(record, ctx.session_uuid)
            }

            Operation::Minimal { label } => {
                debug!("minimal operation: {}", label);
                Ok(())
            }

            Operation::Compound { operations, .. } => {
                for op in operations {
                    op.apply(ctx)?;
                }
                Ok(())
            }
        }
    }

    /// Invoke the operation's inverse action.
    ///
    /// Inverses are forgiving: a file that is already gone or a backup
    /// that was never taken logs a warning instead of failing, so rollback
    /// and crash recovery can replay them safely.
    pub fn invert(&self, ctx: &mut OpContext) -> Result<()> {
        match self {
            Operation::CreateDirectory { path } => {
                let target = safe_join(ctx.root, path)?;
                if target.is_dir() && fs::read_dir(&target)?.next().is_none() {
                    fs::remove_dir(&target)?;
                } else {
                    debug!("leaving non-empty or absent directory: {}", path);
                }
                Ok(())
            }

            Operation::CopyFile { target, .. } => {
                let dst = safe_join(ctx.root, target)?;
                if dst.exists() {
                    fs::remove_file(&dst)?;
                }
                let backup = ctx.backup_path(target)?;
                if backup.exists() {
                    move_file_atomic(&backup, &dst)?;
                }
                Ok(())
            }

            Operation::DeleteFile { path } => {
                let backup = ctx.backup_path(path)?;
                if !backup.exists() {
                    warn!("no backup to restore for {}", path);
                    return Ok(());
                }
                let target = safe_join(ctx.root, path)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                move_file_atomic(&backup, &target)?;
                Ok(())
            }

            Operation::RunScript {
                component,
                version,
                undo,
                ..
            } => {
                let Some(undo) = undo else {
                    warn!(
                        "install hook for {} has no undo script; skipping irreversible step",
                        component
                    );
                    return Ok(());
                };
                let Some(repo) = ctx.repository else {
                    warn!(
                        "no repository available to undo '{}' for {}; skipping",
                        undo, component
                    );
                    return Ok(());
                };
                let script_path = repo.script_path(undo)?;
                HookExecutor::new(ctx.root, component, version, ctx.script_timeout)
                    .run(&script_path, "uninstall")
            }

            Operation::RegisterUninstall { record, previous } => match previous {
                Some(prev) => ctx.store.replace_record(prev, ctx.session_uuid),
                None => ctx.store.delete_record(&record.name),
            },

            Operation::Minimal { .. } => Ok(()),

            Operation::Compound { operations, .. } => {
                let mut failures = Vec::new();
                for op in operations.iter().rev() {
                    if let Err(e) = op.invert(ctx) {
                        failures.push(format!("{}: {}", op.describe(), e));
                    }
                }
                if failures.is_empty() {
                    Ok(())
                } else {
                    Err(Error::RollbackIncomplete(failures.join("; ")))
                }
            }
        }
    }
}
