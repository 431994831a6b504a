// src/error.rs

//! Error taxonomy for the Keystone engine.
//!
//! Errors split into two families: pre-mutation errors (resolution, planning,
//! locking) where nothing on disk has changed, and execution errors where the
//! session executor has already mutated the target and attempts rollback
//! before surfacing anything. `RollbackIncomplete` is the most severe outcome:
//! the undo itself could not finish and the target needs manual attention.

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A repository descriptor is invalid (undeclared dependency, bad
    /// version, self-reference, missing parent).
    #[error("malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// The dependency graph is not a DAG. Carries the component names
    /// forming the cycle, in walk order.
    #[error("dependency cycle: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// No available version of a component satisfies every constraint
    /// placed on it.
    #[error("no version of '{component}' satisfies {constraint} (required by {required_by})")]
    UnsatisfiableVersion {
        component: String,
        constraint: String,
        required_by: String,
    },

    /// A selection named a component that does not exist, is virtual, or is
    /// not installed (for update/uninstall).
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// Another session holds the state-store lock.
    #[error("another session is already in progress: {0}")]
    SessionBusy(String),

    /// An operation's side effect failed mid-execution. Rollback has already
    /// been attempted by the time this surfaces.
    #[error("operation failed: {operation}: {cause}")]
    OperationFailed { operation: String, cause: String },

    /// One or more inverse actions failed during rollback. Fatal; the target
    /// directory needs manual remediation.
    #[error("rollback incomplete, manual intervention required: {0}")]
    RollbackIncomplete(String),

    /// Payload extraction failed.
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),

    /// A script hook failed or timed out.
    #[error("script failed: {0}")]
    ScriptFailed(String),

    /// A path from a descriptor or payload escaped the target root.
    #[error("path traversal attempt: {0}")]
    PathTraversal(String),

    /// The session was cancelled by request.
    #[error("cancelled during {0}")]
    Cancelled(String),

    /// Persisted state (journal or store) could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// State store error.
    #[error("state store error: {0}")]
    State(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {}", .0.display())]
    InvalidPath(PathBuf),
}

impl Error {
    /// Exit classification for the CLI. Silent and interactive runs go
    /// through the same mapping, so scripted callers see identical codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::MalformedDescriptor(_)
            | Error::DependencyCycle(_)
            | Error::UnsatisfiableVersion { .. }
            | Error::UnknownComponent(_)
            | Error::Parse(_)
            | Error::InvalidPath(_)
            | Error::PathTraversal(_) => 2,
            Error::SessionBusy(_) => 3,
            Error::OperationFailed { .. }
            | Error::ExtractionFailed(_)
            | Error::ScriptFailed(_) => 4,
            Error::Cancelled(_) => 5,
            Error::RollbackIncomplete(_) => 6,
            Error::State(_) | Error::Io(_) => 7,
        }
    }

    /// True if the error was raised before any mutation of the target, i.e.
    /// the installed state is untouched.
    pub fn is_pre_mutation(&self) -> bool {
        !matches!(
            self,
            Error::OperationFailed { .. } | Error::RollbackIncomplete(_) | Error::Cancelled(_)
        )
    }
}
