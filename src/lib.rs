// src/lib.rs

//! Keystone component installer engine.
//!
//! Transactional install/update/uninstall of hierarchical components with
//! full rollback on failure and resumable on-disk state.
//!
//! # Architecture
//!
//! - Repository descriptors feed an immutable in-memory component model
//! - The resolver computes a minimal consistent target set per selection
//! - The planner diffs the target set against installed state into an
//!   ordered list of reversible operations (pure, previewable)
//! - The session executor applies operations under an append-only journal
//!   with persist-before-proceed, rolling the journal backward on failure
//! - Installed-component records live in SQLite and carry the operation
//!   lists that created them, so uninstall works without the repository

pub mod cli;
pub mod commands;
pub mod config;
mod error;
pub mod extract;
pub mod fsutil;
pub mod hash;
pub mod model;
pub mod operation;
pub mod progress;
pub mod repository;
pub mod resolver;
pub mod script;
pub mod session;
pub mod store;
pub mod version;

pub use config::{EngineConfig, Settings};
pub use error::{Error, Result};
pub use model::{Component, ComponentModel};
pub use operation::Operation;
pub use progress::{CliProgress, LogProgress, ProgressReporter, SilentProgress};
pub use resolver::{Decision, ResolutionResult, SessionAction};
pub use session::{
    Engine, RecoveryOutcome, SessionOptions, SessionPhase, SessionReport,
};
pub use store::{ComponentRecord, InstalledState, StateStore};
pub use version::{ComponentVersion, DependencySpec, VersionConstraint};
