// src/progress.rs

//! Progress reporting for session execution.
//!
//! The executor emits a monotonic signal (operation index / total, human
//! label) through the `ProgressReporter` trait. Reporting is observation
//! only: no implementation can influence execution, so silent and
//! interactive sessions behave identically.
//!
//! Implementations:
//! - `CliProgress`: indicatif progress bar for interactive runs
//! - `LogProgress`: tracing output for non-interactive environments
//! - `SilentProgress`: no-op for scripted/quiet modes

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::info;

/// Core trait for progress reporting.
///
/// Implementations must be thread-safe; long-running operations may report
/// from worker threads.
pub trait ProgressReporter: Send + Sync {
    /// Set the current status message.
    fn set_message(&self, message: &str);

    /// Set progress to a specific position.
    fn set_position(&self, position: u64);

    /// Set the total number of steps.
    fn set_length(&self, length: u64);

    /// Current position.
    fn position(&self) -> u64;

    /// Finish successfully with a message.
    fn finish_with_message(&self, message: &str);

    /// Finish after an error or rollback.
    fn finish_with_error(&self, message: &str);
}

/// No-op reporter for silent mode.
#[derive(Debug, Default)]
pub struct SilentProgress {
    position: AtomicU64,
    length: AtomicU64,
    finished: AtomicBool,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgressReporter for SilentProgress {
    fn set_message(&self, _message: &str) {}

    fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }

    fn finish_with_error(&self, _message: &str) {
        self.finished.store(true, Ordering::Relaxed);
    }
}

/// Reporter that logs progress through tracing.
#[derive(Debug)]
pub struct LogProgress {
    name: String,
    position: AtomicU64,
    length: AtomicU64,
}

impl LogProgress {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: AtomicU64::new(0),
            length: AtomicU64::new(0),
        }
    }
}

impl ProgressReporter for LogProgress {
    fn set_message(&self, message: &str) {
        let pos = self.position.load(Ordering::Relaxed);
        let len = self.length.load(Ordering::Relaxed);
        info!("[{}] ({}/{}) {}", self.name, pos, len, message);
    }

    fn set_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    fn set_length(&self, length: u64) {
        self.length.store(length, Ordering::Relaxed);
    }

    fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    fn finish_with_message(&self, message: &str) {
        info!("[{}] {}", self.name, message);
    }

    fn finish_with_error(&self, message: &str) {
        info!("[{}] {}", self.name, message);
    }
}

/// Interactive reporter backed by an indicatif progress bar.
pub struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    pub fn new(name: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix:.bold} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.set_prefix(name.to_string());
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn set_message(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn set_position(&self, position: u64) {
        self.bar.set_position(position);
    }

    fn set_length(&self, length: u64) {
        self.bar.set_length(length);
    }

    fn position(&self) -> u64 {
        self.bar.position()
    }

    fn finish_with_message(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    fn finish_with_error(&self, message: &str) {
        self.bar.abandon_with_message(message.to_string());
    }
}
