// src/script.rs

//! Script hook execution.
//!
//! Hooks are external processes, not an embedded interpreter. Key safety
//! properties:
//!
//! - Timeout protection (60 seconds by default)
//! - stdin nullification to prevent hangs
//! - Output captured and forwarded to the log, never to the terminal

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// Interpreter used for hook scripts.
const INTERPRETER: &str = "/bin/sh";

/// Executes script hooks for one component.
pub struct HookExecutor {
    root: PathBuf,
    component: String,
    version: String,
    timeout: Duration,
}

impl HookExecutor {
    pub fn new(root: &Path, component: &str, version: &str, timeout: Duration) -> Self {
        Self {
            root: root.to_path_buf(),
            component: component.to_string(),
            version: version.to_string(),
            timeout,
        }
    }

    /// Run a hook script to completion. A non-zero exit or a timeout is a
    /// `ScriptFailed` error; the executor treats it like any other
    /// operation failure.
    pub fn run(&self, script: &Path, phase: &str) -> Result<()> {
        let interpreter = Path::new(INTERPRETER);
        if !interpreter.exists() {
            return Err(Error::ScriptFailed(format!(
                "interpreter not found: {}",
                INTERPRETER
            )));
        }
        if !script.is_file() {
            return Err(Error::ScriptFailed(format!(
                "script not found: {}",
                script.display()
            )));
        }

        info!(
            "running {} hook for {} v{}",
            phase, self.component, self.version
        );
        debug!("executing {} {}", INTERPRETER, script.display());

        let mut child = Command::new(interpreter)
            .arg(script)
            .env("KEYSTONE_COMPONENT", &self.component)
            .env("KEYSTONE_VERSION", &self.version)
            .env("KEYSTONE_ROOT", self.root.as_os_str())
            .env("KEYSTONE_PHASE", phase)
            .current_dir(&self.root)
            .stdin(Stdio::null()) // prevent stdin hangs
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ScriptFailed(format!("failed to spawn hook: {}", e)))?;

        match child.wait_timeout(self.timeout)? {
            Some(status) => {
                let output = child.wait_with_output()?;
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                for line in stdout.lines() {
                    info!("[{}] {}", phase, line);
                }
                for line in stderr.lines() {
                    warn!("[{}] {}", phase, line);
                }

                if status.success() {
                    Ok(())
                } else {
                    Err(Error::ScriptFailed(format!(
                        "{} hook for {} exited with code {}",
                        phase,
                        self.component,
                        status.code().unwrap_or(-1)
                    )))
                }
            }
            None => {
                let _ = child.kill();
                Err(Error::ScriptFailed(format!(
                    "{} hook for {} timed out after {} seconds",
                    phase,
                    self.component,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}
