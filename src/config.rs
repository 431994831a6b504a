// src/config.rs

//! Engine configuration.
//!
//! All persistent state for a target lives under `<root>/.keystone/`: the
//! SQLite state store, session journals, and per-session working areas. An
//! optional `settings.toml` supplies the default repository location so
//! `keystone update` works without repeating `--repository`.

use crate::error::Result;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the state directory created inside the target root.
pub const STATE_DIR_NAME: &str = ".keystone";

/// Default timeout for script hook execution.
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Engine configuration for one target directory.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Target root the components are installed into.
    pub root: PathBuf,
    /// Repository directory holding `components.json` and payloads.
    /// Absent for repository-free sessions (uninstall, recover, status).
    pub repository: Option<PathBuf>,
    /// Path to the state store database.
    pub db_path: PathBuf,
    /// Directory for session journals.
    pub journal_dir: PathBuf,
    /// Per-session working directory (backup/stage areas).
    pub txn_dir: PathBuf,
    /// Timeout applied to each script hook.
    pub script_timeout: Duration,
}

impl EngineConfig {
    /// Create a config with the standard state layout under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR_NAME);
        Self {
            root,
            repository: None,
            db_path: state_dir.join("state.db"),
            journal_dir: state_dir.join("journal"),
            txn_dir: state_dir.join("txn"),
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
        }
    }

    pub fn with_repository(mut self, repository: Option<PathBuf>) -> Self {
        self.repository = repository;
        self
    }

    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    /// The state directory holding all engine files.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR_NAME)
    }
}

/// User-level settings, loaded from `settings.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Default repository directory.
    pub repository: Option<PathBuf>,
}

impl Settings {
    /// Load settings from an explicit path, or from the default locations:
    /// `<root>/.keystone/settings.toml`, then the user config directory.
    /// Missing files yield defaults; a present-but-invalid file is an error.
    pub fn load(explicit: Option<&Path>, root: &Path) -> Result<Self> {
        let candidates: Vec<PathBuf> = match explicit {
            Some(p) => vec![p.to_path_buf()],
            None => {
                let mut v = vec![root.join(STATE_DIR_NAME).join("settings.toml")];
                if let Some(config_dir) = dirs::config_dir() {
                    v.push(config_dir.join("keystone").join("settings.toml"));
                }
                v
            }
        };

        for path in candidates {
            if path.is_file() {
                let text = fs::read_to_string(&path)?;
                let settings: Settings = toml::from_str(&text).map_err(|e| {
                    crate::error::Error::Parse(format!(
                        "invalid settings file {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                return Ok(settings);
            }
        }

        Ok(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_layout() {
        let config = EngineConfig::new("/opt/app");
        assert_eq!(config.db_path, PathBuf::from("/opt/app/.keystone/state.db"));
        assert_eq!(
            config.journal_dir,
            PathBuf::from("/opt/app/.keystone/journal")
        );
        assert_eq!(config.txn_dir, PathBuf::from("/opt/app/.keystone/txn"));
    }

    #[test]
    fn test_settings_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(None, dir.path()).unwrap();
        assert!(settings.repository.is_none());
    }

    #[test]
    fn test_settings_loaded_from_state_dir() {
        let dir = TempDir::new().unwrap();
        let state_dir = dir.path().join(STATE_DIR_NAME);
        fs::create_dir_all(&state_dir).unwrap();
        fs::write(
            state_dir.join("settings.toml"),
            "repository = \"/srv/repo\"\n",
        )
        .unwrap();

        let settings = Settings::load(None, dir.path()).unwrap();
        assert_eq!(settings.repository, Some(PathBuf::from("/srv/repo")));
    }

    #[test]
    fn test_settings_invalid_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "repository = [not toml").unwrap();

        assert!(Settings::load(Some(&path), dir.path()).is_err());
    }
}
