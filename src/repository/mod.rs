// src/repository/mod.rs

//! Local repository access.
//!
//! A repository is a directory with a `components.json` descriptor document
//! plus payload trees/archives and hook scripts. This is the stand-in for
//! the external metadata-fetch collaborator: the engine only ever sees
//! parsed descriptors and payload references.

use crate::error::{Error, Result};
use crate::extract::{extractor_for, PayloadEntry};
use crate::fsutil::safe_join;
use crate::model::{parse_descriptors, ComponentModel};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Descriptor document name inside a repository directory.
pub const DESCRIPTOR_FILE: &str = "components.json";

/// An opened local repository.
#[derive(Debug, Clone)]
pub struct Repository {
    root: PathBuf,
}

impl Repository {
    /// Open a repository directory, verifying the descriptor document exists.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let descriptor_path = root.join(DESCRIPTOR_FILE);
        if !descriptor_path.is_file() {
            return Err(Error::MalformedDescriptor(format!(
                "no {} in {}",
                DESCRIPTOR_FILE,
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse descriptors and build the component model.
    pub fn load_model(&self) -> Result<ComponentModel> {
        let text = fs::read_to_string(self.root.join(DESCRIPTOR_FILE))?;
        let descriptors = parse_descriptors(&text)?;
        debug!(
            "loaded {} descriptors from {}",
            descriptors.len(),
            self.root.display()
        );
        ComponentModel::load(descriptors)
    }

    /// Resolve a payload reference to an absolute path inside the repository.
    pub fn payload_path(&self, payload: &str) -> Result<PathBuf> {
        let path = safe_join(&self.root, payload)?;
        if !path.exists() {
            return Err(Error::ExtractionFailed(format!(
                "payload '{}' not found in repository",
                payload
            )));
        }
        Ok(path)
    }

    /// Enumerate a payload's files for planning. Pure with respect to the
    /// target: only the repository is read.
    pub fn payload_manifest(&self, payload: &str) -> Result<Vec<PayloadEntry>> {
        let path = self.payload_path(payload)?;
        extractor_for(&path).list(&path)
    }

    /// Stage a payload into a working directory for execution.
    pub fn stage_payload(&self, payload: &str, target: &Path) -> Result<usize> {
        let path = self.payload_path(payload)?;
        extractor_for(&path).extract(&path, target)
    }

    /// Resolve a script hook reference to an absolute path.
    pub fn script_path(&self, script: &str) -> Result<PathBuf> {
        let path = safe_join(&self.root, script)?;
        if !path.is_file() {
            return Err(Error::ScriptFailed(format!(
                "script '{}' not found in repository",
                script
            )));
        }
        Ok(path)
    }
}

/// Convenience for one-shot loads.
pub fn load_repository(dir: &Path) -> Result<ComponentModel> {
    Repository::open(dir)?.load_model()
}
