// src/model/descriptor.rs

//! Repository descriptor structs.
//!
//! Descriptors arrive as one JSON array in the repository's
//! `components.json`. This is the boundary to the external metadata
//! collaborator: everything here is untrusted input and validated by
//! `ComponentModel::load`.

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// A script hook reference declared by a descriptor.
///
/// Hooks run after the component's files are in place. The optional undo
/// script is the inverse: it runs when the component is rolled back or
/// uninstalled. A hook without one is irreversible and surfaced as a
/// warning during rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptHook {
    /// Repository-relative path of the script.
    pub run: String,
    /// Optional inverse script.
    #[serde(default)]
    pub undo: Option<String>,
}

/// One component descriptor as published by a repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDescriptor {
    /// Hierarchical dot-separated identity, e.g. `componentF.subcomponent1`.
    pub name: String,
    /// Version string (semantic version).
    pub version: String,
    /// Uncompressed payload size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Dependency declarations, e.g. `"componentB"` or `"componentB >= 2.0"`.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Ordered script hook references.
    #[serde(default)]
    pub scripts: Vec<ScriptHook>,
    /// Always part of an install resolution, selected or not.
    #[serde(default)]
    pub forced: bool,
    /// Never user-selectable; enters the set only as a dependency or parent.
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    /// Whether the component is presented as selectable at all.
    #[serde(default = "default_true")]
    pub checkable: bool,
    /// Whether selecting the parent implicitly selects this component.
    #[serde(default = "default_true")]
    pub default: bool,
    /// Repository-relative payload reference: a directory, or a `.tar.gz`
    /// archive. Absent for virtual/meta components.
    #[serde(default)]
    pub payload: Option<String>,
}

/// Parse a `components.json` document.
pub fn parse_descriptors(text: &str) -> crate::Result<Vec<ComponentDescriptor>> {
    serde_json::from_str(text)
        .map_err(|e| crate::Error::MalformedDescriptor(format!("invalid components.json: {}", e)))
}
