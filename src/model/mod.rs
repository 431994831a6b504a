// src/model/mod.rs

//! In-memory component model.
//!
//! The model is a flat mapping from identity to component plus a derived
//! parent/child index over the dot-separated hierarchical names. Traversal
//! is a graph walk over explicit edges; there is no inheritance. The model
//! is immutable once loaded.

pub mod descriptor;

pub use descriptor::{ComponentDescriptor, ScriptHook, parse_descriptors};

use crate::error::{Error, Result};
use crate::version::{ComponentVersion, DependencySpec, VersionConstraint};
use std::collections::HashMap;

/// An installable component, validated and immutable for the session.
#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    pub version: ComponentVersion,
    pub size: u64,
    pub dependencies: Vec<DependencySpec>,
    pub scripts: Vec<ScriptHook>,
    pub forced: bool,
    pub is_virtual: bool,
    pub checkable: bool,
    pub default: bool,
    pub payload: Option<String>,
    /// Position of the descriptor in the repository document. Breaks ties
    /// between equal versions: first encountered wins.
    pub descriptor_index: usize,
}

impl Component {
    /// Parent identity for hierarchical names, `None` for roots.
    pub fn parent(&self) -> Option<&str> {
        parent_name(&self.name)
    }
}

/// Parent of a dot-separated identity.
pub fn parent_name(name: &str) -> Option<&str> {
    name.rfind('.').map(|idx| &name[..idx])
}

/// All ancestors of an identity, nearest first.
pub fn ancestors(name: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut current = name;
    while let Some(parent) = parent_name(current) {
        out.push(parent);
        current = parent;
    }
    out
}

/// The loaded component model: every available component version, indexed
/// by identity, plus the derived hierarchy.
#[derive(Debug)]
pub struct ComponentModel {
    /// All versions per identity, in descriptor order.
    versions: HashMap<String, Vec<Component>>,
    /// Ordered child identities per parent identity.
    children: HashMap<String, Vec<String>>,
    /// Identities in first-appearance order.
    order: Vec<String>,
}

impl ComponentModel {
    /// Build and validate a model from parsed descriptors.
    ///
    /// Fails with `MalformedDescriptor` when a component references an
    /// undeclared dependency, depends on itself, names an undeclared
    /// parent, or carries an unparseable version.
    pub fn load(descriptors: Vec<ComponentDescriptor>) -> Result<Self> {
        let mut versions: HashMap<String, Vec<Component>> = HashMap::new();
        let mut order: Vec<String> = Vec::new();

        for (index, d) in descriptors.into_iter().enumerate() {
            if d.name.is_empty() {
                return Err(Error::MalformedDescriptor(format!(
                    "descriptor #{} has an empty name",
                    index
                )));
            }
            if d.name.split('.').any(|part| part.is_empty()) {
                return Err(Error::MalformedDescriptor(format!(
                    "'{}' has an empty hierarchy segment",
                    d.name
                )));
            }

            let version = ComponentVersion::parse(&d.version).map_err(|e| {
                Error::MalformedDescriptor(format!("'{}': {}", d.name, e))
            })?;

            let mut dependencies = Vec::with_capacity(d.dependencies.len());
            for dep in &d.dependencies {
                let spec = DependencySpec::parse(dep)
                    .map_err(|e| Error::MalformedDescriptor(format!("'{}': {}", d.name, e)))?;
                if spec.name == d.name {
                    return Err(Error::MalformedDescriptor(format!(
                        "'{}' depends on itself",
                        d.name
                    )));
                }
                dependencies.push(spec);
            }

            let component = Component {
                name: d.name.clone(),
                version,
                size: d.size,
                dependencies,
                scripts: d.scripts,
                forced: d.forced,
                is_virtual: d.is_virtual,
                checkable: d.checkable,
                default: d.default,
                payload: d.payload,
                descriptor_index: index,
            };

            let slot = versions.entry(d.name.clone()).or_default();
            if slot.is_empty() {
                order.push(d.name);
            }
            slot.push(component);
        }

        // Cross-references are checked after all names are known
        for list in versions.values() {
            for component in list {
                for dep in &component.dependencies {
                    if !versions.contains_key(&dep.name) {
                        return Err(Error::MalformedDescriptor(format!(
                            "'{}' depends on undeclared component '{}'",
                            component.name, dep.name
                        )));
                    }
                }
                if let Some(parent) = component.parent() {
                    if !versions.contains_key(parent) {
                        return Err(Error::MalformedDescriptor(format!(
                            "'{}' names undeclared parent '{}'",
                            component.name, parent
                        )));
                    }
                }
            }
        }

        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for name in &order {
            if let Some(parent) = parent_name(name) {
                children
                    .entry(parent.to_string())
                    .or_default()
                    .push(name.clone());
            }
        }

        Ok(Self {
            versions,
            children,
            order,
        })
    }

    /// Highest available version of a component. Equal versions resolve to
    /// the first encountered in descriptor order.
    pub fn lookup(&self, name: &str) -> Option<&Component> {
        self.best_satisfying(name, &[])
    }

    /// All available versions of a component, in descriptor order.
    pub fn versions(&self, name: &str) -> &[Component] {
        self.versions.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Highest version satisfying every given constraint, if any.
    pub fn best_satisfying(
        &self,
        name: &str,
        constraints: &[VersionConstraint],
    ) -> Option<&Component> {
        let mut best: Option<&Component> = None;
        for candidate in self.versions(name) {
            if !constraints.iter().all(|c| c.satisfies(&candidate.version)) {
                continue;
            }
            // Strictly-greater keeps the earliest descriptor on ties
            match best {
                Some(b) if candidate.version <= b.version => {}
                _ => best = Some(candidate),
            }
        }
        best
    }

    /// Ordered direct children of an identity.
    pub fn children(&self, name: &str) -> Vec<&Component> {
        self.children
            .get(name)
            .map(|names| names.iter().filter_map(|n| self.lookup(n)).collect())
            .unwrap_or_default()
    }

    /// Identities in first-appearance order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.versions.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
