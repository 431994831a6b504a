// src/resolver/mod.rs

//! Dependency resolution.
//!
//! `resolve` turns a user selection plus the installed state into a
//! `ResolutionResult`: the minimal consistent target set with one decision
//! (install/update/remove/keep) and a human-readable reason per component.
//! Resolution is pure: it never touches the filesystem or the store, so a
//! failed resolution leaves nothing to clean up.

pub mod graph;

pub use graph::{ComponentNode, DependencyEdge, DependencyGraph};

use crate::error::{Error, Result};
use crate::model::{ancestors, Component, ComponentModel};
use crate::store::InstalledState;
use crate::version::{ComponentVersion, VersionConstraint};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use strum_macros::{Display, EnumString};

/// The action a session was started with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum SessionAction {
    Install,
    Update,
    Uninstall,
}

/// Per-component decision in a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Install,
    Update { from: String },
    Remove,
    Keep,
}

/// One component's entry in the target set.
#[derive(Debug, Clone)]
pub struct ResolvedComponent {
    pub name: String,
    pub version: ComponentVersion,
    pub decision: Decision,
    pub reason: String,
}

/// The resolver's output: the target set in apply order (dependencies
/// before dependents for install/update, dependents first for removal).
#[derive(Debug)]
pub struct ResolutionResult {
    pub action: SessionAction,
    pub components: Vec<ResolvedComponent>,
}

impl ResolutionResult {
    /// Entries that will produce operations.
    pub fn changes(&self) -> impl Iterator<Item = &ResolvedComponent> {
        self.components
            .iter()
            .filter(|c| c.decision != Decision::Keep)
    }

    /// True when nothing needs to be done.
    pub fn is_noop(&self) -> bool {
        self.changes().next().is_none()
    }

    /// Names that remain present after the session (everything except
    /// removals). Re-resolving these with action=Install is a fixed point.
    pub fn target_names(&self) -> Vec<String> {
        self.components
            .iter()
            .filter(|c| c.decision != Decision::Remove)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn lookup(&self, name: &str) -> Option<&ResolvedComponent> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Compute the target set for a selection.
///
/// Install/Update walk the depends-on closure of the (hierarchy-expanded)
/// selection; Uninstall walks the reverse closure over installed records
/// and needs no repository model.
pub fn resolve(
    model: &ComponentModel,
    installed: &InstalledState,
    selection: &[String],
    action: SessionAction,
) -> Result<ResolutionResult> {
    match action {
        SessionAction::Install => resolve_install(model, installed, selection),
        SessionAction::Update => resolve_update(model, installed, selection),
        SessionAction::Uninstall => resolve_uninstall(installed, selection),
    }
}

/// Closure builder shared by install and update resolution.
struct ClosureBuilder<'a> {
    model: &'a ComponentModel,
    reasons: BTreeMap<String, String>,
    /// Components whose default children were already pulled in.
    children_expanded: HashSet<String>,
    /// Accumulated (requirer, constraint) pairs per component.
    constraints: HashMap<String, Vec<(String, VersionConstraint)>>,
    chosen: HashMap<String, &'a Component>,
    queue: VecDeque<String>,
}

impl<'a> ClosureBuilder<'a> {
    fn new(model: &'a ComponentModel) -> Self {
        Self {
            model,
            reasons: BTreeMap::new(),
            children_expanded: HashSet::new(),
            constraints: HashMap::new(),
            chosen: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    /// Add a component to the set. Ancestors are always pulled in; default
    /// children only when `with_children` (selection and downward
    /// expansion, not plain dependencies).
    fn add(&mut self, name: &str, reason: String, with_children: bool) {
        let is_new = !self.reasons.contains_key(name);
        if is_new {
            self.reasons.insert(name.to_string(), reason);
            self.queue.push_back(name.to_string());

            for ancestor in ancestors(name) {
                self.add(ancestor, format!("parent of {}", name), false);
            }
        }

        if with_children && self.children_expanded.insert(name.to_string()) {
            let children: Vec<String> = self
                .model
                .children(name)
                .iter()
                .filter(|c| c.default)
                .map(|c| c.name.clone())
                .collect();
            for child in children {
                self.add(&child, format!("default child of {}", name), true);
            }
        }
    }

    /// Drive version selection to a fixed point over the depends-on edges.
    fn run(&mut self) -> Result<()> {
        while let Some(name) = self.queue.pop_front() {
            let constraints: Vec<VersionConstraint> = self
                .constraints
                .get(&name)
                .map(|v| v.iter().map(|(_, c)| c.clone()).collect())
                .unwrap_or_default();

            let best = match self.model.best_satisfying(&name, &constraints) {
                Some(c) => c,
                None => {
                    let placed = self.constraints.get(&name);
                    let constraint = placed
                        .map(|v| {
                            v.iter()
                                .map(|(_, c)| c.to_string())
                                .collect::<Vec<_>>()
                                .join(", ")
                        })
                        .unwrap_or_else(|| "*".to_string());
                    let required_by = placed
                        .map(|v| {
                            let mut names: Vec<String> =
                                v.iter().map(|(n, _)| n.clone()).collect();
                            names.sort();
                            names.dedup();
                            names.join(", ")
                        })
                        .unwrap_or_else(|| "selection".to_string());
                    return Err(Error::UnsatisfiableVersion {
                        component: name,
                        constraint,
                        required_by,
                    });
                }
            };

            let unchanged = self
                .chosen
                .get(&name)
                .is_some_and(|c| c.descriptor_index == best.descriptor_index);
            if unchanged {
                continue;
            }
            self.chosen.insert(name.clone(), best);

            let deps: Vec<_> = best.dependencies.clone();
            for dep in deps {
                let pairs = self.constraints.entry(dep.name.clone()).or_default();
                let pair = (name.clone(), dep.constraint.clone());
                if !pairs.contains(&pair) {
                    pairs.push(pair);
                }
                self.add(&dep.name, format!("needed by {}", name), false);
                // Re-evaluate even if already chosen: the new constraint may
                // rule the current choice out
                self.queue.push_back(dep.name.clone());
            }
        }
        Ok(())
    }

    /// Verify the chosen set is a DAG and return it in dependency order.
    fn ordered(&self) -> Result<Vec<&'a Component>> {
        let mut graph = DependencyGraph::new();
        for component in self.chosen.values() {
            graph.add_node(ComponentNode {
                name: component.name.clone(),
                version: component.version.clone(),
            });
        }
        for component in self.chosen.values() {
            for dep in &component.dependencies {
                graph.add_edge(DependencyEdge {
                    from: component.name.clone(),
                    to: dep.name.clone(),
                    constraint: dep.constraint.clone(),
                });
            }
        }

        graph.ensure_acyclic()?;
        let order = graph.topological_sort()?;
        Ok(order
            .iter()
            .filter_map(|name| self.chosen.get(name).copied())
            .collect())
    }

    fn reason(&self, name: &str) -> String {
        self.reasons
            .get(name)
            .cloned()
            .unwrap_or_else(|| "needed".to_string())
    }
}

fn check_selectable(model: &ComponentModel, name: &str) -> Result<()> {
    let component = model
        .lookup(name)
        .ok_or_else(|| Error::UnknownComponent(name.to_string()))?;
    if component.is_virtual {
        return Err(Error::UnknownComponent(format!(
            "'{}' is virtual and cannot be selected directly",
            name
        )));
    }
    Ok(())
}

fn resolve_install(
    model: &ComponentModel,
    installed: &InstalledState,
    selection: &[String],
) -> Result<ResolutionResult> {
    let mut builder = ClosureBuilder::new(model);

    for name in selection {
        check_selectable(model, name)?;
        builder.add(name, "selected".to_string(), true);
    }

    // Forced components join every install resolution
    let forced: Vec<String> = model
        .names()
        .filter(|n| model.lookup(n).is_some_and(|c| c.forced))
        .map(String::from)
        .collect();
    for name in forced {
        builder.add(&name, "forced".to_string(), true);
    }

    builder.run()?;
    let ordered = builder.ordered()?;

    let mut components = Vec::with_capacity(ordered.len());
    for component in ordered {
        let entry = decide_install_like(component, installed, &builder, SessionAction::Install)?;
        components.push(entry);
    }

    Ok(ResolutionResult {
        action: SessionAction::Install,
        components,
    })
}

fn resolve_update(
    model: &ComponentModel,
    installed: &InstalledState,
    selection: &[String],
) -> Result<ResolutionResult> {
    let mut builder = ClosureBuilder::new(model);
    // Installed components with no eligible update, reported as untouched
    let mut untouched: Vec<ResolvedComponent> = Vec::new();

    if selection.is_empty() {
        // Update-all: every installed component with a newer available version
        for record in installed.iter() {
            let Some(available) = model.lookup(&record.name) else {
                untouched.push(ResolvedComponent {
                    name: record.name.clone(),
                    version: ComponentVersion::parse(&record.version)?,
                    decision: Decision::Keep,
                    reason: "not in repository".to_string(),
                });
                continue;
            };
            let current = ComponentVersion::parse(&record.version)?;
            if available.version > current {
                builder.add(
                    &record.name,
                    format!("update available ({} -> {})", current, available.version),
                    true,
                );
            } else {
                untouched.push(ResolvedComponent {
                    name: record.name.clone(),
                    version: current,
                    decision: Decision::Keep,
                    reason: "up to date".to_string(),
                });
            }
        }
    } else {
        for name in selection {
            check_selectable(model, name)?;
            if !installed.contains(name) {
                return Err(Error::UnknownComponent(format!(
                    "'{}' is not installed",
                    name
                )));
            }
            builder.add(name, "selected".to_string(), true);
        }
    }

    builder.run()?;
    let ordered = builder.ordered()?;

    let mut components = Vec::with_capacity(ordered.len());
    for component in ordered {
        let entry = decide_install_like(component, installed, &builder, SessionAction::Update)?;
        components.push(entry);
    }
    // Drop closure members that are already installed and untouched unless
    // they explain the plan (keeps update output focused on real changes)
    components.extend(untouched);

    Ok(ResolutionResult {
        action: SessionAction::Update,
        components,
    })
}

fn decide_install_like(
    component: &Component,
    installed: &InstalledState,
    builder: &ClosureBuilder<'_>,
    action: SessionAction,
) -> Result<ResolvedComponent> {
    let name = component.name.clone();
    let (decision, reason) = match installed.get(&name) {
        None => (Decision::Install, builder.reason(&name)),
        Some(record) => {
            let current = ComponentVersion::parse(&record.version)?;
            if component.version > current {
                (
                    Decision::Update {
                        from: record.version.clone(),
                    },
                    match action {
                        SessionAction::Update => {
                            format!("update available ({} -> {})", current, component.version)
                        }
                        _ => builder.reason(&name),
                    },
                )
            } else if component.version == current {
                let reason = match action {
                    SessionAction::Update => "up to date".to_string(),
                    _ => "already installed".to_string(),
                };
                (Decision::Keep, reason)
            } else {
                (
                    Decision::Keep,
                    format!("installed version {} is newer", current),
                )
            }
        }
    };

    Ok(ResolvedComponent {
        name,
        version: component.version.clone(),
        decision,
        reason,
    })
}

fn resolve_uninstall(
    installed: &InstalledState,
    selection: &[String],
) -> Result<ResolutionResult> {
    if selection.is_empty() {
        return Err(Error::UnknownComponent(
            "uninstall requires an explicit selection".to_string(),
        ));
    }

    for name in selection {
        if !installed.contains(name) {
            return Err(Error::UnknownComponent(format!(
                "'{}' is not installed",
                name
            )));
        }
    }

    // Candidates: the selection plus every installed descendant
    let mut candidates: BTreeMap<String, String> = BTreeMap::new();
    for name in selection {
        candidates.insert(name.clone(), "selected".to_string());
        let prefix = format!("{}.", name);
        for inst in installed.names() {
            if inst.starts_with(&prefix) {
                candidates
                    .entry(inst.to_string())
                    .or_insert_with(|| format!("part of {}", name));
            }
        }
    }

    // Dependency graph over everything installed
    let mut graph = DependencyGraph::new();
    for record in installed.iter() {
        graph.add_node(ComponentNode {
            name: record.name.clone(),
            version: ComponentVersion::parse(&record.version)?,
        });
    }
    for record in installed.iter() {
        for dep in record.dependency_specs() {
            graph.add_edge(DependencyEdge {
                from: record.name.clone(),
                to: dep.name,
                constraint: dep.constraint,
            });
        }
    }

    // A component can only go if every installed dependent goes with it.
    // Blocked components are kept with the dependent's name as reason.
    let mut removal: HashSet<String> = candidates.keys().cloned().collect();
    let mut kept: BTreeMap<String, String> = BTreeMap::new();
    loop {
        let mut blocked: Option<(String, String)> = None;
        let mut names: Vec<&String> = removal.iter().collect();
        names.sort();
        'outer: for name in names {
            for dependent in graph.dependents(name) {
                if !removal.contains(&dependent) {
                    blocked = Some((name.clone(), dependent));
                    break 'outer;
                }
            }
        }
        match blocked {
            Some((name, dependent)) => {
                removal.remove(&name);
                kept.insert(name, format!("required by {}", dependent));
            }
            None => break,
        }
    }

    // Dependents are unwound before the components they depend on
    let mut removal_graph = DependencyGraph::new();
    for name in &removal {
        let record = installed.get(name).expect("candidate is installed");
        removal_graph.add_node(ComponentNode {
            name: name.clone(),
            version: ComponentVersion::parse(&record.version)?,
        });
    }
    for name in &removal {
        let record = installed.get(name).expect("candidate is installed");
        for dep in record.dependency_specs() {
            if removal.contains(&dep.name) {
                removal_graph.add_edge(DependencyEdge {
                    from: name.clone(),
                    to: dep.name,
                    constraint: dep.constraint,
                });
            }
        }
    }
    let mut order = removal_graph.topological_sort()?;
    order.reverse();

    let mut components = Vec::with_capacity(order.len() + kept.len());
    for name in order {
        let record = installed.get(&name).expect("candidate is installed");
        components.push(ResolvedComponent {
            version: ComponentVersion::parse(&record.version)?,
            decision: Decision::Remove,
            reason: candidates.remove(&name).unwrap_or_else(|| "selected".to_string()),
            name,
        });
    }
    for (name, reason) in kept {
        let record = installed.get(&name).expect("candidate is installed");
        components.push(ResolvedComponent {
            version: ComponentVersion::parse(&record.version)?,
            decision: Decision::Keep,
            reason,
            name,
        });
    }

    Ok(ResolutionResult {
        action: SessionAction::Uninstall,
        components,
    })
}
