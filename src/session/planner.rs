// src/session/planner.rs

//! Operation planning.
//!
//! `plan` diffs the resolved target set against the installed state and
//! produces the ordered step list the executor will run. Planning is pure
//! data transformation: it reads only its arguments (payload manifests are
//! gathered by the caller) and is deterministic, so a plan can be previewed
//! or replayed from the journal byte-for-byte.
//!
//! Per-component install order is fixed: directories, files, scripts,
//! register. Updates first remove superseded files, then run the new
//! version's install sequence whose registration atomically replaces the
//! old record - there is never a window where neither version is
//! registered. Removals reverse the originally persisted operations in
//! strict reverse order.

use crate::error::{Error, Result};
use crate::extract::PayloadEntry;
use crate::model::{Component, ComponentModel};
use crate::operation::{OpContext, Operation};
use crate::resolver::{Decision, ResolutionResult};
use crate::store::{ComponentRecord, InstalledState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Whether a step runs an operation's apply or its inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Reverse,
}

/// One executable step of a session plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub component: String,
    pub direction: Direction,
    pub operation: Operation,
}

impl PlannedStep {
    fn forward(component: &str, operation: Operation) -> Self {
        Self {
            component: component.to_string(),
            direction: Direction::Forward,
            operation,
        }
    }

    fn reverse(component: &str, operation: Operation) -> Self {
        Self {
            component: component.to_string(),
            direction: Direction::Reverse,
            operation,
        }
    }

    /// Human label for progress and diagnostics.
    pub fn describe(&self) -> String {
        match self.direction {
            Direction::Forward => self.operation.describe(),
            Direction::Reverse => format!("undo {}", self.operation.describe()),
        }
    }

    /// Execute the step's side effect.
    pub fn execute(&self, ctx: &mut OpContext) -> Result<()> {
        match self.direction {
            Direction::Forward => self.operation.apply(ctx),
            Direction::Reverse => self.operation.invert(ctx),
        }
    }

    /// Undo the step's side effect during rollback.
    pub fn rollback(&self, ctx: &mut OpContext) -> Result<()> {
        match self.direction {
            Direction::Forward => self.operation.invert(ctx),
            Direction::Reverse => self.operation.apply(ctx),
        }
    }
}

/// Payload manifests per component identity, gathered by the caller before
/// planning so planning itself stays filesystem-free.
pub type Manifests = HashMap<String, Vec<PayloadEntry>>;

/// Produce the ordered step list for a resolution. The model is only
/// required when the resolution installs or updates something.
pub fn plan(
    resolution: &ResolutionResult,
    installed: &InstalledState,
    model: Option<&ComponentModel>,
    manifests: &Manifests,
) -> Result<Vec<PlannedStep>> {
    let mut steps = Vec::new();

    for entry in &resolution.components {
        match &entry.decision {
            Decision::Keep => {}

            Decision::Install => {
                let component = find_component(model, &entry.name, entry.version.as_str())?;
                let manifest = manifests.get(&entry.name).map(Vec::as_slice).unwrap_or(&[]);
                plan_install(&mut steps, component, manifest, None);
            }

            Decision::Update { .. } => {
                let component = find_component(model, &entry.name, entry.version.as_str())?;
                let manifest = manifests.get(&entry.name).map(Vec::as_slice).unwrap_or(&[]);
                let previous = installed.get(&entry.name).ok_or_else(|| {
                    Error::UnknownComponent(format!(
                        "'{}' resolved as update but is not installed",
                        entry.name
                    ))
                })?;

                // Superseded files go first: present in the old version,
                // absent from the new
                let new_paths: BTreeSet<&str> =
                    manifest.iter().map(|e| e.path.as_str()).collect();
                for old_target in previous
                    .operations
                    .iter()
                    .filter_map(Operation::copy_target)
                {
                    if !new_paths.contains(old_target) {
                        steps.push(PlannedStep::forward(
                            &entry.name,
                            Operation::DeleteFile {
                                path: old_target.to_string(),
                            },
                        ));
                    }
                }

                plan_install(&mut steps, component, manifest, Some(previous.clone()));
            }

            Decision::Remove => {
                let record = installed.get(&entry.name).ok_or_else(|| {
                    Error::UnknownComponent(format!(
                        "'{}' resolved for removal but is not installed",
                        entry.name
                    ))
                })?;
                plan_remove(&mut steps, record);
            }
        }
    }

    Ok(steps)
}

fn find_component<'a>(
    model: Option<&'a ComponentModel>,
    name: &str,
    version: &str,
) -> Result<&'a Component> {
    let model = model.ok_or_else(|| {
        Error::MalformedDescriptor(format!(
            "no repository model available to plan '{}'",
            name
        ))
    })?;
    model
        .versions(name)
        .iter()
        .find(|c| c.version.as_str() == version)
        .ok_or_else(|| Error::UnknownComponent(format!("{} {}", name, version)))
}

/// Emit the install sequence for one component: directories, files,
/// scripts, register.
fn plan_install(
    steps: &mut Vec<PlannedStep>,
    component: &Component,
    manifest: &[PayloadEntry],
    previous: Option<ComponentRecord>,
) {
    let mut operations = Vec::new();

    // Parent directories, shallowest first
    let mut dirs: BTreeSet<String> = BTreeSet::new();
    for entry in manifest {
        let mut current = entry.path.as_str();
        while let Some(idx) = current.rfind('/') {
            current = &current[..idx];
            dirs.insert(current.to_string());
        }
    }
    for dir in dirs {
        operations.push(Operation::CreateDirectory { path: dir });
    }

    for entry in manifest {
        operations.push(Operation::CopyFile {
            component: component.name.clone(),
            source: entry.path.clone(),
            target: entry.path.clone(),
            sha256: entry.sha256.clone(),
            size: entry.size,
        });
    }

    for hook in &component.scripts {
        operations.push(Operation::RunScript {
            component: component.name.clone(),
            version: component.version.to_string(),
            script: hook.run.clone(),
            undo: hook.undo.clone(),
        });
    }

    if operations.is_empty() {
        // Payload-less components still get a journal presence
        operations.push(Operation::Minimal {
            label: format!("install {} {}", component.name, component.version),
        });
    }

    let record = ComponentRecord {
        name: component.name.clone(),
        version: component.version.to_string(),
        size: component.size,
        dependencies: component.dependencies.iter().map(|d| d.to_string()).collect(),
        operations: operations.clone(),
    };

    for op in operations {
        steps.push(PlannedStep::forward(&component.name, op));
    }
    steps.push(PlannedStep::forward(
        &component.name,
        Operation::RegisterUninstall { record, previous },
    ));
}

/// Emit the inverse of a component's persisted install sequence, in strict
/// reverse order, ending with the stored operations and starting with the
/// registration (which was the last thing applied).
fn plan_remove(steps: &mut Vec<PlannedStep>, record: &ComponentRecord) {
    steps.push(PlannedStep::reverse(
        &record.name,
        Operation::RegisterUninstall {
            record: record.clone(),
            previous: None,
        },
    ));
    for op in record.operations.iter().rev() {
        steps.push(PlannedStep::reverse(&record.name, op.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ComponentDescriptor;
    use crate::resolver::{resolve, SessionAction};

    fn entry(path: &str, content: &str) -> PayloadEntry {
        PayloadEntry {
            path: path.to_string(),
            size: content.len() as u64,
            sha256: crate::hash::sha256_bytes(content.as_bytes()),
        }
    }

    fn descriptor(name: &str, version: &str) -> ComponentDescriptor {
        ComponentDescriptor {
            name: name.to_string(),
            version: version.to_string(),
            size: 0,
            dependencies: vec![],
            scripts: vec![],
            forced: false,
            is_virtual: false,
            checkable: true,
            default: true,
            payload: Some(format!("{}/{}", name, version)),
        }
    }

    fn kinds(steps: &[PlannedStep]) -> Vec<String> {
        steps
            .iter()
            .map(|s| {
                let kind = match &s.operation {
                    Operation::CreateDirectory { .. } => "mkdir",
                    Operation::CopyFile { .. } => "copy",
                    Operation::DeleteFile { .. } => "delete",
                    Operation::RunScript { .. } => "script",
                    Operation::RegisterUninstall { .. } => "register",
                    Operation::Minimal { .. } => "minimal",
                    Operation::Compound { .. } => "compound",
                };
                match s.direction {
                    Direction::Forward => kind.to_string(),
                    Direction::Reverse => format!("undo-{}", kind),
                }
            })
            .collect()
    }

    #[test]
    fn test_install_plan_order() {
        let mut d = descriptor("componentA", "1.0.0");
        d.scripts = vec![crate::model::ScriptHook {
            run: "scripts/a.sh".to_string(),
            undo: None,
        }];
        let model = ComponentModel::load(vec![d]).unwrap();
        let installed = InstalledState::default();
        let resolution = resolve(
            &model,
            &installed,
            &["componentA".to_string()],
            SessionAction::Install,
        )
        .unwrap();

        let mut manifests = Manifests::new();
        manifests.insert(
            "componentA".to_string(),
            vec![entry("docs/readme.txt", "hello"), entry("installcontentA.txt", "A")],
        );

        let steps = plan(&resolution, &installed, Some(&model), &manifests).unwrap();
        assert_eq!(
            kinds(&steps),
            vec!["mkdir", "copy", "copy", "script", "register"]
        );
    }

    #[test]
    fn test_install_plan_nested_dirs_shallowest_first() {
        let model = ComponentModel::load(vec![descriptor("componentA", "1.0.0")]).unwrap();
        let installed = InstalledState::default();
        let resolution = resolve(
            &model,
            &installed,
            &["componentA".to_string()],
            SessionAction::Install,
        )
        .unwrap();

        let mut manifests = Manifests::new();
        manifests.insert(
            "componentA".to_string(),
            vec![entry("a/b/c/file.txt", "deep")],
        );

        let steps = plan(&resolution, &installed, Some(&model), &manifests).unwrap();
        let dirs: Vec<&str> = steps
            .iter()
            .filter_map(|s| match &s.operation {
                Operation::CreateDirectory { path } => Some(path.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(dirs, vec!["a", "a/b", "a/b/c"]);
    }

    #[test]
    fn test_register_record_excludes_itself() {
        let model = ComponentModel::load(vec![descriptor("componentA", "1.0.0")]).unwrap();
        let installed = InstalledState::default();
        let resolution = resolve(
            &model,
            &installed,
            &["componentA".to_string()],
            SessionAction::Install,
        )
        .unwrap();

        let mut manifests = Manifests::new();
        manifests.insert("componentA".to_string(), vec![entry("a.txt", "A")]);

        let steps = plan(&resolution, &installed, Some(&model), &manifests).unwrap();
        let record = steps
            .iter()
            .find_map(|s| match &s.operation {
                Operation::RegisterUninstall { record, .. } => Some(record),
                _ => None,
            })
            .unwrap();
        assert!(record
            .operations
            .iter()
            .all(|op| !matches!(op, Operation::RegisterUninstall { .. })));
    }

    #[test]
    fn test_update_plan_removes_superseded_first() {
        let model = ComponentModel::load(vec![descriptor("componentA", "2.0.0")]).unwrap();

        let mut old = ComponentRecord::new("componentA", "1.0.0");
        old.operations = vec![
            Operation::CopyFile {
                component: "componentA".to_string(),
                source: "1.0.0content.txt".to_string(),
                target: "1.0.0content.txt".to_string(),
                sha256: "aa".to_string(),
                size: 1,
            },
            Operation::CopyFile {
                component: "componentA".to_string(),
                source: "shared.txt".to_string(),
                target: "shared.txt".to_string(),
                sha256: "bb".to_string(),
                size: 1,
            },
        ];
        let installed = InstalledState::from_records(vec![old]);

        let resolution = resolve(
            &model,
            &installed,
            &["componentA".to_string()],
            SessionAction::Update,
        )
        .unwrap();

        let mut manifests = Manifests::new();
        manifests.insert(
            "componentA".to_string(),
            vec![entry("2.0.0content.txt", "new"), entry("shared.txt", "same")],
        );

        let steps = plan(&resolution, &installed, Some(&model), &manifests).unwrap();
        assert_eq!(
            kinds(&steps),
            vec!["delete", "copy", "copy", "register"]
        );

        // Only the superseded file is deleted; the shared one is overwritten
        match &steps[0].operation {
            Operation::DeleteFile { path } => assert_eq!(path, "1.0.0content.txt"),
            other => panic!("expected DeleteFile, got {:?}", other),
        }

        // The registration replaces the 1.0.0 record and can restore it
        match &steps[3].operation {
            Operation::RegisterUninstall { record, previous } => {
                assert_eq!(record.version, "2.0.0");
                assert_eq!(previous.as_ref().unwrap().version, "1.0.0");
            }
            other => panic!("expected RegisterUninstall, got {:?}", other),
        }
    }

    #[test]
    fn test_remove_plan_is_strict_reverse() {
        let mut record = ComponentRecord::new("componentA", "1.0.0");
        record.operations = vec![
            Operation::CreateDirectory {
                path: "docs".to_string(),
            },
            Operation::CopyFile {
                component: "componentA".to_string(),
                source: "docs/a.txt".to_string(),
                target: "docs/a.txt".to_string(),
                sha256: "aa".to_string(),
                size: 1,
            },
            Operation::RunScript {
                component: "componentA".to_string(),
                version: "1.0.0".to_string(),
                script: "scripts/a.sh".to_string(),
                undo: Some("scripts/a_undo.sh".to_string()),
            },
        ];
        let installed = InstalledState::from_records(vec![record]);
        let model = ComponentModel::load(vec![]).unwrap();

        let resolution = resolve(
            &model,
            &installed,
            &["componentA".to_string()],
            SessionAction::Uninstall,
        )
        .unwrap();

        let steps = plan(&resolution, &installed, None, &Manifests::new()).unwrap();
        assert_eq!(
            kinds(&steps),
            vec!["undo-register", "undo-script", "undo-copy", "undo-mkdir"]
        );
    }

    #[test]
    fn test_keep_produces_no_steps() {
        let model = ComponentModel::load(vec![descriptor("componentA", "1.0.0")]).unwrap();
        let installed =
            InstalledState::from_records(vec![ComponentRecord::new("componentA", "1.0.0")]);
        let resolution = resolve(
            &model,
            &installed,
            &["componentA".to_string()],
            SessionAction::Install,
        )
        .unwrap();

        let steps = plan(&resolution, &installed, Some(&model), &Manifests::new()).unwrap();
        assert!(steps.is_empty());
    }

    #[test]
    fn test_payloadless_component_gets_minimal_step() {
        let mut d = descriptor("componentV", "1.0.0");
        d.payload = None;
        let model = ComponentModel::load(vec![d]).unwrap();
        let installed = InstalledState::default();
        let resolution = resolve(
            &model,
            &installed,
            &["componentV".to_string()],
            SessionAction::Install,
        )
        .unwrap();

        let steps = plan(&resolution, &installed, Some(&model), &Manifests::new()).unwrap();
        assert_eq!(kinds(&steps), vec!["minimal", "register"]);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let model = ComponentModel::load(vec![descriptor("componentA", "1.0.0")]).unwrap();
        let installed = InstalledState::default();
        let resolution = resolve(
            &model,
            &installed,
            &["componentA".to_string()],
            SessionAction::Install,
        )
        .unwrap();

        let mut manifests = Manifests::new();
        manifests.insert(
            "componentA".to_string(),
            vec![entry("b.txt", "b"), entry("a.txt", "a")],
        );

        let first = plan(&resolution, &installed, Some(&model), &manifests).unwrap();
        let second = plan(&resolution, &installed, Some(&model), &manifests).unwrap();
        assert_eq!(first, second);
    }
}
