// tests/common/mod.rs

//! Shared fixtures for integration tests.
//!
//! `build_repo` materializes a repository directory (components.json,
//! payload trees or archives, hook scripts) from `ComponentSpec`s, and
//! `TestEnv` wires an engine to a temp target root.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use keystone::config::EngineConfig;
use keystone::resolver::SessionAction;
use keystone::session::{Engine, SessionOptions, SessionReport};
use serde_json::json;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Declarative description of one repository component.
#[derive(Clone)]
pub struct ComponentSpec {
    pub name: String,
    pub version: String,
    pub deps: Vec<String>,
    /// (payload-relative path, content)
    pub files: Vec<(String, String)>,
    /// (script body, optional undo script body)
    pub script: Option<(String, Option<String>)>,
    pub forced: bool,
    pub is_virtual: bool,
    pub default: bool,
    /// Package the payload as a .tar.gz archive instead of a plain tree.
    pub archive: bool,
}

impl ComponentSpec {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            deps: Vec::new(),
            files: Vec::new(),
            script: None,
            forced: false,
            is_virtual: false,
            default: true,
            archive: false,
        }
    }

    /// Component with the conventional scenario payload: a stable
    /// `installcontent<tag>.txt` plus a versioned `<name>/<version>content.txt`.
    pub fn with_standard_payload(name: &str, version: &str, tag: &str) -> Self {
        Self::new(name, version)
            .file(
                &format!("installcontent{}.txt", tag),
                &format!("{} {}", name, version),
            )
            .file(
                &format!("{}/{}content.txt", name, version),
                &format!("content of {} {}", name, version),
            )
    }

    pub fn dep(mut self, spec: &str) -> Self {
        self.deps.push(spec.to_string());
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }

    pub fn script(mut self, body: &str, undo: Option<&str>) -> Self {
        self.script = Some((body.to_string(), undo.map(String::from)));
        self
    }

    pub fn forced(mut self) -> Self {
        self.forced = true;
        self
    }

    pub fn virtual_component(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    pub fn non_default(mut self) -> Self {
        self.default = false;
        self
    }

    pub fn as_archive(mut self) -> Self {
        self.archive = true;
        self
    }
}

/// Write a repository directory from component specs.
pub fn build_repo(dir: &Path, specs: &[ComponentSpec]) {
    fs::create_dir_all(dir).unwrap();
    let mut descriptors = Vec::new();

    for spec in specs {
        let payload = if spec.files.is_empty() {
            None
        } else if spec.archive {
            let rel = format!("payloads/{}-{}.tar.gz", spec.name, spec.version);
            write_archive_payload(&dir.join(&rel), &spec.files);
            Some(rel)
        } else {
            let rel = format!("payloads/{}/{}", spec.name, spec.version);
            write_tree_payload(&dir.join(&rel), &spec.files);
            Some(rel)
        };

        let scripts = match &spec.script {
            None => Vec::new(),
            Some((body, undo)) => {
                let run_rel = format!("scripts/{}-{}.sh", spec.name, spec.version);
                write_script(&dir.join(&run_rel), body);
                let undo_rel = undo.as_ref().map(|undo_body| {
                    let rel = format!("scripts/{}-{}-undo.sh", spec.name, spec.version);
                    write_script(&dir.join(&rel), undo_body);
                    rel
                });
                vec![json!({ "run": run_rel, "undo": undo_rel })]
            }
        };

        descriptors.push(json!({
            "name": spec.name,
            "version": spec.version,
            "size": spec.files.iter().map(|(_, c)| c.len() as u64).sum::<u64>(),
            "dependencies": spec.deps,
            "scripts": scripts,
            "forced": spec.forced,
            "virtual": spec.is_virtual,
            "default": spec.default,
            "payload": payload,
        }));
    }

    fs::write(
        dir.join("components.json"),
        serde_json::to_string_pretty(&descriptors).unwrap(),
    )
    .unwrap();
}

fn write_tree_payload(dir: &Path, files: &[(String, String)]) {
    for (rel, content) in files {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
}

fn write_archive_payload(path: &Path, files: &[(String, String)]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = File::create(path).unwrap();
    let enc = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(enc);

    for (rel, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, rel.as_str(), content.as_bytes())
            .unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap();
}

fn write_script(path: &Path, body: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
}

/// A target root plus repositories under one temp directory.
pub struct TestEnv {
    pub dir: TempDir,
    pub root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        Self { dir, root }
    }

    /// Build a named repository under the env's temp dir.
    pub fn repo(&self, name: &str, specs: &[ComponentSpec]) -> PathBuf {
        let dir = self.dir.path().join(name);
        build_repo(&dir, specs);
        dir
    }

    /// Engine wired to this env's root and the given repository.
    pub fn engine(&self, repo: Option<&Path>) -> Engine {
        let config = EngineConfig::new(self.root.clone())
            .with_repository(repo.map(Path::to_path_buf));
        Engine::new(config).unwrap()
    }

    pub fn run(
        &self,
        repo: Option<&Path>,
        action: SessionAction,
        selection: &[&str],
    ) -> keystone::Result<SessionReport> {
        let selection: Vec<String> = selection.iter().map(|s| s.to_string()).collect();
        self.engine(repo)
            .run(action, &selection, &SessionOptions::new())
    }

    pub fn install(&self, repo: &Path, selection: &[&str]) -> SessionReport {
        self.run(Some(repo), SessionAction::Install, selection)
            .unwrap()
    }

    pub fn update(&self, repo: &Path, selection: &[&str]) -> SessionReport {
        self.run(Some(repo), SessionAction::Update, selection)
            .unwrap()
    }

    pub fn uninstall(&self, selection: &[&str]) -> SessionReport {
        self.run(None, SessionAction::Uninstall, selection).unwrap()
    }

    pub fn installed_version(&self, name: &str) -> Option<String> {
        self.engine(None)
            .installed_state()
            .unwrap()
            .get(name)
            .map(|r| r.version.clone())
    }

    pub fn assert_file(&self, rel: &str, content: &str) {
        let path = self.root.join(rel);
        assert!(path.is_file(), "expected file {} to exist", rel);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            content,
            "unexpected content in {}",
            rel
        );
    }

    pub fn assert_no_file(&self, rel: &str) {
        assert!(
            !self.root.join(rel).exists(),
            "expected file {} to be absent",
            rel
        );
    }

    /// Names of archived session journals, oldest first.
    pub fn archived_journals(&self) -> Vec<String> {
        let archive = self.root.join(".keystone/journal/archive");
        if !archive.exists() {
            return Vec::new();
        }
        let mut names: Vec<String> = fs::read_dir(archive)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }
}
