// tests/uninstall.rs

//! Uninstall session integration tests: inverse replay from persisted
//! records, reverse-dependency protection, and hierarchy cascades.

mod common;

use common::{ComponentSpec, TestEnv};
use keystone::resolver::SessionAction;

#[test]
fn uninstall_removes_files_and_record() {
    let env = TestEnv::new();
    let repo = env.repo(
        "repo",
        &[ComponentSpec::with_standard_payload("componentA", "1.0.0", "A")],
    );
    env.install(&repo, &["componentA"]);
    env.assert_file("installcontentA.txt", "componentA 1.0.0");

    // No repository needed: the plan comes from the persisted record
    env.uninstall(&["componentA"]);

    env.assert_no_file("installcontentA.txt");
    env.assert_no_file("componentA/1.0.0content.txt");
    assert!(!env.root.join("componentA").exists());
    assert_eq!(env.installed_version("componentA"), None);
}

#[test]
fn uninstall_required_component_is_kept() {
    let env = TestEnv::new();
    let repo = env.repo(
        "repo",
        &[
            ComponentSpec::with_standard_payload("componentA", "1.0.0", "A")
                .dep("componentB"),
            ComponentSpec::with_standard_payload("componentB", "1.0.0", "B"),
        ],
    );
    env.install(&repo, &["componentA"]);

    // componentB is still required by componentA: kept, nothing removed
    let report = env.uninstall(&["componentB"]);
    assert!(report.session_uuid.is_none());
    assert_eq!(env.installed_version("componentB").as_deref(), Some("1.0.0"));
    env.assert_file("installcontentB.txt", "componentB 1.0.0");

    let kept = report.resolution.lookup("componentB").unwrap();
    assert!(kept.reason.contains("required by componentA"));
}

#[test]
fn uninstall_with_dependent_included_removes_both() {
    let env = TestEnv::new();
    let repo = env.repo(
        "repo",
        &[
            ComponentSpec::with_standard_payload("componentA", "1.0.0", "A")
                .dep("componentB"),
            ComponentSpec::with_standard_payload("componentB", "1.0.0", "B"),
        ],
    );
    env.install(&repo, &["componentA"]);

    env.uninstall(&["componentA", "componentB"]);
    assert_eq!(env.installed_version("componentA"), None);
    assert_eq!(env.installed_version("componentB"), None);
    env.assert_no_file("installcontentA.txt");
    env.assert_no_file("installcontentB.txt");
}

#[test]
fn uninstall_cascades_to_descendants() {
    let env = TestEnv::new();
    let repo = env.repo(
        "repo",
        &[
            ComponentSpec::with_standard_payload("componentF", "1.0.0", "F"),
            ComponentSpec::with_standard_payload("componentF.subcomponent1", "1.0.0", "F1"),
            ComponentSpec::with_standard_payload(
                "componentF.subcomponent1.subsubcomponent1",
                "1.0.0",
                "F11",
            ),
            ComponentSpec::with_standard_payload("componentG", "1.0.0", "G"),
        ],
    );
    env.install(&repo, &["componentF", "componentG"]);

    env.uninstall(&["componentF"]);

    assert_eq!(env.installed_version("componentF"), None);
    assert_eq!(env.installed_version("componentF.subcomponent1"), None);
    assert_eq!(
        env.installed_version("componentF.subcomponent1.subsubcomponent1"),
        None
    );
    // Unrelated component survives
    assert_eq!(env.installed_version("componentG").as_deref(), Some("1.0.0"));
    env.assert_file("installcontentG.txt", "componentG 1.0.0");
}

#[test]
fn uninstall_runs_undo_script() {
    let env = TestEnv::new();
    let repo = env.repo(
        "repo",
        &[ComponentSpec::with_standard_payload("componentA", "1.0.0", "A").script(
            "echo configured > \"$KEYSTONE_ROOT/hook-output.txt\"",
            Some("rm -f \"$KEYSTONE_ROOT/hook-output.txt\""),
        )],
    );
    env.install(&repo, &["componentA"]);
    env.assert_file("hook-output.txt", "configured\n");

    // The undo script lives in the repository, so pass it along
    let report = env
        .run(Some(&repo), SessionAction::Uninstall, &["componentA"])
        .unwrap();
    assert!(report.session_uuid.is_some());
    env.assert_no_file("hook-output.txt");
}

#[test]
fn uninstall_without_repository_skips_irreversible_hook() {
    let env = TestEnv::new();
    let repo = env.repo(
        "repo",
        &[ComponentSpec::with_standard_payload("componentA", "1.0.0", "A")
            .script("echo ran > \"$KEYSTONE_ROOT/hook-output.txt\"", None)],
    );
    env.install(&repo, &["componentA"]);

    // No undo script declared: uninstall proceeds, warns, leaves the
    // hook's side effect behind
    env.uninstall(&["componentA"]);
    assert_eq!(env.installed_version("componentA"), None);
    env.assert_file("hook-output.txt", "ran\n");
}

#[test]
fn uninstall_not_installed_fails() {
    let env = TestEnv::new();
    let err = env
        .run(None, SessionAction::Uninstall, &["ghost"])
        .unwrap_err();
    assert!(matches!(err, keystone::Error::UnknownComponent(_)));
}
