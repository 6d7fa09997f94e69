//! Universal invariants that must hold for every run.

use specsift::config::{Profile, SelectionBias, SelectionConfig};
use specsift::model::{RawChange, SelectionReason};
use specsift::source::{MemoryWorkspace, Revision};
use std::sync::Arc;

fn config() -> SelectionConfig {
    let profile = Profile::new("tests", "tests/", Arc::new(|p: &str| p.starts_with("src/")));
    SelectionConfig::new("/repo", profile)
}

fn raw(status: &str, old: Option<&str>, path: &str) -> RawChange {
    RawChange {
        status: status.to_string(),
        old_path: old.map(str::to_string),
        path: path.to_string(),
    }
}

fn workspace_with_edit() -> MemoryWorkspace {
    let mut ws = MemoryWorkspace::default();
    ws.insert(
        Revision::WorkingTree,
        "src/fixtures/types.ts",
        "export type Fixtures = { myPage: MyPage; cartPage: CartPage };",
    );
    ws.insert(
        Revision::Rev("HEAD".into()),
        "src/pages/my-page.ts",
        "export class MyPage { open() { return 1; } }",
    );
    ws.insert(
        Revision::WorkingTree,
        "src/pages/my-page.ts",
        "export class MyPage { open() { return 2; } }",
    );
    ws.insert(
        Revision::WorkingTree,
        "tests/a.spec.ts",
        "test('a', async ({ myPage }) => { await myPage.open(); });",
    );
    ws.insert(
        Revision::WorkingTree,
        "tests/b.spec.ts",
        "test('b', async ({ myPage }) => { const k = 'open'; await myPage[k](); });",
    );
    ws.insert(
        Revision::WorkingTree,
        "tests/c.spec.ts",
        "test('c', async ({ cartPage }) => { await cartPage.pay(); });",
    );
    ws.working_tree.changes = vec![raw("M", None, "src/pages/my-page.ts")];
    ws
}

#[test]
fn selected_specs_are_sorted_and_unique() {
    let ws = workspace_with_edit();
    let report = specsift::select_specs(&config(), &ws, &ws, &ws).unwrap();
    let mut sorted = report.selected_specs.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(report.selected_specs, sorted);
    assert_eq!(
        report.has_anything_to_run,
        !report.selected_specs.is_empty()
    );
}

#[test]
fn identical_inputs_produce_byte_identical_reports() {
    let ws = workspace_with_edit();
    let first = specsift::select_specs(&config(), &ws, &ws, &ws).unwrap();
    let second = specsift::select_specs(&config(), &ws, &ws, &ws).unwrap();
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn fail_open_selection_is_a_superset_of_fail_closed() {
    let ws = workspace_with_edit();
    let mut open = config();
    open.selection_bias = SelectionBias::FailOpen;
    let mut closed = config();
    closed.selection_bias = SelectionBias::FailClosed;

    let open_report = specsift::select_specs(&open, &ws, &ws, &ws).unwrap();
    let closed_report = specsift::select_specs(&closed, &ws, &ws, &ws).unwrap();
    assert!(open_report.selected_specs.len() >= closed_report.selected_specs.len());
    for spec in &closed_report.selected_specs {
        assert!(open_report.selected_specs.contains(spec));
    }
}

#[test]
fn whitespace_and_comment_only_changes_select_nothing() {
    let mut ws = workspace_with_edit();
    ws.insert(
        Revision::WorkingTree,
        "src/pages/my-page.ts",
        "export class MyPage {\n  // a note\n  open() {\n    return 1;\n  }\n}\n",
    );
    let report = specsift::select_specs(&config(), &ws, &ws, &ws).unwrap();
    assert_eq!(report.stats.semantic_changed_methods, 0);
    assert_eq!(report.stats.top_level_runtime_changed_files, 0);
    assert!(report.selected_specs.is_empty());
}

#[test]
fn type_only_changes_do_not_count_as_runtime_changes() {
    let mut ws = workspace_with_edit();
    ws.insert(
        Revision::Rev("HEAD".into()),
        "src/pages/my-page.ts",
        "import type { A } from './a';\ntype W = number;\nexport class MyPage { open() { return 1; } }",
    );
    ws.insert(
        Revision::WorkingTree,
        "src/pages/my-page.ts",
        "import type { B } from './b';\ntype W = string;\nexport class MyPage { open() { return 1; } }",
    );
    let report = specsift::select_specs(&config(), &ws, &ws, &ws).unwrap();
    assert_eq!(report.stats.top_level_runtime_changed_files, 0);
    assert_eq!(report.stats.semantic_changed_methods, 0);
}

#[test]
fn directly_changed_specs_survive_every_bias() {
    for bias in [
        SelectionBias::FailOpen,
        SelectionBias::Balanced,
        SelectionBias::FailClosed,
    ] {
        let mut ws = workspace_with_edit();
        ws.working_tree.changes = vec![raw("M", None, "tests/a.spec.ts")];
        let mut config = config();
        config.selection_bias = bias;
        let report = specsift::select_specs(&config, &ws, &ws, &ws).unwrap();
        assert_eq!(
            report.reasons["tests/a.spec.ts"],
            SelectionReason::DirectChangedSpec,
            "bias {bias:?}"
        );
    }
}

#[test]
fn import_reachable_specs_are_selected_with_the_import_reason() {
    let mut ws = MemoryWorkspace::default();
    ws.insert(
        Revision::WorkingTree,
        "src/fixtures/types.ts",
        "export type Fixtures = { myPage: MyPage };",
    );
    ws.insert(
        Revision::WorkingTree,
        "tests/helper.spec.ts",
        "import { helper } from '../src/support/helper';\ntest('h', async () => { helper(); });",
    );
    ws.insert(
        Revision::Rev("HEAD".into()),
        "src/support/helper.ts",
        "export const helper = () => 1;",
    );
    ws.insert(
        Revision::WorkingTree,
        "src/support/helper.ts",
        "export const helper = () => 2;",
    );
    ws.working_tree.changes = vec![raw("M", None, "src/support/helper.ts")];

    let report = specsift::select_specs(&config(), &ws, &ws, &ws).unwrap();
    assert_eq!(
        report.reasons["tests/helper.spec.ts"],
        SelectionReason::MatchedImportGraph
    );
    assert_eq!(report.stats.import_graph_specs, 1);
}

#[test]
fn empty_change_set_is_a_valid_empty_result() {
    let mut ws = MemoryWorkspace::default();
    ws.insert(
        Revision::WorkingTree,
        "tests/a.spec.ts",
        "test('a', async ({ myPage }) => { await myPage.open(); });",
    );
    let report = specsift::select_specs(&config(), &ws, &ws, &ws).unwrap();
    assert!(report.selected_specs.is_empty());
    assert!(!report.has_anything_to_run);
    assert_eq!(report.stats.changed_entries, 0);
}

#[test]
fn missing_repo_root_is_a_configuration_error() {
    let profile = Profile::new("tests", "tests/", Arc::new(|_: &str| true));
    let config = SelectionConfig::new("", profile);
    let ws = MemoryWorkspace::default();
    let err = specsift::select_specs(&config, &ws, &ws, &ws).unwrap_err();
    assert!(matches!(err, specsift::EngineError::Configuration(_)));
}

#[test]
fn enumeration_failure_is_fatal_and_yields_no_partial_result() {
    let ws = MemoryWorkspace {
        fail_enumeration: true,
        ..MemoryWorkspace::default()
    };
    let err = specsift::select_specs(&config(), &ws, &ws, &ws).unwrap_err();
    assert!(matches!(err, specsift::EngineError::SourceEnumeration(_)));
}

#[test]
fn warnings_never_change_selection_outside_the_fail_open_path() {
    // A malformed diff row warns but the precise selection is unaffected.
    let mut ws = workspace_with_edit();
    ws.working_tree.warnings = vec!["skipped malformed diff line".to_string()];
    let report = specsift::select_specs(&config(), &ws, &ws, &ws).unwrap();
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("malformed")));
    assert_eq!(
        report.reasons["tests/a.spec.ts"],
        SelectionReason::MatchedPrecise
    );
}
