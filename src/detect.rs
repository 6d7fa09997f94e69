//! Semantic change detection.
//!
//! Compares the base and head revisions of each relevant changed source
//! file at the syntax-tree level and classifies which class members
//! actually changed, ignoring formatting and comment noise.

use crate::analyzer::classes::{build_file_model, FileModel};
use crate::analyzer::fingerprint::FingerprintCache;
use crate::analyzer::parse::ParseService;
use crate::config::SelectionConfig;
use crate::model::{record_method, ChangeEntry, ChangeStatus, MethodsByClass};
use crate::source::{Revision, RevisionReader};
use crate::util;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct DetectorOutput {
    pub changed_methods_by_class: MethodsByClass,
    /// Files whose concatenated top-level runtime fingerprint differed.
    pub top_level_runtime_changed_files: usize,
    /// Relevant source files whose contents differed byte-wise.
    pub analyzed_files: usize,
    pub warnings: Vec<String>,
}

/// Run the detector over the normalized change set.
pub fn detect_changes(
    config: &SelectionConfig,
    entries: &[ChangeEntry],
    revisions: &dyn RevisionReader,
    parse: &mut ParseService,
    fps: &mut FingerprintCache,
) -> DetectorOutput {
    let mut out = DetectorOutput::default();
    for entry in entries {
        if !util::has_source_extension(&entry.effective_path, &config.file_extensions) {
            continue;
        }
        if !config.profile.is_relevant(&entry.effective_path) {
            continue;
        }
        diff_entry(config, entry, revisions, parse, fps, &mut out);
    }
    out
}

fn diff_entry(
    _config: &SelectionConfig,
    entry: &ChangeEntry,
    revisions: &dyn RevisionReader,
    parse: &mut ParseService,
    fps: &mut FingerprintCache,
    out: &mut DetectorOutput,
) {
    let base_revision = entry
        .base_revision
        .as_ref()
        .map(|rev| Revision::Rev(rev.clone()));
    let base_path = entry
        .old_path
        .clone()
        .unwrap_or_else(|| entry.effective_path.clone());

    let base_content = match (&entry.status, &base_revision) {
        (ChangeStatus::Added, _) | (_, None) => None,
        (_, Some(revision)) => match revisions.read(&base_path, revision) {
            Ok(content) => Some(content),
            Err(err) => {
                out.warnings
                    .push(format!("detector: read base of {base_path}: {err:#}"));
                None
            }
        },
    };
    let head_content = match entry.status {
        ChangeStatus::Deleted => None,
        _ => match revisions.read(&entry.effective_path, &Revision::WorkingTree) {
            Ok(content) => Some(content),
            Err(err) => {
                out.warnings.push(format!(
                    "detector: read head of {}: {err:#}",
                    entry.effective_path
                ));
                None
            }
        },
    };

    if base_content == head_content {
        return;
    }
    out.analyzed_files += 1;

    let base_model = model_of(
        parse,
        fps,
        &base_path,
        base_revision.as_ref(),
        base_content.as_deref(),
        &mut out.warnings,
    );
    let head_model = model_of(
        parse,
        fps,
        &entry.effective_path,
        Some(&Revision::WorkingTree),
        head_content.as_deref(),
        &mut out.warnings,
    );

    // A top-level runtime edit can change the behavior of any method in the
    // file (module state, decorators, side-effectful imports), so every
    // callable of every class in either revision is marked.
    if base_model.top_level_runtime_fp != head_model.top_level_runtime_fp {
        out.top_level_runtime_changed_files += 1;
        for model in [&base_model, &head_model] {
            for class in model.classes.values() {
                for member in class.callable_members() {
                    record_method(&mut out.changed_methods_by_class, &class.name, &member.name);
                }
            }
        }
    }

    let class_names: BTreeSet<&String> = base_model
        .classes
        .keys()
        .chain(head_model.classes.keys())
        .collect();
    for class_name in class_names {
        diff_class(&base_model, &head_model, class_name, out);
    }
}

fn diff_class(
    base_model: &FileModel,
    head_model: &FileModel,
    class_name: &str,
    out: &mut DetectorOutput,
) {
    let base = base_model.classes.get(class_name);
    let head = head_model.classes.get(class_name);

    let identities: BTreeSet<_> = base
        .map(|c| c.members.keys().cloned().collect::<Vec<_>>())
        .unwrap_or_default()
        .into_iter()
        .chain(
            head.map(|c| c.members.keys().cloned().collect::<Vec<_>>())
                .unwrap_or_default(),
        )
        .collect();

    for identity in identities {
        let base_member = base.and_then(|c| c.members.get(&identity));
        let head_member = head.and_then(|c| c.members.get(&identity));
        let base_fp = base_member.map(|m| m.fingerprint.as_str());
        let head_fp = head_member.map(|m| m.fingerprint.as_str());
        if base_fp == head_fp {
            continue;
        }
        let callable = base_member.is_some_and(|m| m.callable)
            || head_member.is_some_and(|m| m.callable);
        if callable {
            record_method(&mut out.changed_methods_by_class, class_name, &identity.name);
        } else {
            // A plain data field: its value is reachable from any method via
            // `this`, so every callable of the class is marked.
            for class in [base, head].into_iter().flatten() {
                for member in class.callable_members() {
                    record_method(&mut out.changed_methods_by_class, class_name, &member.name);
                }
            }
        }
    }
}

fn model_of(
    parse: &mut ParseService,
    fps: &mut FingerprintCache,
    path: &str,
    revision: Option<&Revision>,
    content: Option<&str>,
    warnings: &mut Vec<String>,
) -> FileModel {
    let (Some(revision), Some(content)) = (revision, content) else {
        return FileModel::default();
    };
    match parse.parse_content(path, revision, content) {
        Some(parsed) => build_file_model(&parsed, revision, fps),
        None => {
            warnings.push(format!("detector: could not parse {path}"));
            FileModel::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use crate::model::{method_pair_count, ChangeOrigin};
    use crate::source::MemoryWorkspace;
    use std::sync::Arc;

    fn config() -> SelectionConfig {
        let profile = Profile::new("tests", "tests/", Arc::new(|p: &str| p.starts_with("src/")));
        let mut config = SelectionConfig::new("/repo", profile);
        config.validate().unwrap();
        config
    }

    fn entry(status: ChangeStatus, old: Option<&str>, path: &str) -> ChangeEntry {
        ChangeEntry {
            status,
            old_path: old.map(str::to_string),
            new_path: Some(path.to_string()),
            effective_path: path.to_string(),
            raw_status: status.as_letter().to_string(),
            base_revision: match status {
                ChangeStatus::Added => None,
                _ => Some("HEAD".to_string()),
            },
            origin: ChangeOrigin::WorkingTree,
        }
    }

    fn detect(ws: &MemoryWorkspace, entries: &[ChangeEntry]) -> DetectorOutput {
        let mut parse = ParseService::new().unwrap();
        let mut fps = FingerprintCache::default();
        detect_changes(&config(), entries, ws, &mut parse, &mut fps)
    }

    #[test]
    fn body_edit_is_detected_per_member() {
        let mut ws = MemoryWorkspace::default();
        ws.insert(
            Revision::Rev("HEAD".into()),
            "src/page.ts",
            "export class Page { open() { return 1; } close() { return 2; } }",
        );
        ws.insert(
            Revision::WorkingTree,
            "src/page.ts",
            "export class Page { open() { return 99; } close() { return 2; } }",
        );
        let out = detect(&ws, &[entry(ChangeStatus::Modified, None, "src/page.ts")]);
        assert_eq!(out.changed_methods_by_class["Page"], BTreeSet::from(["open".to_string()]));
        assert_eq!(out.top_level_runtime_changed_files, 0);
    }

    #[test]
    fn whitespace_and_comment_noise_is_ignored() {
        let mut ws = MemoryWorkspace::default();
        ws.insert(
            Revision::Rev("HEAD".into()),
            "src/page.ts",
            "export class Page { open() { return 1; } }",
        );
        ws.insert(
            Revision::WorkingTree,
            "src/page.ts",
            "export class Page {\n  // a note\n  open() {\n    return 1;\n  }\n}\n",
        );
        let out = detect(&ws, &[entry(ChangeStatus::Modified, None, "src/page.ts")]);
        assert_eq!(method_pair_count(&out.changed_methods_by_class), 0);
        assert_eq!(out.top_level_runtime_changed_files, 0);
        assert_eq!(out.analyzed_files, 1);
    }

    #[test]
    fn type_only_changes_do_not_mark_runtime() {
        let mut ws = MemoryWorkspace::default();
        ws.insert(
            Revision::Rev("HEAD".into()),
            "src/page.ts",
            "import type { A } from './a';\ninterface I { x: number }\nexport class Page { open() { return 1; } }",
        );
        ws.insert(
            Revision::WorkingTree,
            "src/page.ts",
            "import type { B } from './b';\ninterface I { y: string }\nexport class Page { open() { return 1; } }",
        );
        let out = detect(&ws, &[entry(ChangeStatus::Modified, None, "src/page.ts")]);
        assert_eq!(out.top_level_runtime_changed_files, 0);
        assert_eq!(method_pair_count(&out.changed_methods_by_class), 0);
    }

    #[test]
    fn runtime_statement_change_marks_every_callable() {
        let mut ws = MemoryWorkspace::default();
        ws.insert(
            Revision::Rev("HEAD".into()),
            "src/page.ts",
            "const TIMEOUT = 5;\nexport class Page { open() { return TIMEOUT; } close() {} }",
        );
        ws.insert(
            Revision::WorkingTree,
            "src/page.ts",
            "const TIMEOUT = 50;\nexport class Page { open() { return TIMEOUT; } close() {} }",
        );
        let out = detect(&ws, &[entry(ChangeStatus::Modified, None, "src/page.ts")]);
        assert_eq!(out.top_level_runtime_changed_files, 1);
        assert_eq!(
            out.changed_methods_by_class["Page"],
            BTreeSet::from(["open".to_string(), "close".to_string()])
        );
    }

    #[test]
    fn field_change_marks_every_callable_of_the_class() {
        let mut ws = MemoryWorkspace::default();
        ws.insert(
            Revision::Rev("HEAD".into()),
            "src/page.ts",
            "export class Page { selector = '#a'; open() {} close() {} }",
        );
        ws.insert(
            Revision::WorkingTree,
            "src/page.ts",
            "export class Page { selector = '#b'; open() {} close() {} }",
        );
        let out = detect(&ws, &[entry(ChangeStatus::Modified, None, "src/page.ts")]);
        assert_eq!(
            out.changed_methods_by_class["Page"],
            BTreeSet::from(["open".to_string(), "close".to_string()])
        );
    }

    #[test]
    fn member_rename_records_both_names() {
        let mut ws = MemoryWorkspace::default();
        ws.insert(
            Revision::Rev("HEAD".into()),
            "src/page.ts",
            "export class Page { open() { return 1; } }",
        );
        ws.insert(
            Revision::WorkingTree,
            "src/page.ts",
            "export class Page { openFast() { return 1; } }",
        );
        let out = detect(&ws, &[entry(ChangeStatus::Modified, None, "src/page.ts")]);
        assert_eq!(
            out.changed_methods_by_class["Page"],
            BTreeSet::from(["open".to_string(), "openFast".to_string()])
        );
    }

    #[test]
    fn rename_only_file_with_identical_content_is_skipped() {
        let content = "export class Page { open() { return 1; } }";
        let mut ws = MemoryWorkspace::default();
        ws.insert(Revision::Rev("HEAD".into()), "src/old.ts", content);
        ws.insert(Revision::WorkingTree, "src/new.ts", content);
        let out = detect(
            &ws,
            &[entry(ChangeStatus::Renamed, Some("src/old.ts"), "src/new.ts")],
        );
        assert_eq!(out.analyzed_files, 0);
        assert_eq!(method_pair_count(&out.changed_methods_by_class), 0);
    }

    #[test]
    fn getter_and_setter_diff_separately() {
        let mut ws = MemoryWorkspace::default();
        ws.insert(
            Revision::Rev("HEAD".into()),
            "src/page.ts",
            "class Page { get title() { return 1; } set title(v) { this.v = v; } }",
        );
        ws.insert(
            Revision::WorkingTree,
            "src/page.ts",
            "class Page { get title() { return 2; } set title(v) { this.v = v; } }",
        );
        let out = detect(&ws, &[entry(ChangeStatus::Modified, None, "src/page.ts")]);
        // One identity changed, but both share the name.
        assert_eq!(
            out.changed_methods_by_class["Page"],
            BTreeSet::from(["title".to_string()])
        );
    }

    #[test]
    fn irrelevant_paths_are_skipped() {
        let mut ws = MemoryWorkspace::default();
        ws.insert(Revision::Rev("HEAD".into()), "docs/page.ts", "class A { m() {1} }");
        ws.insert(Revision::WorkingTree, "docs/page.ts", "class A { m() {2} }");
        let out = detect(&ws, &[entry(ChangeStatus::Modified, None, "docs/page.ts")]);
        assert_eq!(out.analyzed_files, 0);
    }
}
