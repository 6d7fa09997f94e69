//! Global-watch evaluation.
//!
//! Certain files (runner config, fixture plumbing) invalidate every spec
//! when touched. A change forces a full run when it matches a watch pattern
//! directly, or when it is reachable from a pattern-matched file through the
//! import closure.

use crate::analyzer::imports::{extract_module_refs, ImportResolver};
use crate::analyzer::parse::{LoadOutcome, ParseService};
use crate::config::{GlobalWatchMode, SelectionConfig};
use crate::source::{Revision, RevisionReader};
use crate::util;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::{BTreeSet, VecDeque};

#[derive(Debug, Default)]
pub struct GlobalWatchOutcome {
    pub forced_all: bool,
    /// Changed paths matching a watch pattern directly.
    pub matched_paths: Vec<String>,
    /// Changed paths reached through the import closure of pattern-matched
    /// files.
    pub resolved_files: Vec<String>,
    pub warnings: Vec<String>,
}

/// Compile the watch patterns. `*` stays within one path segment; `**`
/// crosses segments.
fn build_glob_set(patterns: &[String], warnings: &mut Vec<String>) -> Option<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    let mut any = false;
    for pattern in patterns {
        match GlobBuilder::new(pattern).literal_separator(true).build() {
            Ok(glob) => {
                builder.add(glob);
                any = true;
            }
            Err(err) => warnings.push(format!("global watch: invalid pattern {pattern:?}: {err}")),
        }
    }
    if !any {
        return None;
    }
    match builder.build() {
        Ok(set) => Some(set),
        Err(err) => {
            warnings.push(format!("global watch: could not build pattern set: {err}"));
            None
        }
    }
}

/// Evaluate global watch against the change set.
pub fn evaluate_global_watch(
    config: &SelectionConfig,
    revisions: &dyn RevisionReader,
    parse: &mut ParseService,
    resolver: &ImportResolver,
    repo_files: &[String],
    changed_paths: &BTreeSet<String>,
) -> GlobalWatchOutcome {
    let mut outcome = GlobalWatchOutcome::default();
    if config.profile.global_watch_mode == GlobalWatchMode::Disabled {
        return outcome;
    }
    let Some(globs) = build_glob_set(&config.profile.global_watch_patterns, &mut outcome.warnings)
    else {
        return outcome;
    };

    // Direct matches: changed paths themselves (a deleted config file still
    // forces a full run even though it is gone from the tree).
    outcome.matched_paths = changed_paths
        .iter()
        .filter(|path| globs.is_match(path.as_str()))
        .cloned()
        .collect();

    // Import closure rooted at every pattern-matched file in the tree.
    let mut closure: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut roots: Vec<String> = repo_files
        .iter()
        .filter(|path| globs.is_match(path.as_str()))
        .cloned()
        .collect();
    roots.sort();
    for root in roots {
        if closure.insert(root.clone()) {
            queue.push_back(root);
        }
    }
    while let Some(path) = queue.pop_front() {
        // Asset files are closure members but are never traversed.
        if ImportResolver::is_asset(&path)
            || !util::has_source_extension(&path, &config.file_extensions)
        {
            continue;
        }
        let parsed = match parse.load(revisions, &path, &Revision::WorkingTree) {
            LoadOutcome::Parsed(parsed) => parsed,
            LoadOutcome::ReadFailed(err) => {
                outcome
                    .warnings
                    .push(format!("global watch: read {path}: {err}"));
                continue;
            }
            LoadOutcome::ParseFailed => {
                outcome
                    .warnings
                    .push(format!("global watch: could not parse {path}"));
                continue;
            }
        };
        for reference in extract_module_refs(&parsed) {
            if let Some(dep) = resolver.resolve(&path, &reference) {
                if closure.insert(dep.clone()) {
                    queue.push_back(dep);
                }
            }
        }
    }

    let directly_matched: BTreeSet<&String> = outcome.matched_paths.iter().collect();
    outcome.resolved_files = changed_paths
        .iter()
        .filter(|path| closure.contains(path.as_str()) && !directly_matched.contains(path))
        .cloned()
        .collect();

    outcome.forced_all = !outcome.matched_paths.is_empty() || !outcome.resolved_files.is_empty();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::imports::PathAliases;
    use crate::config::Profile;
    use crate::source::MemoryWorkspace;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn config() -> SelectionConfig {
        let profile = Profile::new("tests", "tests/", Arc::new(|p: &str| p.starts_with("src/")));
        let mut config = SelectionConfig::new("/repo", profile);
        config.validate().unwrap();
        config
    }

    fn evaluate(
        config: &SelectionConfig,
        ws: &MemoryWorkspace,
        repo_files: &[&str],
        changed: &[&str],
    ) -> GlobalWatchOutcome {
        let mut parse = ParseService::new().unwrap();
        let files: HashSet<String> = repo_files.iter().map(|f| f.to_string()).collect();
        let resolver = ImportResolver::new(
            files,
            config.file_extensions.clone(),
            PathAliases::default(),
        );
        let repo_files: Vec<String> = repo_files.iter().map(|f| f.to_string()).collect();
        let changed: BTreeSet<String> = changed.iter().map(|c| c.to_string()).collect();
        evaluate_global_watch(config, ws, &mut parse, &resolver, &repo_files, &changed)
    }

    #[test]
    fn star_stays_within_a_segment() {
        let config = config();
        let ws = MemoryWorkspace::default();
        let outcome = evaluate(
            &config,
            &ws,
            &["playwright.ci.config.ts"],
            &["playwright.ci.config.ts"],
        );
        assert!(outcome.forced_all);
        assert_eq!(outcome.matched_paths, vec!["playwright.ci.config.ts"]);

        let outcome = evaluate(
            &config,
            &ws,
            &["nested/playwright.ci.config.ts"],
            &["nested/playwright.ci.config.ts"],
        );
        assert!(!outcome.forced_all, "`*` must not cross `/`");
    }

    #[test]
    fn double_star_crosses_segments() {
        let config = config();
        let ws = MemoryWorkspace::default();
        let outcome = evaluate(
            &config,
            &ws,
            &["src/fixtures/deep/setup.ts"],
            &["src/fixtures/deep/setup.ts"],
        );
        assert!(outcome.forced_all);
    }

    #[test]
    fn import_closure_reaches_changed_dependencies() {
        let config = config();
        let mut ws = MemoryWorkspace::default();
        ws.insert(
            Revision::WorkingTree,
            "src/fixtures/index.ts",
            "import { helper } from '../support/helper';\nexport const f = helper;\n",
        );
        ws.insert(
            Revision::WorkingTree,
            "src/support/helper.ts",
            "export const helper = 1;\n",
        );
        let outcome = evaluate(
            &config,
            &ws,
            &["src/fixtures/index.ts", "src/support/helper.ts"],
            &["src/support/helper.ts"],
        );
        assert!(outcome.forced_all);
        assert!(outcome.matched_paths.is_empty());
        assert_eq!(outcome.resolved_files, vec!["src/support/helper.ts"]);
    }

    #[test]
    fn disabled_mode_suppresses_everything() {
        let mut config = config();
        config.profile.global_watch_mode = GlobalWatchMode::Disabled;
        let ws = MemoryWorkspace::default();
        let outcome = evaluate(
            &config,
            &ws,
            &["playwright.config.ts"],
            &["playwright.config.ts"],
        );
        assert!(!outcome.forced_all);
    }

    #[test]
    fn unrelated_changes_do_not_force() {
        let config = config();
        let mut ws = MemoryWorkspace::default();
        ws.insert(Revision::WorkingTree, "src/fixtures/index.ts", "export {};\n");
        let outcome = evaluate(
            &config,
            &ws,
            &["src/fixtures/index.ts", "src/pages/login.ts"],
            &["src/pages/login.ts"],
        );
        assert!(!outcome.forced_all);
    }
}
