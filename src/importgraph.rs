//! Import-graph spec selection.
//!
//! A reverse-dependency graph is grown from the spec files downward through
//! their imports; changed source files then walk the reverse edges back up,
//! and every spec they reach is selected.

use crate::analyzer::imports::{extract_module_refs, ImportResolver};
use crate::analyzer::parse::{LoadOutcome, ParseService};
use crate::config::SelectionConfig;
use crate::source::{Revision, RevisionReader};
use crate::util;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

#[derive(Debug, Default)]
pub struct ImportGraphResult {
    /// Spec files reachable from the changed set, sorted.
    pub matched_specs: BTreeSet<String>,
    pub warnings: Vec<String>,
}

/// Build the reverse graph from the spec seeds and traverse it from the
/// changed paths.
pub fn select_specs_by_imports(
    config: &SelectionConfig,
    revisions: &dyn RevisionReader,
    parse: &mut ParseService,
    resolver: &ImportResolver,
    spec_files: &[String],
    changed_paths: &BTreeSet<String>,
) -> ImportGraphResult {
    let mut result = ImportGraphResult::default();

    // dep -> files importing it
    let mut reverse_edges: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut discovered: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for spec in spec_files {
        if discovered.insert(spec.clone()) {
            queue.push_back(spec.clone());
        }
    }

    while let Some(path) = queue.pop_front() {
        if ImportResolver::is_asset(&path)
            || !util::has_source_extension(&path, &config.file_extensions)
        {
            continue;
        }
        let parsed = match parse.load(revisions, &path, &Revision::WorkingTree) {
            LoadOutcome::Parsed(parsed) => parsed,
            LoadOutcome::ReadFailed(err) => {
                result
                    .warnings
                    .push(format!("import graph: read {path}: {err}"));
                continue;
            }
            LoadOutcome::ParseFailed => {
                result
                    .warnings
                    .push(format!("import graph: could not parse {path}"));
                continue;
            }
        };
        for reference in extract_module_refs(&parsed) {
            let Some(dep) = resolver.resolve(&path, &reference) else {
                continue;
            };
            reverse_edges
                .entry(dep.clone())
                .or_default()
                .insert(path.clone());
            if discovered.insert(dep.clone()) {
                queue.push_back(dep);
            }
        }
    }

    // Reverse traversal from the changed seed set.
    let spec_set: BTreeSet<&String> = spec_files.iter().collect();
    let mut visited: BTreeSet<String> = changed_paths.clone();
    let mut frontier: VecDeque<String> = changed_paths.iter().cloned().collect();
    while let Some(path) = frontier.pop_front() {
        if let Some(importers) = reverse_edges.get(&path) {
            for importer in importers {
                if visited.insert(importer.clone()) {
                    frontier.push_back(importer.clone());
                }
            }
        }
    }
    for path in &visited {
        if spec_set.contains(path) && !changed_paths.contains(path) {
            result.matched_specs.insert(path.clone());
        }
    }
    result
}
