//! The selection pipeline, end to end.
//!
//! One synchronous computation per invocation: normalize the change set,
//! evaluate global watch (which may short-circuit), detect semantic member
//! changes, propagate impact, select specs, assemble the report. All state
//! is created fresh per run.

use crate::analyzer::fingerprint::FingerprintCache;
use crate::analyzer::imports::{ImportResolver, PathAliases};
use crate::analyzer::parse::ParseService;
use crate::changeset::{normalize_changes, NormalizedChanges};
use crate::config::SelectionConfig;
use crate::detect::detect_changes;
use crate::error::EngineError;
use crate::fixtures::parse_fixture_map;
use crate::globwatch::evaluate_global_watch;
use crate::importgraph::select_specs_by_imports;
use crate::inheritance::build_inheritance_graph;
use crate::model::{method_pair_count, ChangeOrigin, ChangeStatus, SelectionReason};
use crate::propagate::{propagate_impact, ClassUniverse};
use crate::report::{
    assemble_report, ChangeSourceBreakdown, CoverageStats, GlobalWatchSummary, ReportInputs,
    SelectionReport, StageStats, StatusCounts,
};
use crate::selection::select_candidate_specs;
use crate::source::{
    ChangeEnumerator, FsTree, GitWorkspace, Revision, RevisionReader, TreeLister,
};
use crate::util;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::debug;

/// Run the analyzer against a git checkout, using the shipped git and
/// file-system collaborators.
pub fn select_specs_in_repo(config: &SelectionConfig) -> Result<SelectionReport, EngineError> {
    let workspace = GitWorkspace::new(&config.repo_root);
    let tree = FsTree::new(&config.repo_root);
    select_specs(config, &workspace, &workspace, &tree)
}

/// Run the analyzer with caller-supplied collaborators.
pub fn select_specs(
    config: &SelectionConfig,
    changes: &dyn ChangeEnumerator,
    revisions: &dyn RevisionReader,
    tree: &dyn TreeLister,
) -> Result<SelectionReport, EngineError> {
    let mut config = config.clone();
    config.validate()?;
    let config = &config;

    let mut parse = ParseService::new()
        .map_err(|err| EngineError::configuration(format!("parser init: {err:#}")))?;
    let mut fps = FingerprintCache::default();
    let mut warnings: Vec<String> = Vec::new();

    // Component A: one entry per effective path.
    let normalized = normalize_changes(config, changes)?;
    warnings.extend(normalized.warnings.iter().cloned());
    debug!(target: "specsift", entries = normalized.entries.len(), "change set normalized");

    let repo_files = match tree.list("") {
        Ok(mut files) => {
            files.sort();
            files
        }
        Err(err) => {
            return Err(EngineError::SourceEnumeration(
                err.context("list repository tree"),
            ))
        }
    };
    // A project-scoped profile confines the whole analysis (spec listing,
    // watch-closure roots, import resolution) to its directory, matching
    // the normalizer-level drop.
    let repo_files: Vec<String> = match &config.profile.scope_prefix_relative {
        Some(prefix) => repo_files
            .into_iter()
            .filter(|path| util::is_under(path, prefix))
            .collect(),
        None => repo_files,
    };
    let all_specs: Vec<String> = repo_files
        .iter()
        .filter(|path| {
            util::is_under(path, &config.profile.tests_root_relative)
                && util::is_spec_file(path, &config.file_extensions)
        })
        .cloned()
        .collect();

    let aliases = match revisions.read("tsconfig.json", &Revision::WorkingTree) {
        Ok(text) => match PathAliases::parse(&text) {
            Ok(aliases) => aliases,
            Err(err) => {
                warnings.push(format!("tsconfig.json: {err:#}"));
                PathAliases::default()
            }
        },
        Err(_) => PathAliases::default(),
    };
    let resolver = ImportResolver::new(
        repo_files.iter().cloned().collect::<HashSet<String>>(),
        config.file_extensions.clone(),
        aliases,
    );

    // Every path the change set touches, head side and base side.
    let changed_paths: BTreeSet<String> = normalized
        .entries
        .iter()
        .flat_map(|entry| {
            entry
                .old_path
                .iter()
                .chain(std::iter::once(&entry.effective_path))
                .cloned()
                .collect::<Vec<_>>()
        })
        .collect();

    // Component B: global watch may short-circuit the whole pipeline.
    let watch = evaluate_global_watch(
        config,
        revisions,
        &mut parse,
        &resolver,
        &repo_files,
        &changed_paths,
    );
    warnings.extend(watch.warnings.iter().cloned());
    if watch.forced_all {
        debug!(target: "specsift", "global watch matched; selecting every spec");
        let mut selected: BTreeMap<String, SelectionReason> = BTreeMap::new();
        for spec in &all_specs {
            selected.insert(spec.clone(), SelectionReason::GlobalWatchForceAll);
        }
        let inputs = ReportInputs {
            selected,
            status_counts: status_counts(&normalized),
            stats: StageStats {
                changed_entries: normalized.entries.len(),
                specs_considered: all_specs.len(),
                ..StageStats::default()
            },
            coverage: Default::default(),
            change_sources: source_breakdown(&normalized),
            global_watch: GlobalWatchSummary {
                forced_all_specs: true,
                matched_paths: watch.matched_paths,
                resolved_files: watch.resolved_files,
            },
            warnings,
        };
        return Ok(assemble_report(config, inputs));
    }

    // Components C and D are independent of each other.
    let fixtures_path = config.profile.fixtures_types_path(&config.file_extensions);
    let fixture_map = parse_fixture_map(&mut parse, revisions, &fixtures_path, &mut warnings);
    let inheritance = build_inheritance_graph(config, tree, revisions, &mut warnings);
    debug!(
        target: "specsift",
        fixture_keys = fixture_map.fixture_key_to_class.len(),
        classes = inheritance.parents_by_child.len(),
        "fixture map and inheritance graph built"
    );

    // Component E: semantic member-level diff.
    let detected = detect_changes(config, &normalized.entries, revisions, &mut parse, &mut fps);
    warnings.extend(detected.warnings.iter().cloned());
    debug!(
        target: "specsift",
        changed_methods = method_pair_count(&detected.changed_methods_by_class),
        "semantic change detection done"
    );

    // Component F: call-graph propagation.
    let universe = ClassUniverse::build(
        config,
        tree,
        revisions,
        &mut parse,
        &mut fps,
        &inheritance,
        &mut warnings,
    );
    let propagated = propagate_impact(&universe, &detected.changed_methods_by_class);
    warnings.extend(propagated.warnings.iter().cloned());
    let impacted_fixture_keys = fixture_map.keys_for_classes(propagated.impacted_classes.iter());
    debug!(
        target: "specsift",
        impacted_methods = method_pair_count(&propagated.impacted_methods_by_class),
        impacted_classes = propagated.impacted_classes.len(),
        "impact propagation done"
    );

    // Component G: reverse-dependency selection, seeded from every changed
    // path.
    let import_graph = select_specs_by_imports(
        config,
        revisions,
        &mut parse,
        &resolver,
        &all_specs,
        &changed_paths,
    );
    warnings.extend(import_graph.warnings.iter().cloned());

    // Directly-changed specs: not deleted, spec-named, under the configured
    // prefix; untracked ones only when configured in.
    let mut direct_changed_specs: BTreeSet<String> = BTreeSet::new();
    for entry in &normalized.entries {
        if entry.status == ChangeStatus::Deleted {
            continue;
        }
        if entry.origin == ChangeOrigin::Untracked && !config.include_untracked_specs {
            continue;
        }
        if entry
            .effective_path
            .starts_with(&config.profile.changed_spec_prefix)
            && util::is_spec_file(&entry.effective_path, &config.file_extensions)
        {
            direct_changed_specs.insert(entry.effective_path.clone());
        }
    }

    // Component H: the two-stage selection pipeline.
    let selection = select_candidate_specs(
        config,
        revisions,
        &mut parse,
        &fixture_map,
        &propagated.impacted_methods_by_class,
        &impacted_fixture_keys,
        &all_specs,
        &direct_changed_specs,
        &import_graph.matched_specs,
    );
    warnings.extend(selection.warnings.iter().cloned());

    // Component I: assemble.
    let inputs = ReportInputs {
        stats: StageStats {
            changed_entries: normalized.entries.len(),
            analyzed_source_files: detected.analyzed_files,
            semantic_changed_methods: method_pair_count(&detected.changed_methods_by_class),
            top_level_runtime_changed_files: detected.top_level_runtime_changed_files,
            impacted_classes: propagated.impacted_classes.len(),
            impacted_methods: method_pair_count(&propagated.impacted_methods_by_class),
            fixture_keys: impacted_fixture_keys.len(),
            prefiltered_specs: selection.prefiltered_specs,
            import_graph_specs: import_graph.matched_specs.len(),
            direct_changed_specs: direct_changed_specs.len(),
            specs_considered: all_specs.len(),
        },
        coverage: CoverageStats {
            uncertain_call_sites: selection.uncertain_call_sites,
            status_fallbacks: normalized.status_fallbacks,
            dynamic_this_sites: propagated.coverage.dynamic_this_sites,
            deep_chain_sites: propagated.coverage.deep_chain_sites,
            alias_call_sites: selection.alias_call_sites,
            unresolved_call_targets: propagated.coverage.unresolved_call_targets,
            unknown_composed_fields: propagated.coverage.unknown_composed_fields,
        },
        status_counts: status_counts(&normalized),
        change_sources: source_breakdown(&normalized),
        global_watch: GlobalWatchSummary {
            forced_all_specs: false,
            matched_paths: watch.matched_paths,
            resolved_files: watch.resolved_files,
        },
        selected: selection.selected,
        warnings,
    };
    Ok(assemble_report(config, inputs))
}

fn status_counts(normalized: &NormalizedChanges) -> StatusCounts {
    let mut counts = StatusCounts::default();
    for entry in &normalized.entries {
        match entry.status {
            ChangeStatus::Added => counts.added += 1,
            ChangeStatus::Modified => counts.modified += 1,
            ChangeStatus::Deleted => counts.deleted += 1,
            ChangeStatus::Renamed => counts.renamed += 1,
        }
    }
    counts
}

fn source_breakdown(normalized: &NormalizedChanges) -> ChangeSourceBreakdown {
    ChangeSourceBreakdown {
        base_to_head: normalized.base_to_head_count,
        working_tree: normalized.working_tree_count,
        untracked: normalized.untracked_count,
    }
}
