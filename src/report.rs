//! Result assembly.
//!
//! Collects the pipeline outputs into one deterministic, serializable
//! report: sorted spec lists, per-spec reasons, counters and warnings.

use crate::config::SelectionConfig;
use crate::model::SelectionReason;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StatusCounts {
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub renamed: usize,
}

/// Sizes of the intermediate sets, zeroed when global watch short-circuits.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct StageStats {
    pub changed_entries: usize,
    /// Relevant source files whose contents actually differed.
    pub analyzed_source_files: usize,
    pub semantic_changed_methods: usize,
    pub top_level_runtime_changed_files: usize,
    pub impacted_classes: usize,
    pub impacted_methods: usize,
    pub fixture_keys: usize,
    pub prefiltered_specs: usize,
    pub import_graph_specs: usize,
    pub direct_changed_specs: usize,
    pub specs_considered: usize,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct CoverageStats {
    pub uncertain_call_sites: usize,
    pub status_fallbacks: usize,
    pub dynamic_this_sites: usize,
    pub deep_chain_sites: usize,
    pub alias_call_sites: usize,
    pub unresolved_call_targets: usize,
    pub unknown_composed_fields: usize,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct ChangeSourceBreakdown {
    pub base_to_head: usize,
    pub working_tree: usize,
    pub untracked: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct GlobalWatchSummary {
    pub forced_all_specs: bool,
    pub matched_paths: Vec<String>,
    pub resolved_files: Vec<String>,
}

/// Everything a CI caller needs from one run.
#[derive(Debug, Serialize)]
pub struct SelectionReport {
    /// Repo-relative selected specs, sorted, no duplicates.
    pub selected_specs: Vec<String>,
    /// The same specs as absolute paths.
    pub selected_specs_abs: Vec<String>,
    /// Per-spec selection reason.
    pub reasons: BTreeMap<String, SelectionReason>,
    pub status_counts: StatusCounts,
    pub stats: StageStats,
    pub coverage: CoverageStats,
    pub change_sources: ChangeSourceBreakdown,
    pub global_watch: GlobalWatchSummary,
    pub warnings: Vec<String>,
    pub selection_bias: String,
    pub has_anything_to_run: bool,
}

/// Pipeline outputs waiting to be assembled.
#[derive(Debug, Default)]
pub struct ReportInputs {
    pub selected: BTreeMap<String, SelectionReason>,
    pub status_counts: StatusCounts,
    pub stats: StageStats,
    pub coverage: CoverageStats,
    pub change_sources: ChangeSourceBreakdown,
    pub global_watch: GlobalWatchSummary,
    pub warnings: Vec<String>,
}

/// Produce the final report: sorted lists, deduplicated warnings, derived
/// flags.
pub fn assemble_report(config: &SelectionConfig, mut inputs: ReportInputs) -> SelectionReport {
    let selected_specs: Vec<String> = inputs.selected.keys().cloned().collect();
    let selected_specs_abs: Vec<String> = selected_specs
        .iter()
        .map(|rel| config.repo_root.join(rel).display().to_string())
        .collect();

    let mut seen = std::collections::HashSet::new();
    let warnings: Vec<String> = inputs
        .warnings
        .drain(..)
        .filter(|warning| seen.insert(warning.clone()))
        .collect();
    for warning in &warnings {
        tracing::warn!(target: "specsift", "{warning}");
    }

    inputs.global_watch.matched_paths.sort();
    inputs.global_watch.matched_paths.dedup();
    inputs.global_watch.resolved_files.sort();
    inputs.global_watch.resolved_files.dedup();

    let has_anything_to_run = !selected_specs.is_empty();
    SelectionReport {
        selected_specs,
        selected_specs_abs,
        reasons: inputs.selected,
        status_counts: inputs.status_counts,
        stats: inputs.stats,
        coverage: inputs.coverage,
        change_sources: inputs.change_sources,
        global_watch: inputs.global_watch,
        warnings,
        selection_bias: config.selection_bias.as_str().to_string(),
        has_anything_to_run,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Profile;
    use std::sync::Arc;

    fn config() -> SelectionConfig {
        let profile = Profile::new("tests", "tests/", Arc::new(|_: &str| true));
        let mut config = SelectionConfig::new("/repo", profile);
        config.validate().unwrap();
        config
    }

    #[test]
    fn specs_are_sorted_and_flag_follows_emptiness() {
        let mut inputs = ReportInputs::default();
        inputs
            .selected
            .insert("tests/z.spec.ts".into(), SelectionReason::MatchedPrecise);
        inputs
            .selected
            .insert("tests/a.spec.ts".into(), SelectionReason::DirectChangedSpec);
        let report = assemble_report(&config(), inputs);
        assert_eq!(report.selected_specs, vec!["tests/a.spec.ts", "tests/z.spec.ts"]);
        assert!(report.has_anything_to_run);
        assert!(report.selected_specs_abs[0].ends_with("tests/a.spec.ts"));

        let empty = assemble_report(&config(), ReportInputs::default());
        assert!(!empty.has_anything_to_run);
        assert!(empty.selected_specs.is_empty());
    }

    #[test]
    fn warnings_are_deduplicated_in_order() {
        let inputs = ReportInputs {
            warnings: vec!["b".into(), "a".into(), "b".into()],
            ..ReportInputs::default()
        };
        let report = assemble_report(&config(), inputs);
        assert_eq!(report.warnings, vec!["b", "a"]);
    }

    #[test]
    fn reasons_serialize_kebab_case() {
        let mut inputs = ReportInputs::default();
        inputs
            .selected
            .insert("tests/a.spec.ts".into(), SelectionReason::GlobalWatchForceAll);
        let report = assemble_report(&config(), inputs);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"global-watch-force-all\""));
    }
}
