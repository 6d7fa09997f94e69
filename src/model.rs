use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Canonical change status after normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl ChangeStatus {
    /// Merge precedence for duplicate entries: Deleted > Renamed > Modified > Added.
    pub fn priority(self) -> u8 {
        match self {
            ChangeStatus::Deleted => 3,
            ChangeStatus::Renamed => 2,
            ChangeStatus::Modified => 1,
            ChangeStatus::Added => 0,
        }
    }

    pub fn as_letter(self) -> &'static str {
        match self {
            ChangeStatus::Added => "A",
            ChangeStatus::Modified => "M",
            ChangeStatus::Deleted => "D",
            ChangeStatus::Renamed => "R",
        }
    }
}

/// Which comparison produced a change entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeOrigin {
    BaseToHead,
    WorkingTree,
    Untracked,
}

/// A raw change row as produced by the enumerator backend, before
/// normalization. `status` keeps the untransformed upstream classifier
/// (e.g. `R087`, `C100`, `T`).
#[derive(Debug, Clone)]
pub struct RawChange {
    pub status: String,
    pub old_path: Option<String>,
    pub path: String,
}

/// A batch of raw changes from one enumeration source. Malformed lines are
/// skipped by the backend and reported here instead of failing the run.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub changes: Vec<RawChange>,
    pub warnings: Vec<String>,
}

/// A normalized change entry. Exactly one entry exists per `effective_path`
/// after normalization.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeEntry {
    pub status: ChangeStatus,
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    /// Head-side path; for deletions, the deleted path.
    pub effective_path: String,
    /// Untransformed upstream classifier, kept for diagnostics.
    pub raw_status: String,
    /// Revision the base side of this entry reads from. `None` for files
    /// that have no base (untracked, added).
    pub base_revision: Option<String>,
    pub origin: ChangeOrigin,
}

/// Why a spec file ended up in the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionReason {
    DirectChangedSpec,
    MatchedImportGraph,
    MatchedPrecise,
    MatchedUncertainFailOpen,
    RetainedNoImpactedMethods,
    RetainedNoBindings,
    RetainedReadError,
    GlobalWatchForceAll,
}

impl SelectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SelectionReason::DirectChangedSpec => "direct-changed-spec",
            SelectionReason::MatchedImportGraph => "matched-import-graph",
            SelectionReason::MatchedPrecise => "matched-precise",
            SelectionReason::MatchedUncertainFailOpen => "matched-uncertain-fail-open",
            SelectionReason::RetainedNoImpactedMethods => "retained-no-impacted-methods",
            SelectionReason::RetainedNoBindings => "retained-no-bindings",
            SelectionReason::RetainedReadError => "retained-read-error",
            SelectionReason::GlobalWatchForceAll => "global-watch-force-all",
        }
    }
}

/// `(class, member)` sets keyed by class name. Used both for detector output
/// and for the propagated impact set.
pub type MethodsByClass = BTreeMap<String, BTreeSet<String>>;

/// Insert a `(class, member)` pair.
pub fn record_method(map: &mut MethodsByClass, class: &str, member: &str) {
    map.entry(class.to_string())
        .or_default()
        .insert(member.to_string());
}

/// Total number of `(class, member)` pairs in the map.
pub fn method_pair_count(map: &MethodsByClass) -> usize {
    map.values().map(|set| set.len()).sum()
}
