//! Change-set normalization.
//!
//! Merges the base-vs-head comparison, the working-tree comparison and the
//! untracked list into one entry per effective path, with a canonical
//! status and deterministic ordering.

use crate::config::SelectionConfig;
use crate::error::EngineError;
use crate::model::{ChangeBatch, ChangeEntry, ChangeOrigin, ChangeStatus, RawChange};
use crate::source::ChangeEnumerator;
use crate::util;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct NormalizedChanges {
    /// One entry per effective path, sorted lexicographically.
    pub entries: Vec<ChangeEntry>,
    pub warnings: Vec<String>,
    /// Raw entries accepted per source, before merging.
    pub base_to_head_count: usize,
    pub working_tree_count: usize,
    pub untracked_count: usize,
    /// Upstream classifiers that had to fall back to a canonical status.
    pub status_fallbacks: usize,
}

/// Enumerate and normalize the change set. A failing enumerator backend is
/// the fatal source-enumeration error; malformed individual rows only warn.
pub fn normalize_changes(
    config: &SelectionConfig,
    changes: &dyn ChangeEnumerator,
) -> Result<NormalizedChanges, EngineError> {
    let mut out = NormalizedChanges::default();
    let mut merged: BTreeMap<String, ChangeEntry> = BTreeMap::new();

    if let Some(base_ref) = config.base_ref.clone() {
        let batch = changes
            .base_to_head(&base_ref)
            .map_err(EngineError::SourceEnumeration)?;
        out.base_to_head_count = ingest_batch(
            config,
            batch,
            ChangeOrigin::BaseToHead,
            Some(&base_ref),
            &mut out,
            &mut merged,
        );
    }

    let include_working_tree = config.base_ref.is_none() || config.include_working_tree_with_base;
    if include_working_tree {
        let batch = changes
            .working_tree()
            .map_err(EngineError::SourceEnumeration)?;
        out.working_tree_count = ingest_batch(
            config,
            batch,
            ChangeOrigin::WorkingTree,
            Some("HEAD"),
            &mut out,
            &mut merged,
        );
    }

    let untracked = changes
        .untracked()
        .map_err(EngineError::SourceEnumeration)?;
    for path in untracked {
        let path = util::normalize_slashes(&path);
        if path.is_empty() || !in_scope(config, &path) {
            continue;
        }
        out.untracked_count += 1;
        merge_entry(
            &mut merged,
            ChangeEntry {
                status: ChangeStatus::Added,
                old_path: None,
                new_path: Some(path.clone()),
                effective_path: path,
                raw_status: "untracked".to_string(),
                base_revision: None,
                origin: ChangeOrigin::Untracked,
            },
        );
    }

    out.entries = merged.into_values().collect();
    Ok(out)
}

fn ingest_batch(
    config: &SelectionConfig,
    batch: ChangeBatch,
    origin: ChangeOrigin,
    base_revision: Option<&str>,
    out: &mut NormalizedChanges,
    merged: &mut BTreeMap<String, ChangeEntry>,
) -> usize {
    out.warnings.extend(batch.warnings);
    let mut accepted = 0usize;
    for raw in batch.changes {
        let Some(entry) = normalize_entry(&raw, origin, base_revision, out) else {
            continue;
        };
        if !in_scope(config, &entry.effective_path) {
            continue;
        }
        accepted += 1;
        merge_entry(merged, entry);
    }
    accepted
}

fn in_scope(config: &SelectionConfig, path: &str) -> bool {
    match &config.profile.scope_prefix_relative {
        Some(prefix) => util::is_under(path, prefix),
        None => true,
    }
}

/// Map one raw row to a canonical entry. Unknown classifiers fall back to
/// Modified and `C` (copy) falls back to Added, each with a warning.
fn normalize_entry(
    raw: &RawChange,
    origin: ChangeOrigin,
    base_revision: Option<&str>,
    out: &mut NormalizedChanges,
) -> Option<ChangeEntry> {
    let path = util::normalize_slashes(&raw.path);
    if path.is_empty() || path == "." {
        return None;
    }
    let old_path = raw
        .old_path
        .as_deref()
        .map(util::normalize_slashes)
        .filter(|p| !p.is_empty());

    let status = match raw.status.chars().next() {
        Some('A') => ChangeStatus::Added,
        Some('M') => ChangeStatus::Modified,
        Some('D') => ChangeStatus::Deleted,
        Some('R') => ChangeStatus::Renamed,
        Some('C') => {
            out.warnings.push(format!(
                "status fallback: copy classifier {:?} treated as Added for {path}",
                raw.status
            ));
            out.status_fallbacks += 1;
            ChangeStatus::Added
        }
        Some('T') | Some('U') => ChangeStatus::Modified,
        _ => {
            out.warnings.push(format!(
                "status fallback: unknown classifier {:?} treated as Modified for {path}",
                raw.status
            ));
            out.status_fallbacks += 1;
            ChangeStatus::Modified
        }
    };

    let (old_path, new_path) = match status {
        ChangeStatus::Added => (None, Some(path.clone())),
        ChangeStatus::Modified => (old_path.or_else(|| Some(path.clone())), Some(path.clone())),
        ChangeStatus::Deleted => (Some(path.clone()), None),
        ChangeStatus::Renamed => (old_path, Some(path.clone())),
    };

    Some(ChangeEntry {
        status,
        old_path,
        new_path,
        effective_path: path,
        raw_status: raw.status.clone(),
        base_revision: match status {
            ChangeStatus::Added => None,
            _ => base_revision.map(str::to_string),
        },
        origin,
    })
}

/// Deduplicate by effective path: higher status priority wins; on a tie the
/// richer record (more populated fields) wins, and beyond that the incumbent
/// stays, which keeps the base-to-head record whose base revision spans the
/// longer diff range.
fn merge_entry(merged: &mut BTreeMap<String, ChangeEntry>, entry: ChangeEntry) {
    match merged.get_mut(&entry.effective_path) {
        None => {
            merged.insert(entry.effective_path.clone(), entry);
        }
        Some(existing) => {
            let (old_p, new_p) = (existing.status.priority(), entry.status.priority());
            if new_p > old_p || (new_p == old_p && richness(&entry) > richness(existing)) {
                *existing = entry;
            }
        }
    }
}

fn richness(entry: &ChangeEntry) -> usize {
    usize::from(entry.old_path.is_some())
        + usize::from(entry.new_path.is_some())
        + usize::from(entry.base_revision.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Profile, SelectionConfig};
    use crate::source::MemoryWorkspace;
    use std::sync::Arc;

    fn config() -> SelectionConfig {
        let profile = Profile::new("tests", "tests/", Arc::new(|p: &str| p.starts_with("src/")));
        let mut config = SelectionConfig::new("/repo", profile);
        config.validate().unwrap();
        config
    }

    fn raw(status: &str, old: Option<&str>, path: &str) -> RawChange {
        RawChange {
            status: status.to_string(),
            old_path: old.map(str::to_string),
            path: path.to_string(),
        }
    }

    #[test]
    fn merges_duplicates_by_priority() {
        let mut ws = MemoryWorkspace::default();
        ws.base_to_head.changes = vec![raw("M", None, "src/a.ts")];
        ws.working_tree.changes = vec![raw("D", None, "src/a.ts")];
        let mut config = config();
        config.base_ref = Some("main".to_string());
        let normalized = normalize_changes(&config, &ws).unwrap();
        assert_eq!(normalized.entries.len(), 1);
        assert_eq!(normalized.entries[0].status, ChangeStatus::Deleted);
    }

    #[test]
    fn richer_rename_beats_bare_rename() {
        let mut ws = MemoryWorkspace::default();
        ws.base_to_head.changes = vec![raw("R100", Some("src/old.ts"), "src/new.ts")];
        ws.working_tree.changes = vec![raw("R", None, "src/new.ts")];
        let mut config = config();
        config.base_ref = Some("main".to_string());
        let normalized = normalize_changes(&config, &ws).unwrap();
        assert_eq!(normalized.entries.len(), 1);
        assert_eq!(
            normalized.entries[0].old_path.as_deref(),
            Some("src/old.ts")
        );
    }

    #[test]
    fn copy_and_unknown_classifiers_fall_back_with_warnings() {
        let mut ws = MemoryWorkspace::default();
        ws.working_tree.changes = vec![
            raw("C075", Some("src/a.ts"), "src/b.ts"),
            raw("X", None, "src/c.ts"),
            raw("T", None, "src/d.ts"),
        ];
        let normalized = normalize_changes(&config(), &ws).unwrap();
        let by_path: BTreeMap<_, _> = normalized
            .entries
            .iter()
            .map(|e| (e.effective_path.clone(), e.status))
            .collect();
        assert_eq!(by_path["src/b.ts"], ChangeStatus::Added);
        assert_eq!(by_path["src/c.ts"], ChangeStatus::Modified);
        assert_eq!(by_path["src/d.ts"], ChangeStatus::Modified);
        assert_eq!(normalized.status_fallbacks, 2);
        assert_eq!(normalized.warnings.len(), 2);
    }

    #[test]
    fn untracked_files_become_added_entries() {
        let mut ws = MemoryWorkspace::default();
        ws.untracked = vec!["tests/new.spec.ts".to_string()];
        let normalized = normalize_changes(&config(), &ws).unwrap();
        assert_eq!(normalized.entries.len(), 1);
        assert_eq!(normalized.entries[0].status, ChangeStatus::Added);
        assert_eq!(normalized.entries[0].origin, ChangeOrigin::Untracked);
        assert!(normalized.entries[0].base_revision.is_none());
    }

    #[test]
    fn scope_prefix_drops_outside_entries() {
        let mut ws = MemoryWorkspace::default();
        ws.working_tree.changes = vec![
            raw("M", None, "apps/web/src/a.ts"),
            raw("M", None, "apps/api/src/b.ts"),
        ];
        let mut config = config();
        config.profile.scope_prefix_relative = Some("apps/web".to_string());
        let normalized = normalize_changes(&config, &ws).unwrap();
        assert_eq!(normalized.entries.len(), 1);
        assert_eq!(normalized.entries[0].effective_path, "apps/web/src/a.ts");
    }

    #[test]
    fn entries_are_sorted_by_effective_path() {
        let mut ws = MemoryWorkspace::default();
        ws.working_tree.changes = vec![
            raw("M", None, "src/z.ts"),
            raw("M", None, "src/a.ts"),
            raw("M", None, "src/m.ts"),
        ];
        let normalized = normalize_changes(&config(), &ws).unwrap();
        let paths: Vec<_> = normalized
            .entries
            .iter()
            .map(|e| e.effective_path.as_str())
            .collect();
        assert_eq!(paths, vec!["src/a.ts", "src/m.ts", "src/z.ts"]);
    }

    #[test]
    fn failing_backend_is_fatal() {
        let ws = MemoryWorkspace {
            fail_enumeration: true,
            ..MemoryWorkspace::default()
        };
        assert!(matches!(
            normalize_changes(&config(), &ws),
            Err(EngineError::SourceEnumeration(_))
        ));
    }
}
