//! Impact propagation.
//!
//! Builds the class-scoped call graph and the composition graph over the
//! analysis roots, seeds them with the detector output, walks reverse edges
//! breadth-first, and projects the visited member keys back onto classes
//! through lineage, composition ownership and descendants.

use crate::analyzer::classes::{build_file_model, ClassModel, ThisCall};
use crate::analyzer::fingerprint::FingerprintCache;
use crate::analyzer::parse::{LoadOutcome, ParseService};
use crate::config::SelectionConfig;
use crate::inheritance::InheritanceGraph;
use crate::model::{record_method, MethodsByClass};
use crate::source::{Revision, RevisionReader, TreeLister};
use crate::util;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Uncertainty counters surfaced by graph construction.
#[derive(Debug, Default, Clone, Copy)]
pub struct PropagationCoverage {
    pub dynamic_this_sites: usize,
    pub deep_chain_sites: usize,
    pub unresolved_call_targets: usize,
    pub unknown_composed_fields: usize,
}

#[derive(Debug, Default)]
pub struct PropagationResult {
    pub impacted_methods_by_class: MethodsByClass,
    pub impacted_classes: BTreeSet<String>,
    pub coverage: PropagationCoverage,
    pub warnings: Vec<String>,
}

/// `<Class>#<Member>` key of a resolved callable.
fn member_key(class: &str, member: &str) -> String {
    format!("{class}#{member}")
}

fn split_key(key: &str) -> (&str, &str) {
    key.split_once('#').unwrap_or((key, ""))
}

/// The merged class universe of the analysis roots plus the inheritance
/// forest; resolution walks lineage upward, which keeps the tables fresh
/// and handles shallow POM hierarchies cheaply.
pub struct ClassUniverse<'g> {
    classes: BTreeMap<String, ClassModel>,
    inheritance: &'g InheritanceGraph,
}

impl<'g> ClassUniverse<'g> {
    /// Parse every source file under the analysis roots and collect class
    /// models. The first definition of a duplicated class name wins.
    pub fn build(
        config: &SelectionConfig,
        tree: &dyn TreeLister,
        revisions: &dyn RevisionReader,
        parse: &mut ParseService,
        fps: &mut FingerprintCache,
        inheritance: &'g InheritanceGraph,
        warnings: &mut Vec<String>,
    ) -> Self {
        let mut classes: BTreeMap<String, ClassModel> = BTreeMap::new();
        for root in &config.profile.analysis_roots_relative {
            let mut files = match tree.list(root) {
                Ok(files) => files,
                Err(err) => {
                    warnings.push(format!("class scan: list {root}: {err:#}"));
                    continue;
                }
            };
            files.sort();
            for path in files {
                if !util::has_source_extension(&path, &config.file_extensions) {
                    continue;
                }
                let parsed = match parse.load(revisions, &path, &Revision::WorkingTree) {
                    LoadOutcome::Parsed(parsed) => parsed,
                    LoadOutcome::ReadFailed(err) => {
                        warnings.push(format!("class scan: read {path}: {err}"));
                        continue;
                    }
                    LoadOutcome::ParseFailed => {
                        warnings.push(format!("class scan: could not parse {path}"));
                        continue;
                    }
                };
                let model = build_file_model(&parsed, &Revision::WorkingTree, fps);
                for (name, class) in model.classes {
                    if classes.contains_key(&name) {
                        warnings.push(format!(
                            "class scan: duplicate class {name} in {path}; keeping first definition"
                        ));
                    } else {
                        classes.insert(name, class);
                    }
                }
            }
        }
        ClassUniverse {
            classes,
            inheritance,
        }
    }

    /// Resolve a member name up the lineage starting at `class`; returns the
    /// member key on the defining class.
    pub fn resolve_callable(&self, class: &str, name: &str) -> Option<String> {
        for ancestor in self.inheritance.lineage(class) {
            if let Some(model) = self.classes.get(ancestor) {
                if model.has_callable(name) {
                    return Some(member_key(ancestor, name));
                }
            }
        }
        None
    }

    /// Composed field lookup through the lineage.
    pub fn resolve_composed(&self, class: &str, field: &str) -> Option<String> {
        for ancestor in self.inheritance.lineage(class) {
            if let Some(model) = self.classes.get(ancestor) {
                if let Some(composed) = model.composed_fields.get(field) {
                    return Some(composed.clone());
                }
            }
        }
        None
    }

    /// Every callable visible on `class`, as keys on the defining classes.
    fn visible_callable_keys(&self, class: &str) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for ancestor in self.inheritance.lineage(class) {
            if let Some(model) = self.classes.get(ancestor) {
                names.extend(model.callable_names());
            }
        }
        names
            .iter()
            .filter_map(|name| self.resolve_callable(class, name))
            .collect()
    }

    /// Composed fields visible on `class` through its lineage.
    fn visible_composed_classes(&self, class: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for ancestor in self.inheritance.lineage(class) {
            if let Some(model) = self.classes.get(ancestor) {
                out.extend(model.composed_fields.values().cloned());
            }
        }
        out
    }
}

/// Expand the detector output to the full impacted set.
pub fn propagate_impact(
    universe: &ClassUniverse<'_>,
    changed_methods_by_class: &MethodsByClass,
) -> PropagationResult {
    let mut result = PropagationResult::default();

    let reverse_edges = build_reverse_edges(universe, &mut result);

    // Seed with the changed members, resolved through lineage. Changed
    // members that no longer resolve (removed or renamed) still participate
    // in projection through their recorded names.
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for (class, names) in changed_methods_by_class {
        for name in names {
            if let Some(key) = universe.resolve_callable(class, name) {
                if visited.insert(key.clone()) {
                    queue.push_back(key);
                }
            }
        }
    }

    // BFS on reverse edges; the visited set terminates recursion and
    // mutual recursion.
    while let Some(key) = queue.pop_front() {
        if let Some(callers) = reverse_edges.get(&key) {
            for caller in callers {
                if visited.insert(caller.clone()) {
                    queue.push_back(caller.clone());
                }
            }
        }
    }

    project(universe, changed_methods_by_class, &visited, &mut result);
    result
}

/// Direct call edges, transposed: callee key -> caller keys.
fn build_reverse_edges(
    universe: &ClassUniverse<'_>,
    result: &mut PropagationResult,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut reverse: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut add_edge = |caller: &str, callee: String| {
        reverse
            .entry(callee)
            .or_default()
            .insert(caller.to_string());
    };

    for (class_name, model) in &universe.classes {
        for member in model.callable_members() {
            let caller_key = member_key(class_name, &member.name);
            for call in &member.this_calls {
                match call {
                    ThisCall::Method(name) => {
                        match universe.resolve_callable(class_name, name) {
                            Some(callee) => add_edge(&caller_key, callee),
                            None => {
                                result.coverage.unresolved_call_targets += 1;
                                result.warnings.push(format!(
                                    "call graph: unresolved this.{name}() in {caller_key}"
                                ));
                            }
                        }
                    }
                    ThisCall::SuperMethod(name) => {
                        let resolved = inheritance_parent(universe, class_name)
                            .and_then(|parent| universe.resolve_callable(&parent, name));
                        match resolved {
                            Some(callee) => add_edge(&caller_key, callee),
                            None => {
                                result.coverage.unresolved_call_targets += 1;
                                result.warnings.push(format!(
                                    "call graph: unresolved super.{name}() in {caller_key}"
                                ));
                            }
                        }
                    }
                    ThisCall::ComposedMethod { field, method } => {
                        match universe.resolve_composed(class_name, field) {
                            Some(composed) => {
                                match universe.resolve_callable(&composed, method) {
                                    Some(callee) => add_edge(&caller_key, callee),
                                    None => {
                                        result.coverage.unresolved_call_targets += 1;
                                        result.warnings.push(format!(
                                            "call graph: unresolved this.{field}.{method}() in {caller_key}"
                                        ));
                                    }
                                }
                            }
                            None => {
                                result.coverage.unknown_composed_fields += 1;
                                result.warnings.push(format!(
                                    "call graph: unknown composed field type for this.{field} in {caller_key}"
                                ));
                            }
                        }
                    }
                    ThisCall::DynamicIndex => {
                        // Conservative fail-open: any callable of the class
                        // may be the callee.
                        result.coverage.dynamic_this_sites += 1;
                        result.warnings.push(format!(
                            "call graph: dynamic this[...] call in {caller_key}"
                        ));
                        for callee in universe.visible_callable_keys(class_name) {
                            add_edge(&caller_key, callee);
                        }
                    }
                    ThisCall::DeepChain => {
                        result.coverage.deep_chain_sites += 1;
                        result.warnings.push(format!(
                            "call graph: deep this.* chain in {caller_key}"
                        ));
                        for callee in universe.visible_callable_keys(class_name) {
                            add_edge(&caller_key, callee);
                        }
                    }
                }
            }
        }
    }
    reverse
}

fn inheritance_parent(universe: &ClassUniverse<'_>, class: &str) -> Option<String> {
    universe.inheritance.parents_by_child.get(class).cloned()
}

/// Project visited member keys back to `(class, member)` pairs over the
/// closure of impacted classes.
fn project(
    universe: &ClassUniverse<'_>,
    changed_methods_by_class: &MethodsByClass,
    visited: &BTreeSet<String>,
    result: &mut PropagationResult,
) {
    let inheritance = universe.inheritance;
    let mut member_names: BTreeSet<String> = visited
        .iter()
        .map(|key| split_key(key).1.to_string())
        .collect();
    for names in changed_methods_by_class.values() {
        member_names.extend(names.iter().cloned());
    }

    // Class closure: visited and changed classes, plus composition owners
    // and descendants, to a fixpoint.
    let owners = composition_owners(universe);
    let mut classes: BTreeSet<String> = visited
        .iter()
        .map(|key| split_key(key).0.to_string())
        .collect();
    classes.extend(changed_methods_by_class.keys().cloned());
    let mut frontier: Vec<String> = classes.iter().cloned().collect();
    while let Some(class) = frontier.pop() {
        let mut next: Vec<String> = Vec::new();
        if let Some(owner_set) = owners.get(&class) {
            next.extend(owner_set.iter().cloned());
        }
        next.extend(inheritance.descendants(&class));
        for candidate in next {
            if classes.insert(candidate.clone()) {
                frontier.push(candidate);
            }
        }
    }

    let changed_in_lineage = |class: &str, name: &str| {
        inheritance.lineage(class).iter().any(|ancestor| {
            changed_methods_by_class
                .get(*ancestor)
                .is_some_and(|names| names.contains(name))
        })
    };
    let name_hits = |class: &str, name: &str| {
        match universe.resolve_callable(class, name) {
            Some(key) => visited.contains(&key),
            None => changed_in_lineage(class, name),
        }
    };

    for class in &classes {
        for name in &member_names {
            let direct = name_hits(class, name);
            let through_composition = !direct
                && universe
                    .visible_composed_classes(class)
                    .iter()
                    .any(|composed| name_hits(composed, name));
            if direct || through_composition {
                record_method(&mut result.impacted_methods_by_class, class, name);
            }
        }
    }
    result.impacted_classes = result.impacted_methods_by_class.keys().cloned().collect();
}

/// Reverse of the composition relation: composed class -> owner classes.
fn composition_owners(universe: &ClassUniverse<'_>) -> BTreeMap<String, BTreeSet<String>> {
    let mut owners: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (owner, model) in &universe.classes {
        for composed in model.composed_fields.values() {
            owners
                .entry(composed.clone())
                .or_default()
                .insert(owner.clone());
        }
    }
    owners
}
