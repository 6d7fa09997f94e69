//! Spec selection.
//!
//! Stage A prefilters specs by the fixture keys they destructure; stage B
//! walks the surviving specs and classifies each call site against the
//! impacted member sets as precise or uncertain, applying the configured
//! bias to the uncertain ones.

use crate::analyzer::parse::{node_text, string_literal_value, LoadOutcome, ParseService, ParsedFile};
use crate::config::SelectionConfig;
use crate::fixtures::FixtureMap;
use crate::model::{MethodsByClass, SelectionReason};
use crate::source::{Revision, RevisionReader};
use std::collections::{BTreeMap, BTreeSet};
use tree_sitter::Node;

#[derive(Debug, Default)]
pub struct SelectionOutcome {
    /// Selected spec -> reason, keyed by repo-relative path.
    pub selected: BTreeMap<String, SelectionReason>,
    /// Stage A survivors (specs binding at least one impacted fixture key).
    pub prefiltered_specs: usize,
    pub uncertain_call_sites: usize,
    pub alias_call_sites: usize,
    pub warnings: Vec<String>,
}

/// Run both selection stages over every spec under the tests root.
#[allow(clippy::too_many_arguments)]
pub fn select_candidate_specs(
    config: &SelectionConfig,
    revisions: &dyn RevisionReader,
    parse: &mut ParseService,
    fixture_map: &FixtureMap,
    impacted_methods_by_class: &MethodsByClass,
    impacted_fixture_keys: &BTreeSet<String>,
    all_specs: &[String],
    direct_changed_specs: &BTreeSet<String>,
    import_matched_specs: &BTreeSet<String>,
) -> SelectionOutcome {
    let mut outcome = SelectionOutcome::default();

    for spec in all_specs {
        if direct_changed_specs.contains(spec) {
            outcome
                .selected
                .insert(spec.clone(), SelectionReason::DirectChangedSpec);
            continue;
        }
        if import_matched_specs.contains(spec) {
            outcome
                .selected
                .insert(spec.clone(), SelectionReason::MatchedImportGraph);
            continue;
        }

        let parsed = match parse.load(revisions, spec, &Revision::WorkingTree) {
            LoadOutcome::Parsed(parsed) => parsed,
            LoadOutcome::ReadFailed(err) => {
                // A spec we cannot analyze is retained; dropping it would
                // silently lose coverage.
                outcome
                    .warnings
                    .push(format!("selection: read {spec}: {err}"));
                outcome
                    .selected
                    .insert(spec.clone(), SelectionReason::RetainedReadError);
                continue;
            }
            LoadOutcome::ParseFailed => {
                outcome
                    .warnings
                    .push(format!("selection: could not parse {spec}"));
                outcome
                    .selected
                    .insert(spec.clone(), SelectionReason::RetainedReadError);
                continue;
            }
        };

        let bindings = extract_fixture_bindings(&parsed, fixture_map);

        // Stage A: the spec must bind at least one impacted fixture key.
        if bindings
            .bound_keys
            .intersection(impacted_fixture_keys)
            .next()
            .is_none()
        {
            continue;
        }
        outcome.prefiltered_specs += 1;

        // Stage B.
        if bindings.var_to_class.is_empty() {
            outcome
                .selected
                .insert(spec.clone(), SelectionReason::RetainedNoBindings);
            continue;
        }
        if impacted_methods_by_class.is_empty() {
            outcome
                .selected
                .insert(spec.clone(), SelectionReason::RetainedNoImpactedMethods);
            continue;
        }

        let sites = classify_call_sites(&parsed, &bindings, impacted_methods_by_class);
        outcome.uncertain_call_sites += sites.uncertain;
        outcome.alias_call_sites += sites.alias_calls;
        for warning in &sites.warnings {
            outcome.warnings.push(format!("{spec}: {warning}"));
        }

        if sites.precise > 0 {
            outcome
                .selected
                .insert(spec.clone(), SelectionReason::MatchedPrecise);
        } else if sites.uncertain > 0 && config.selection_bias.keeps_uncertain() {
            outcome.warnings.push(format!(
                "selection: {spec} kept fail-open on {} uncertain call site(s)",
                sites.uncertain
            ));
            outcome
                .selected
                .insert(spec.clone(), SelectionReason::MatchedUncertainFailOpen);
        }
    }
    outcome
}

/// Fixture bindings of one spec file.
#[derive(Debug, Default)]
pub struct FixtureBindings {
    /// Local variable -> class name, from destructured test parameters.
    pub var_to_class: BTreeMap<String, String>,
    /// Identifiers whose fixture identity is indirect: destructured members,
    /// nested-pattern locals and member aliases. Calls through them are
    /// uncertain by design.
    pub alias_vars: BTreeSet<String>,
    /// Every property name destructured in a callback parameter list.
    pub bound_keys: BTreeSet<String>,
}

/// Extract fixture bindings from the object-destructuring patterns in the
/// parameter lists of functions, arrows and methods.
pub fn extract_fixture_bindings(parsed: &ParsedFile, fixture_map: &FixtureMap) -> FixtureBindings {
    let source = parsed.source.as_str();
    let mut bindings = FixtureBindings::default();
    let mut stack = vec![parsed.root()];
    while let Some(node) = stack.pop() {
        if matches!(
            node.kind(),
            "arrow_function"
                | "function_declaration"
                | "function_expression"
                | "function"
                | "generator_function_declaration"
                | "method_definition"
        ) {
            if let Some(params) = node.child_by_field_name("parameters") {
                let mut cursor = params.walk();
                for param in params.named_children(&mut cursor) {
                    let pattern = match param.kind() {
                        "object_pattern" => Some(param),
                        "required_parameter" | "optional_parameter" => {
                            param.child_by_field_name("pattern")
                        }
                        _ => None,
                    };
                    if let Some(pattern) = pattern.filter(|p| p.kind() == "object_pattern") {
                        collect_pattern_bindings(pattern, source, fixture_map, &mut bindings);
                    }
                }
            }
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }
    bindings
}

fn collect_pattern_bindings(
    pattern: Node<'_>,
    source: &str,
    fixture_map: &FixtureMap,
    bindings: &mut FixtureBindings,
) {
    let mut cursor = pattern.walk();
    for entry in pattern.named_children(&mut cursor) {
        match entry.kind() {
            "shorthand_property_identifier_pattern" => {
                let name = node_text(entry, source);
                bind_key(&name, &name, fixture_map, bindings);
            }
            "object_assignment_pattern" => {
                // `{ key = default }` or `{ key: local = default }`.
                if let Some(left) = entry.child_by_field_name("left") {
                    match left.kind() {
                        "shorthand_property_identifier_pattern" => {
                            let name = node_text(left, source);
                            bind_key(&name, &name, fixture_map, bindings);
                        }
                        "pair_pattern" => {
                            collect_pair_binding(left, source, fixture_map, bindings);
                        }
                        _ => {}
                    }
                }
            }
            "pair_pattern" => collect_pair_binding(entry, source, fixture_map, bindings),
            _ => {}
        }
    }
}

fn collect_pair_binding(
    pair: Node<'_>,
    source: &str,
    fixture_map: &FixtureMap,
    bindings: &mut FixtureBindings,
) {
    let Some(key_node) = pair.child_by_field_name("key") else {
        return;
    };
    let key = match key_node.kind() {
        "string" => string_literal_value(key_node, source).unwrap_or_default(),
        _ => node_text(key_node, source),
    };
    if key.is_empty() {
        return;
    }
    let Some(value) = pair.child_by_field_name("value") else {
        return;
    };
    match value.kind() {
        "identifier" => bind_key(&key, &node_text(value, source), fixture_map, bindings),
        "assignment_pattern" => {
            if let Some(left) = value.child_by_field_name("left") {
                match left.kind() {
                    "identifier" => {
                        bind_key(&key, &node_text(left, source), fixture_map, bindings)
                    }
                    "object_pattern" => {
                        collect_nested_binding(&key, left, source, fixture_map, bindings)
                    }
                    _ => {}
                }
            }
        }
        "object_pattern" => collect_nested_binding(&key, value, source, fixture_map, bindings),
        _ => {}
    }
}

fn bind_key(key: &str, local: &str, fixture_map: &FixtureMap, bindings: &mut FixtureBindings) {
    bindings.bound_keys.insert(key.to_string());
    if fixture_map.fixture_key_to_class.contains_key(key) {
        let class = fixture_map.fixture_key_to_class[key].clone();
        bindings.var_to_class.insert(local.to_string(), class);
    }
}

/// Nested pattern (`{ myPage: { open } }`): the key still counts for the
/// prefilter; the nested locals are destructured members whose identity is
/// deliberately uncertain.
fn collect_nested_binding(
    key: &str,
    pattern: Node<'_>,
    source: &str,
    fixture_map: &FixtureMap,
    bindings: &mut FixtureBindings,
) {
    bindings.bound_keys.insert(key.to_string());
    if !fixture_map.fixture_key_to_class.contains_key(key) {
        return;
    }
    let mut stack = vec![pattern];
    while let Some(node) = stack.pop() {
        if matches!(
            node.kind(),
            "identifier" | "shorthand_property_identifier_pattern"
        ) {
            bindings.alias_vars.insert(node_text(node, source));
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }
}

#[derive(Debug, Default)]
pub struct CallSites {
    pub precise: usize,
    pub uncertain: usize,
    pub alias_calls: usize,
    pub warnings: Vec<String>,
}

/// Classify every call expression in the spec against the fixture bindings.
pub fn classify_call_sites(
    parsed: &ParsedFile,
    bindings: &FixtureBindings,
    impacted_methods_by_class: &MethodsByClass,
) -> CallSites {
    let source = parsed.source.as_str();
    let mut sites = CallSites::default();

    // First pass: aliases created anywhere in the spec body.
    let mut alias_vars = bindings.alias_vars.clone();
    let mut stack = vec![parsed.root()];
    while let Some(node) = stack.pop() {
        if node.kind() == "variable_declarator" {
            collect_alias_declaration(node, source, bindings, &mut alias_vars);
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }

    // Second pass: classify the call sites.
    let mut stack = vec![parsed.root()];
    while let Some(node) = stack.pop() {
        if node.kind() == "call_expression" {
            if let Some(callee) = node.child_by_field_name("function") {
                classify_callee(
                    callee,
                    source,
                    bindings,
                    &alias_vars,
                    impacted_methods_by_class,
                    &mut sites,
                );
            }
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }
    sites
}

/// `const f = var.open` or `const { open } = var` creates aliases whose
/// later calls count as uncertain.
fn collect_alias_declaration(
    declarator: Node<'_>,
    source: &str,
    bindings: &FixtureBindings,
    alias_vars: &mut BTreeSet<String>,
) {
    let (Some(name), Some(value)) = (
        declarator.child_by_field_name("name"),
        declarator.child_by_field_name("value"),
    ) else {
        return;
    };
    match name.kind() {
        "identifier" => {
            if matches!(value.kind(), "member_expression" | "subscript_expression") {
                if let Some(root) = chain_root_identifier(value, source) {
                    if bindings.var_to_class.contains_key(&root) {
                        alias_vars.insert(node_text(name, source));
                    }
                }
            }
        }
        "object_pattern" => {
            if value.kind() == "identifier"
                && bindings
                    .var_to_class
                    .contains_key(&node_text(value, source))
            {
                let mut stack = vec![name];
                while let Some(node) = stack.pop() {
                    if matches!(
                        node.kind(),
                        "identifier" | "shorthand_property_identifier_pattern"
                    ) {
                        alias_vars.insert(node_text(node, source));
                    }
                    let mut cursor = node.walk();
                    for child in node.named_children(&mut cursor) {
                        stack.push(child);
                    }
                }
            }
        }
        _ => {}
    }
}

fn classify_callee(
    callee: Node<'_>,
    source: &str,
    bindings: &FixtureBindings,
    alias_vars: &BTreeSet<String>,
    impacted_methods_by_class: &MethodsByClass,
    sites: &mut CallSites,
) {
    match callee.kind() {
        "identifier" => {
            let name = node_text(callee, source);
            if alias_vars.contains(&name) {
                sites.uncertain += 1;
                sites.alias_calls += 1;
                sites
                    .warnings
                    .push(format!("uncertain alias call {name}(...)"));
            }
        }
        "member_expression" | "subscript_expression" => {
            let Some(chain) = analyze_chain(callee, source) else {
                return;
            };
            let Some(class) = bindings.var_to_class.get(&chain.root) else {
                return;
            };
            match chain.callee_name {
                None => {
                    sites.uncertain += 1;
                    sites.warnings.push(format!(
                        "uncertain dynamic call {}[...](...)",
                        chain.root
                    ));
                }
                Some(name) if chain.depth > 2 => {
                    sites.uncertain += 1;
                    sites.warnings.push(format!(
                        "uncertain deep chain {}...{name}(...) (depth {})",
                        chain.root, chain.depth
                    ));
                }
                Some(name) => {
                    if impacted_methods_by_class
                        .get(class)
                        .is_some_and(|names| names.contains(&name))
                    {
                        sites.precise += 1;
                    }
                }
            }
        }
        _ => {}
    }
}

struct Chain {
    root: String,
    /// Property and index accesses between the root identifier and the
    /// call, callee name included.
    depth: usize,
    /// Statically-known callee name; `None` for a non-literal subscript.
    callee_name: Option<String>,
}

fn analyze_chain(callee: Node<'_>, source: &str) -> Option<Chain> {
    let callee_name = match callee.kind() {
        "member_expression" => {
            let property = callee.child_by_field_name("property")?;
            let name = node_text(property, source);
            (!name.is_empty()).then_some(name)
        }
        "subscript_expression" => {
            let index = callee.child_by_field_name("index")?;
            string_literal_value(index, source).filter(|name| !name.is_empty())
        }
        _ => return None,
    };

    let mut depth = 1usize;
    let mut current = callee.child_by_field_name("object")?;
    loop {
        match current.kind() {
            "identifier" => {
                return Some(Chain {
                    root: node_text(current, source),
                    depth,
                    callee_name,
                });
            }
            "member_expression" | "subscript_expression" => {
                depth += 1;
                current = current.child_by_field_name("object")?;
            }
            "await_expression" | "parenthesized_expression" | "non_null_expression" => {
                current = current.named_child(0)?;
            }
            _ => return None,
        }
    }
}

fn chain_root_identifier(node: Node<'_>, source: &str) -> Option<String> {
    let mut current = node;
    loop {
        match current.kind() {
            "identifier" => return Some(node_text(current, source)),
            "member_expression" | "subscript_expression" => {
                current = current.child_by_field_name("object")?;
            }
            _ => return None,
        }
    }
}
