//! Fixture map parsing.
//!
//! A single types-declaration file binds fixture keys (the property names
//! tests destructure) to page-object class names. Type aliases, interfaces,
//! intersections, unions, parenthesized types and `extends` chains are
//! flattened recursively, with memoization and a cycle guard.

use crate::analyzer::classes::class_reference_of_annotation;
use crate::analyzer::parse::{node_text, ParseService};
use crate::source::{Revision, RevisionReader};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tree_sitter::Node;

#[derive(Debug, Clone, Default)]
pub struct FixtureMap {
    pub class_to_fixture_keys: BTreeMap<String, BTreeSet<String>>,
    pub fixture_key_to_class: BTreeMap<String, String>,
}

impl FixtureMap {
    pub fn is_empty(&self) -> bool {
        self.fixture_key_to_class.is_empty()
    }

    /// Fixture keys bound to any of the given classes.
    pub fn keys_for_classes<'a>(
        &self,
        classes: impl IntoIterator<Item = &'a String>,
    ) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        for class in classes {
            if let Some(bound) = self.class_to_fixture_keys.get(class) {
                keys.extend(bound.iter().cloned());
            }
        }
        keys
    }

    fn insert(&mut self, key: &str, class: &str) {
        self.class_to_fixture_keys
            .entry(class.to_string())
            .or_default()
            .insert(key.to_string());
        self.fixture_key_to_class
            .entry(key.to_string())
            .or_insert_with(|| class.to_string());
    }
}

/// Parse the fixture declaration file. A missing file yields empty maps;
/// an unparseable one yields empty maps plus a warning.
pub fn parse_fixture_map(
    parse: &mut ParseService,
    revisions: &dyn RevisionReader,
    path: &str,
    warnings: &mut Vec<String>,
) -> FixtureMap {
    let mut map = FixtureMap::default();
    let content = match revisions.read(path, &Revision::WorkingTree) {
        Ok(content) => content,
        Err(_) => return map,
    };
    let Some(parsed) = parse.parse_content(path, &Revision::WorkingTree, &content) else {
        warnings.push(format!("fixture map: could not parse {path}"));
        return map;
    };

    let source = parsed.source.as_str();
    let root = parsed.root();
    let mut declarations: BTreeMap<String, Node<'_>> = BTreeMap::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        let decl = match child.kind() {
            "type_alias_declaration" | "interface_declaration" => child,
            "export_statement" => match child.child_by_field_name("declaration") {
                Some(decl)
                    if matches!(
                        decl.kind(),
                        "type_alias_declaration" | "interface_declaration"
                    ) =>
                {
                    decl
                }
                _ => continue,
            },
            _ => continue,
        };
        if let Some(name_node) = decl.child_by_field_name("name") {
            let name = node_text(name_node, source);
            if !name.is_empty() {
                declarations.entry(name).or_insert(decl);
            }
        }
    }

    let mut resolver = DeclResolver {
        declarations: &declarations,
        source,
        memo: HashMap::new(),
        in_progress: HashSet::new(),
    };
    for name in declarations.keys() {
        for (key, class) in resolver.pairs_of_decl(name) {
            map.insert(&key, &class);
        }
    }
    map
}

struct DeclResolver<'t, 'd> {
    declarations: &'d BTreeMap<String, Node<'t>>,
    source: &'t str,
    memo: HashMap<String, Vec<(String, String)>>,
    in_progress: HashSet<String>,
}

impl<'t, 'd> DeclResolver<'t, 'd> {
    fn pairs_of_decl(&mut self, name: &str) -> Vec<(String, String)> {
        if let Some(hit) = self.memo.get(name) {
            return hit.clone();
        }
        if !self.in_progress.insert(name.to_string()) {
            // Cycle; the other traversal owns these pairs.
            return Vec::new();
        }
        let pairs = match self.declarations.get(name).copied() {
            Some(decl) => match decl.kind() {
                "type_alias_declaration" => decl
                    .child_by_field_name("value")
                    .map(|value| self.pairs_of_type(value))
                    .unwrap_or_default(),
                "interface_declaration" => {
                    let mut pairs = decl
                        .child_by_field_name("body")
                        .map(|body| self.pairs_of_type(body))
                        .unwrap_or_default();
                    pairs.extend(self.pairs_of_extends(decl));
                    pairs
                }
                _ => Vec::new(),
            },
            None => Vec::new(),
        };
        self.in_progress.remove(name);
        self.memo.insert(name.to_string(), pairs.clone());
        pairs
    }

    fn pairs_of_extends(&mut self, decl: Node<'t>) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let mut cursor = decl.walk();
        for child in decl.named_children(&mut cursor) {
            if !matches!(child.kind(), "extends_type_clause" | "extends_clause") {
                continue;
            }
            let mut clause_cursor = child.walk();
            for base in child.named_children(&mut clause_cursor) {
                let base_name = match base.kind() {
                    "type_identifier" | "identifier" => node_text(base, self.source),
                    "generic_type" => base
                        .child_by_field_name("name")
                        .map(|n| node_text(n, self.source))
                        .unwrap_or_default(),
                    _ => continue,
                };
                if !base_name.is_empty() {
                    pairs.extend(self.pairs_of_decl(&base_name));
                }
            }
        }
        pairs
    }

    fn pairs_of_type(&mut self, node: Node<'t>) -> Vec<(String, String)> {
        match node.kind() {
            "object_type" | "interface_body" => {
                let mut pairs = Vec::new();
                let mut cursor = node.walk();
                for member in node.named_children(&mut cursor) {
                    if member.kind() != "property_signature" {
                        continue;
                    }
                    let Some(name_node) = member.child_by_field_name("name") else {
                        continue;
                    };
                    let key = node_text(name_node, self.source);
                    if key.is_empty() {
                        continue;
                    }
                    let Some(type_node) = member.child_by_field_name("type") else {
                        continue;
                    };
                    if let Some(class) = class_reference_of_annotation(type_node, self.source) {
                        pairs.push((key, class));
                    }
                }
                pairs
            }
            "union_type" | "intersection_type" => {
                let mut pairs = Vec::new();
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    pairs.extend(self.pairs_of_type(child));
                }
                pairs
            }
            "parenthesized_type" => node
                .named_child(0)
                .map(|inner| self.pairs_of_type(inner))
                .unwrap_or_default(),
            "type_identifier" => {
                let name = node_text(node, self.source);
                self.pairs_of_decl(&name)
            }
            "generic_type" => node
                .child_by_field_name("name")
                .map(|name| self.pairs_of_type(name))
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }
}
