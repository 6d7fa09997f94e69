//! Inheritance graph over the analysis roots.
//!
//! Only direct single-class `extends` is modeled; the relation is a forest.
//! A pattern extractor is enough here — mixins, interface implementations
//! and multiple inheritance are out of scope.

use crate::config::SelectionConfig;
use crate::source::{Revision, RevisionReader, TreeLister};
use crate::util;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

#[derive(Debug, Clone, Default)]
pub struct InheritanceGraph {
    /// Child class -> parent class (single parent).
    pub parents_by_child: BTreeMap<String, String>,
    /// Transposed view.
    pub children_by_parent: BTreeMap<String, BTreeSet<String>>,
}

impl InheritanceGraph {
    /// The class itself followed by each ancestor. Stops on a cycle so a
    /// malformed `extends` loop cannot hang resolution.
    pub fn lineage<'a>(&'a self, class: &'a str) -> Vec<&'a str> {
        let mut lineage = vec![class];
        let mut seen: BTreeSet<&str> = BTreeSet::from([class]);
        let mut current = class;
        while let Some(parent) = self.parents_by_child.get(current) {
            if !seen.insert(parent) {
                break;
            }
            lineage.push(parent);
            current = parent;
        }
        lineage
    }

    /// All transitive descendants of a class.
    pub fn descendants(&self, class: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![class.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(children) = self.children_by_parent.get(&current) {
                for child in children {
                    if out.insert(child.clone()) {
                        stack.push(child.clone());
                    }
                }
            }
        }
        out
    }

    fn insert(&mut self, child: &str, parent: &str) {
        self.parents_by_child
            .entry(child.to_string())
            .or_insert_with(|| parent.to_string());
        self.children_by_parent
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }
}

fn extends_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?m)\bclass\s+([A-Za-z_$][A-Za-z0-9_$]*)(?:\s*<[^>{]*>)?\s+extends\s+([A-Za-z_$][A-Za-z0-9_$.]*)",
        )
        .expect("static extends pattern")
    })
}

/// Scan the analysis roots and extract the parent-child relation.
/// Unreadable files are skipped with a warning.
pub fn build_inheritance_graph(
    config: &SelectionConfig,
    tree: &dyn TreeLister,
    revisions: &dyn RevisionReader,
    warnings: &mut Vec<String>,
) -> InheritanceGraph {
    let mut graph = InheritanceGraph::default();
    let pattern = extends_pattern();
    for root in &config.profile.analysis_roots_relative {
        let files = match tree.list(root) {
            Ok(files) => files,
            Err(err) => {
                warnings.push(format!("inheritance scan: list {root}: {err:#}"));
                continue;
            }
        };
        let mut files = files;
        files.sort();
        for path in files {
            if !util::has_source_extension(&path, &config.file_extensions) {
                continue;
            }
            let content = match revisions.read(&path, &Revision::WorkingTree) {
                Ok(content) => content,
                Err(err) => {
                    warnings.push(format!("inheritance scan: read {path}: {err:#}"));
                    continue;
                }
            };
            for captures in pattern.captures_iter(&content) {
                let child = &captures[1];
                let parent = util::rightmost_ident(&captures[2]);
                if util::looks_like_class_name(parent) {
                    graph.insert(child, parent);
                }
            }
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_of(pairs: &[(&str, &str)]) -> InheritanceGraph {
        let mut graph = InheritanceGraph::default();
        for (child, parent) in pairs {
            graph.insert(child, parent);
        }
        graph
    }

    #[test]
    fn pattern_matches_plain_abstract_and_generic_classes() {
        let pattern = extends_pattern();
        let source = r#"
export class LoginPage extends BasePage {}
abstract class Widget extends ns.BaseWidget {}
export class Listing<T> extends PagedView {}
class Standalone {}
"#;
        let pairs: Vec<(String, String)> = pattern
            .captures_iter(source)
            .map(|c| (c[1].to_string(), c[2].to_string()))
            .collect();
        assert!(pairs.contains(&("LoginPage".into(), "BasePage".into())));
        assert!(pairs.contains(&("Widget".into(), "ns.BaseWidget".into())));
        assert!(pairs.contains(&("Listing".into(), "PagedView".into())));
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn lineage_walks_upward() {
        let graph = graph_of(&[("C", "B"), ("B", "A")]);
        assert_eq!(graph.lineage("C"), vec!["C", "B", "A"]);
        assert_eq!(graph.lineage("A"), vec!["A"]);
        assert_eq!(graph.lineage("Unknown"), vec!["Unknown"]);
    }

    #[test]
    fn lineage_survives_cycles() {
        let graph = graph_of(&[("A", "B"), ("B", "A")]);
        assert_eq!(graph.lineage("A"), vec!["A", "B"]);
    }

    #[test]
    fn descendants_are_transitive() {
        let graph = graph_of(&[("B", "A"), ("C", "B"), ("D", "A")]);
        let descendants = graph.descendants("A");
        assert!(descendants.contains("B"));
        assert!(descendants.contains("C"));
        assert!(descendants.contains("D"));
        assert!(!descendants.contains("A"));
    }
}
