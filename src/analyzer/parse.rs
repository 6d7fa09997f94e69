//! TypeScript parsing with a per-run AST cache.
//!
//! Trees are cached by `(revision, path)` with the content hash stored
//! alongside; inputs are immutable for the duration of a run, so one parse
//! per revision of a file is enough.

use crate::source::{Revision, RevisionReader};
use crate::util;
use anyhow::Result;
use blake3::Hasher;
use std::collections::HashMap;
use std::rc::Rc;
use tree_sitter::{Node, Parser, Tree};

/// A parsed revision of one file.
pub struct ParsedFile {
    pub path: String,
    pub source: String,
    pub content_hash: String,
    pub tree: Tree,
}

impl ParsedFile {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }
}

/// Outcome of loading a file revision through the cache.
pub enum LoadOutcome {
    Parsed(Rc<ParsedFile>),
    /// The revision could not be read (missing file, backend error).
    ReadFailed(String),
    /// The content was read but the parser produced no tree.
    ParseFailed,
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex()[..16].to_string()
}

/// Parser pair (plain TypeScript and TSX) plus the per-run cache.
pub struct ParseService {
    ts: Parser,
    tsx: Parser,
    cache: HashMap<(Revision, String), Option<Rc<ParsedFile>>>,
}

impl ParseService {
    pub fn new() -> Result<Self> {
        let mut ts = Parser::new();
        ts.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())?;
        let mut tsx = Parser::new();
        tsx.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into())?;
        Ok(ParseService {
            ts,
            tsx,
            cache: HashMap::new(),
        })
    }

    /// Parse `content` as the given (revision, path), consulting the cache.
    /// Returns `None` when the parser cannot produce a tree.
    pub fn parse_content(
        &mut self,
        path: &str,
        revision: &Revision,
        content: &str,
    ) -> Option<Rc<ParsedFile>> {
        let key = (revision.clone(), path.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let parser = if util::dotted_extension(path) == ".tsx" {
            &mut self.tsx
        } else {
            &mut self.ts
        };
        let parsed = parser.parse(content, None).map(|tree| {
            Rc::new(ParsedFile {
                path: path.to_string(),
                source: content.to_string(),
                content_hash: content_hash(content),
                tree,
            })
        });
        self.cache.insert(key, parsed.clone());
        parsed
    }

    /// Read a revision through the reader and parse it.
    pub fn load(
        &mut self,
        reader: &dyn RevisionReader,
        path: &str,
        revision: &Revision,
    ) -> LoadOutcome {
        let key = (revision.clone(), path.to_string());
        if let Some(cached) = self.cache.get(&key) {
            return match cached {
                Some(parsed) => LoadOutcome::Parsed(parsed.clone()),
                None => LoadOutcome::ParseFailed,
            };
        }
        let content = match reader.read(path, revision) {
            Ok(content) => content,
            Err(err) => return LoadOutcome::ReadFailed(format!("{err:#}")),
        };
        match self.parse_content(path, revision, &content) {
            Some(parsed) => LoadOutcome::Parsed(parsed),
            None => LoadOutcome::ParseFailed,
        }
    }
}

/// Text of a node, trimmed.
pub fn node_text(node: Node<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Content of a string literal node without quotes, when it is a plain
/// single-fragment string.
pub fn string_literal_value(node: Node<'_>, source: &str) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let mut cursor = node.walk();
    let fragments: Vec<Node<'_>> = node
        .named_children(&mut cursor)
        .filter(|child| child.kind() == "string_fragment")
        .collect();
    match fragments.as_slice() {
        [] => Some(String::new()),
        [fragment] => Some(node_text(*fragment, source)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_both_dialects() {
        let mut service = ParseService::new().unwrap();
        let ts = service
            .parse_content("src/a.ts", &Revision::WorkingTree, "class A {}")
            .unwrap();
        assert_eq!(ts.root().kind(), "program");
        let tsx = service
            .parse_content("src/a.tsx", &Revision::WorkingTree, "const x = <div/>;")
            .unwrap();
        assert_eq!(tsx.root().kind(), "program");
    }

    #[test]
    fn cache_returns_same_tree() {
        let mut service = ParseService::new().unwrap();
        let first = service
            .parse_content("src/a.ts", &Revision::WorkingTree, "class A {}")
            .unwrap();
        let second = service
            .parse_content("src/a.ts", &Revision::WorkingTree, "ignored-on-hit")
            .unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn string_literal_extraction() {
        let mut service = ParseService::new().unwrap();
        let parsed = service
            .parse_content("src/a.ts", &Revision::WorkingTree, "const s = \"open\";")
            .unwrap();
        let mut found = None;
        let mut stack = vec![parsed.root()];
        while let Some(node) = stack.pop() {
            if node.kind() == "string" {
                found = string_literal_value(node, &parsed.source);
                break;
            }
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                stack.push(child);
            }
        }
        assert_eq!(found.as_deref(), Some("open"));
    }
}
