//! Module-reference extraction and resolution.
//!
//! References come from static imports, re-exports, dynamic `import(...)`,
//! `require(...)` calls, and string literals that look like filenames with
//! an extension. Resolution tries relative paths, tsconfig-style path
//! aliases, and a parent-directory filename fallback for asset literals.

use crate::analyzer::parse::{node_text, string_literal_value, ParsedFile};
use crate::util;
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use std::collections::HashSet;
use tree_sitter::Node;

/// Extensions that resolve as dependencies but are never traversed.
pub const ASSET_EXTENSIONS: &[&str] = &[".json", ".yml", ".yaml"];

/// Collect every module reference in a parsed file, deduplicated, in
/// source order of first appearance.
pub fn extract_module_refs(parsed: &ParsedFile) -> Vec<String> {
    let source = parsed.source.as_str();
    let mut seen = BTreeSet::new();
    let mut refs = Vec::new();
    let mut push = |value: String, seen: &mut BTreeSet<String>, refs: &mut Vec<String>| {
        let value = value.trim().to_string();
        if !value.is_empty() && seen.insert(value.clone()) {
            refs.push(value);
        }
    };

    let mut stack = vec![parsed.root()];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "import_statement" | "export_statement" => {
                if let Some(source_node) = node.child_by_field_name("source") {
                    if let Some(value) = string_literal_value(source_node, source) {
                        push(value, &mut seen, &mut refs);
                    }
                }
            }
            "call_expression" => {
                if let Some(callee) = node.child_by_field_name("function") {
                    let callee_text = node_text(callee, source);
                    if callee_text == "require" || callee_text == "import" {
                        if let Some(value) = first_string_argument(node, source) {
                            push(value, &mut seen, &mut refs);
                        }
                    }
                }
            }
            "string" => {
                if let Some(value) = string_literal_value(node, source) {
                    if looks_like_file_literal(&value) {
                        push(value, &mut seen, &mut refs);
                    }
                }
            }
            _ => {}
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }
    refs
}

fn first_string_argument(call: Node<'_>, source: &str) -> Option<String> {
    let args = call.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    let result = args
        .named_children(&mut cursor)
        .find_map(|arg| string_literal_value(arg, source));
    result
}

/// A string literal "looks like" a file when it is a plausible path with an
/// extension: no whitespace, path-ish characters only, short alphanumeric
/// extension.
fn looks_like_file_literal(value: &str) -> bool {
    if value.len() > 256 || value.contains(char::is_whitespace) {
        return false;
    }
    if !value
        .chars()
        .all(|ch| ch.is_alphanumeric() || matches!(ch, '.' | '/' | '_' | '-' | '@'))
    {
        return false;
    }
    let Some((stem, ext)) = value.rsplit_once('.') else {
        return false;
    };
    if stem.is_empty() || stem.ends_with('/') {
        return false;
    }
    (1..=5).contains(&ext.len()) && ext.chars().all(|ch| ch.is_ascii_alphanumeric())
}

/// Strip `//` and `/* */` comments from JSON-with-comments, preserving
/// string contents.
pub fn strip_jsonc_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    let mut escaped = false;
    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Path aliases from a tsconfig-like file: `compilerOptions.baseUrl` plus
/// `compilerOptions.paths` single-wildcard patterns.
#[derive(Debug, Clone, Default)]
pub struct PathAliases {
    base_url: String,
    /// (prefix, suffix, targets) triples from splitting each pattern at `*`;
    /// exact patterns have an empty suffix and `None` capture.
    patterns: Vec<AliasPattern>,
}

#[derive(Debug, Clone)]
struct AliasPattern {
    prefix: String,
    suffix: String,
    wildcard: bool,
    targets: Vec<String>,
}

impl PathAliases {
    /// Parse from tsconfig text. Unparseable input yields empty aliases.
    pub fn parse(text: &str) -> Result<PathAliases> {
        let stripped = strip_jsonc_comments(text);
        let root: Value =
            serde_json::from_str(&stripped).context("parse tsconfig-like JSON")?;
        let mut aliases = PathAliases::default();
        let Some(options) = root.get("compilerOptions") else {
            return Ok(aliases);
        };
        if let Some(base) = options.get("baseUrl").and_then(Value::as_str) {
            aliases.base_url = base.trim_start_matches("./").trim_end_matches('/').to_string();
        }
        if let Some(paths) = options.get("paths").and_then(Value::as_object) {
            for (pattern, targets) in paths {
                let targets: Vec<String> = targets
                    .as_array()
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .map(|t| t.trim_start_matches("./").to_string())
                            .collect()
                    })
                    .unwrap_or_default();
                if targets.is_empty() {
                    continue;
                }
                let (prefix, suffix, wildcard) = match pattern.split_once('*') {
                    Some((prefix, suffix)) => (prefix.to_string(), suffix.to_string(), true),
                    None => (pattern.clone(), String::new(), false),
                };
                aliases.patterns.push(AliasPattern {
                    prefix,
                    suffix,
                    wildcard,
                    targets,
                });
            }
        }
        Ok(aliases)
    }

    /// Candidate repo-relative paths for an aliased specifier, in pattern
    /// declaration order.
    fn candidates(&self, specifier: &str) -> Vec<String> {
        let mut out = Vec::new();
        for pattern in &self.patterns {
            let captured = if pattern.wildcard {
                let rest = match specifier.strip_prefix(pattern.prefix.as_str()) {
                    Some(rest) => rest,
                    None => continue,
                };
                match rest.strip_suffix(pattern.suffix.as_str()) {
                    Some(mid) => Some(mid),
                    None => continue,
                }
            } else if specifier == pattern.prefix {
                None
            } else {
                continue;
            };
            for target in &pattern.targets {
                let resolved = match captured {
                    Some(mid) => target.replacen('*', mid, 1),
                    None => target.clone(),
                };
                out.push(self.under_base(&resolved));
            }
        }
        out
    }

    fn under_base(&self, rel: &str) -> String {
        if self.base_url.is_empty() || self.base_url == "." {
            rel.to_string()
        } else {
            format!("{}/{rel}", self.base_url)
        }
    }
}

/// Resolves raw module references to repo-relative paths of files that
/// exist in the tree snapshot.
pub struct ImportResolver {
    files: HashSet<String>,
    extensions: Vec<String>,
    aliases: PathAliases,
}

impl ImportResolver {
    pub fn new(files: HashSet<String>, extensions: Vec<String>, aliases: PathAliases) -> Self {
        ImportResolver {
            files,
            extensions,
            aliases,
        }
    }

    pub fn is_asset(path: &str) -> bool {
        let ext = util::dotted_extension(path);
        ASSET_EXTENSIONS.contains(&ext.as_str())
    }

    /// Resolve one reference found in `from_file`.
    pub fn resolve(&self, from_file: &str, raw: &str) -> Option<String> {
        let raw = raw.split(['?', '#']).next().unwrap_or(raw).trim();
        if raw.is_empty() {
            return None;
        }
        if raw.starts_with("./") || raw.starts_with("../") || raw.starts_with('/') {
            let joined = if let Some(abs) = raw.strip_prefix('/') {
                abs.to_string()
            } else {
                let dir = parent_dir(from_file);
                if dir.is_empty() {
                    raw.to_string()
                } else {
                    format!("{dir}/{raw}")
                }
            };
            return self.probe(&normalize_dots(&joined));
        }
        for candidate in self.aliases.candidates(raw) {
            if let Some(found) = self.probe(&normalize_dots(&candidate)) {
                return Some(found);
            }
        }
        // Bare asset literal: fall back to a file-name match, preferring
        // the candidate that shares the longest directory prefix with the
        // referencing file.
        if !raw.contains('/') && raw.contains('.') {
            let from_dir = parent_dir(from_file);
            let mut best: Option<(usize, &String)> = None;
            for file in &self.files {
                if file.rsplit('/').next() != Some(raw) {
                    continue;
                }
                let score = common_prefix_segments(&parent_dir(file), &from_dir);
                let better = match best {
                    Some((best_score, best_file)) => {
                        score > best_score || (score == best_score && file < best_file)
                    }
                    None => true,
                };
                if better {
                    best = Some((score, file));
                }
            }
            return best.map(|(_, file)| file.clone());
        }
        None
    }

    /// Try a normalized repo-relative candidate: as-is when it has an
    /// extension, else with each source extension, else as a directory
    /// index.
    fn probe(&self, rel: &str) -> Option<String> {
        if rel.is_empty() {
            return None;
        }
        if !util::dotted_extension(rel).is_empty() {
            return self.files.contains(rel).then(|| rel.to_string());
        }
        for ext in &self.extensions {
            let candidate = format!("{rel}{ext}");
            if self.files.contains(&candidate) {
                return Some(candidate);
            }
        }
        for ext in &self.extensions {
            let candidate = format!("{rel}/index{ext}");
            if self.files.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

fn parent_dir(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Number of leading path segments two directories share.
fn common_prefix_segments(a: &str, b: &str) -> usize {
    a.split('/')
        .zip(b.split('/'))
        .take_while(|(x, y)| x == y && !x.is_empty())
        .count()
}

/// Collapse `.` and `..` segments of a forward-slash path.
fn normalize_dots(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    // Above the repo root; reference cannot resolve in-repo.
                    return String::new();
                }
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::parse::ParseService;
    use crate::source::Revision;

    fn refs(source: &str) -> Vec<String> {
        let mut service = ParseService::new().unwrap();
        let parsed = service
            .parse_content("src/a.ts", &Revision::WorkingTree, source)
            .unwrap();
        extract_module_refs(&parsed)
    }

    #[test]
    fn extracts_static_dynamic_and_literal_refs() {
        let found = refs(
            r#"
import { A } from "./a";
export { B } from "@app/b";
const lazy = await import("./lazy");
const legacy = require("../legacy");
const data = loadFixture("users.json");
const message = "hello world";
"#,
        );
        assert!(found.contains(&"./a".to_string()));
        assert!(found.contains(&"@app/b".to_string()));
        assert!(found.contains(&"./lazy".to_string()));
        assert!(found.contains(&"../legacy".to_string()));
        assert!(found.contains(&"users.json".to_string()));
        assert!(!found.iter().any(|r| r.contains("hello")));
    }

    #[test]
    fn jsonc_comments_are_stripped() {
        let text = r#"{
  // line comment
  "compilerOptions": {
    /* block
       comment */
    "baseUrl": ".",
    "paths": { "@app/*": ["src/*"] } // trailing
  }
}"#;
        let aliases = PathAliases::parse(text).unwrap();
        assert_eq!(aliases.candidates("@app/pages/login"), vec!["src/pages/login"]);
    }

    #[test]
    fn comment_markers_inside_strings_survive() {
        let text = r#"{ "compilerOptions": { "baseUrl": "a//b" } }"#;
        let aliases = PathAliases::parse(text).unwrap();
        assert_eq!(aliases.under_base("x"), "a//b/x");
    }

    fn resolver(files: &[&str]) -> ImportResolver {
        let aliases = PathAliases::parse(
            r#"{ "compilerOptions": { "baseUrl": ".", "paths": { "@pom/*": ["src/pom/*"] } } }"#,
        )
        .unwrap();
        ImportResolver::new(
            files.iter().map(|f| f.to_string()).collect(),
            vec![".ts".to_string(), ".tsx".to_string()],
            aliases,
        )
    }

    #[test]
    fn resolves_relative_alias_and_index() {
        let r = resolver(&[
            "src/pom/login.ts",
            "src/util/index.ts",
            "tests/data/users.json",
            "tests/cart/cart.spec.ts",
        ]);
        assert_eq!(
            r.resolve("tests/cart/cart.spec.ts", "../../src/util"),
            Some("src/util/index.ts".to_string())
        );
        assert_eq!(
            r.resolve("tests/cart/cart.spec.ts", "@pom/login"),
            Some("src/pom/login.ts".to_string())
        );
        assert_eq!(
            r.resolve("tests/cart/cart.spec.ts", "users.json"),
            Some("tests/data/users.json".to_string())
        );
        assert_eq!(r.resolve("tests/cart/cart.spec.ts", "missing"), None);
    }

    #[test]
    fn references_escaping_the_root_do_not_resolve() {
        let r = resolver(&["src/a.ts"]);
        assert_eq!(r.resolve("src/a.ts", "../../outside"), None);
    }
}
