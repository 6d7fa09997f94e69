//! Semantic fingerprints of AST subtrees.
//!
//! A fingerprint is the blake3 digest of a normalized rendering of a
//! subtree: comments dropped, all whitespace collapsed to single spaces
//! between tokens. Two subtrees fingerprint equal iff they are the same
//! code modulo formatting and comments.

use crate::source::Revision;
use blake3::Hasher;
use std::collections::HashMap;
use tree_sitter::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintKind {
    /// Whole member node: modifiers, signature and body.
    Member,
    /// Signature-only rendering of a bodyless overload.
    Signature,
    /// One top-level runtime statement.
    TopLevel,
}

/// Memo table keyed by (revision, path, byte span, kind). Spans are unique
/// within one revision of a file, so the normalized text never has to be
/// re-rendered for a node the detector visits twice.
#[derive(Default)]
pub struct FingerprintCache {
    memo: HashMap<(Revision, String, usize, usize, FingerprintKind), String>,
}

impl FingerprintCache {
    pub fn fingerprint(
        &mut self,
        revision: &Revision,
        path: &str,
        kind: FingerprintKind,
        node: Node<'_>,
        source: &str,
    ) -> String {
        let key = (
            revision.clone(),
            path.to_string(),
            node.start_byte(),
            node.end_byte(),
            kind,
        );
        if let Some(hit) = self.memo.get(&key) {
            return hit.clone();
        }
        let value = fingerprint_node(node, source);
        self.memo.insert(key, value.clone());
        value
    }
}

/// Fingerprint a single node without memoization.
pub fn fingerprint_node(node: Node<'_>, source: &str) -> String {
    let mut text = String::new();
    render_tokens(node, source, &mut text);
    digest(&text)
}

/// Combine several fingerprints into one (member = overload signatures plus
/// implementation body).
pub fn combine(parts: &[String]) -> String {
    let mut hasher = Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x00");
    }
    format!("fp_{}", &hasher.finalize().to_hex()[..16])
}

fn digest(text: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(text.as_bytes());
    format!("fp_{}", &hasher.finalize().to_hex()[..16])
}

/// Append the normalized token stream of `node`: every leaf token except
/// comments, separated by single spaces.
fn render_tokens(node: Node<'_>, source: &str, out: &mut String) {
    if node.kind() == "comment" {
        return;
    }
    if node.child_count() == 0 {
        let text = source.get(node.start_byte()..node.end_byte()).unwrap_or("");
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            // Collapse any internal whitespace (multi-line string tokens).
            let mut last_space = false;
            for ch in trimmed.chars() {
                if ch.is_whitespace() {
                    if !last_space {
                        out.push(' ');
                        last_space = true;
                    }
                } else {
                    out.push(ch);
                    last_space = false;
                }
            }
        }
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        render_tokens(child, source, out);
    }
}
