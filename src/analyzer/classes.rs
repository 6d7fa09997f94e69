//! Class models extracted from one file revision.
//!
//! The model captures exactly what the change detector and the propagation
//! engine need: member identities with semantic fingerprints, the composed
//! fields of each class, the `this.*` call shapes found in callable bodies,
//! and the file's top-level runtime fingerprint.

use crate::analyzer::fingerprint::{combine, FingerprintCache, FingerprintKind};
use crate::analyzer::parse::{node_text, string_literal_value, ParsedFile};
use crate::source::Revision;
use crate::util;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use tree_sitter::Node;

/// Member classification. A getter and a setter sharing a name are distinct
/// identities; a property replaced by a method of the same name must show up
/// as a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemberKind {
    Constructor,
    Call,
    Get,
    Set,
    Field,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemberIdentity {
    pub kind: MemberKind,
    pub name: String,
}

/// A `this.*` call shape found inside a callable body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThisCall {
    /// `this.<name>(...)` or `this["<literal>"](...)`.
    Method(String),
    /// `super.<name>(...)`.
    SuperMethod(String),
    /// `this.<field>.<name>(...)` or `this.<field>["<literal>"](...)`.
    ComposedMethod { field: String, method: String },
    /// `this[<non-literal>](...)` — any callable of the class may run.
    DynamicIndex,
    /// `this.a.b....<name>(...)` with two or more links before the callee.
    DeepChain,
}

#[derive(Debug, Clone)]
pub struct MemberModel {
    pub name: String,
    pub kind: MemberKind,
    pub callable: bool,
    /// Combined fingerprint: overload signatures then implementation.
    pub fingerprint: String,
    pub this_calls: Vec<ThisCall>,
}

#[derive(Debug, Clone, Default)]
pub struct ClassModel {
    pub name: String,
    pub members: BTreeMap<MemberIdentity, MemberModel>,
    /// Field name -> composed class name, from declared field types and
    /// constructor-body `this.<field> = new <Type>(...)` assignments.
    pub composed_fields: BTreeMap<String, String>,
}

impl ClassModel {
    /// Names of members that can be invoked: constructors, methods,
    /// accessors and function-valued fields.
    pub fn callable_names(&self) -> BTreeSet<String> {
        self.members
            .values()
            .filter(|member| member.callable)
            .map(|member| member.name.clone())
            .collect()
    }

    pub fn has_callable(&self, name: &str) -> bool {
        self.members
            .values()
            .any(|member| member.callable && member.name == name)
    }

    pub fn callable_members(&self) -> impl Iterator<Item = &MemberModel> {
        self.members.values().filter(|member| member.callable)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FileModel {
    pub classes: BTreeMap<String, ClassModel>,
    /// Concatenated fingerprint of every top-level runtime statement.
    pub top_level_runtime_fp: String,
}

/// Build the model for one parsed revision.
pub fn build_file_model(
    parsed: &ParsedFile,
    revision: &Revision,
    fps: &mut FingerprintCache,
) -> FileModel {
    let mut model = FileModel::default();
    let root = parsed.root();
    let source = parsed.source.as_str();

    let mut runtime_parts = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        if let Some(class_node) = class_declaration_of(child) {
            if let Some(class) = extract_class(class_node, parsed, revision, fps) {
                model.classes.insert(class.name.clone(), class);
            }
        }
        if !is_type_only_top_level(child) {
            runtime_parts.push(fps.fingerprint(
                revision,
                &parsed.path,
                FingerprintKind::TopLevel,
                child,
                source,
            ));
        }
    }
    model.top_level_runtime_fp = combine(&runtime_parts);
    model
}

/// Unwrap `export class ...`; returns the class node if `node` declares one.
fn class_declaration_of(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "class_declaration" | "abstract_class_declaration" => Some(node),
        "export_statement" => {
            let decl = node.child_by_field_name("declaration")?;
            match decl.kind() {
                "class_declaration" | "abstract_class_declaration" => Some(decl),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Top-level statements that do not exist at runtime: type-only imports and
/// exports, interface and type-alias declarations, ambient declarations, and
/// class declarations (class bodies are diffed member by member instead).
fn is_type_only_top_level(node: Node<'_>) -> bool {
    match node.kind() {
        "comment"
        | "interface_declaration"
        | "type_alias_declaration"
        | "class_declaration"
        | "abstract_class_declaration"
        | "ambient_declaration" => true,
        "import_statement" => has_type_keyword(node),
        "export_statement" => {
            if has_type_keyword(node) {
                return true;
            }
            match node.child_by_field_name("declaration") {
                Some(decl) => matches!(
                    decl.kind(),
                    "interface_declaration"
                        | "type_alias_declaration"
                        | "class_declaration"
                        | "abstract_class_declaration"
                ),
                None => false,
            }
        }
        _ => false,
    }
}

/// Whether an import/export statement carries a direct `type` keyword
/// (`import type`, `export type`). Inline `{ type Foo }` specifiers do not
/// make the whole statement type-only.
fn has_type_keyword(node: Node<'_>) -> bool {
    let mut cursor = node.walk();
    let result = node
        .children(&mut cursor)
        .any(|child| !child.is_named() && child.kind() == "type");
    result
}

fn extract_class(
    node: Node<'_>,
    parsed: &ParsedFile,
    revision: &Revision,
    fps: &mut FingerprintCache,
) -> Option<ClassModel> {
    let source = parsed.source.as_str();
    let name_node = node.child_by_field_name("name")?;
    let name = node_text(name_node, source);
    if name.is_empty() {
        return None;
    }
    let body = node.child_by_field_name("body")?;

    let mut class = ClassModel {
        name,
        ..ClassModel::default()
    };
    // Fingerprint parts per identity: overload signatures first, then the
    // implementation, in source order.
    let mut parts: BTreeMap<MemberIdentity, Vec<String>> = BTreeMap::new();
    let mut calls: BTreeMap<MemberIdentity, Vec<ThisCall>> = BTreeMap::new();

    let mut cursor = body.walk();
    for member in body.named_children(&mut cursor) {
        match member.kind() {
            "method_definition" | "abstract_method_signature" | "method_signature" => {
                let Some(name_node) = member.child_by_field_name("name") else {
                    continue;
                };
                let member_name = member_name_text(name_node, source);
                if member_name.is_empty() {
                    continue;
                }
                let kind = method_kind(member, &member_name);
                let identity = MemberIdentity {
                    kind,
                    name: member_name,
                };
                let body_node = member.child_by_field_name("body");
                let fp_kind = if body_node.is_some() {
                    FingerprintKind::Member
                } else {
                    FingerprintKind::Signature
                };
                parts.entry(identity.clone()).or_default().push(
                    fps.fingerprint(revision, &parsed.path, fp_kind, member, source),
                );
                if let Some(body_node) = body_node {
                    let sites = calls.entry(identity.clone()).or_default();
                    collect_this_calls(body_node, source, sites);
                    if kind == MemberKind::Constructor {
                        collect_constructor_compositions(body_node, source, &mut class);
                    }
                }
            }
            "public_field_definition" | "field_definition" => {
                let Some(name_node) = member.child_by_field_name("name") else {
                    continue;
                };
                let member_name = member_name_text(name_node, source);
                if member_name.is_empty() {
                    continue;
                }
                let value = member.child_by_field_name("value");
                let callable = value.is_some_and(is_function_valued);
                let identity = MemberIdentity {
                    kind: MemberKind::Field,
                    name: member_name.clone(),
                };
                parts.entry(identity.clone()).or_default().push(
                    fps.fingerprint(
                        revision,
                        &parsed.path,
                        FingerprintKind::Member,
                        member,
                        source,
                    ),
                );
                if callable {
                    let sites = calls.entry(identity).or_default();
                    if let Some(value) = value {
                        collect_this_calls(value, source, sites);
                    }
                }
                if let Some(type_node) = member.child_by_field_name("type") {
                    if let Some(composed) = class_reference_of_annotation(type_node, source) {
                        class.composed_fields.insert(member_name, composed);
                    }
                }
            }
            _ => {}
        }
    }

    for (identity, fp_parts) in parts {
        let callable = identity.kind != MemberKind::Field
            || calls.contains_key(&identity);
        let this_calls = calls.remove(&identity).unwrap_or_default();
        class.members.insert(
            identity.clone(),
            MemberModel {
                name: identity.name.clone(),
                kind: identity.kind,
                callable,
                fingerprint: combine(&fp_parts),
                this_calls,
            },
        );
    }
    Some(class)
}

fn member_name_text(name_node: Node<'_>, source: &str) -> String {
    if name_node.kind() == "string" {
        if let Some(value) = string_literal_value(name_node, source) {
            return value;
        }
    }
    node_text(name_node, source)
}

fn method_kind(node: Node<'_>, name: &str) -> MemberKind {
    if name == "constructor" {
        return MemberKind::Constructor;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.is_named() {
            continue;
        }
        match child.kind() {
            "get" => return MemberKind::Get,
            "set" => return MemberKind::Set,
            _ => {}
        }
    }
    MemberKind::Call
}

fn is_function_valued(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "arrow_function" | "function_expression" | "function" | "generator_function"
    )
}

/// First class-looking reference inside a type annotation.
pub fn class_reference_of_annotation(type_node: Node<'_>, source: &str) -> Option<String> {
    let inner = if type_node.kind() == "type_annotation" {
        type_node.named_child(0)?
    } else {
        type_node
    };
    class_reference_of_type(inner, source)
}

fn class_reference_of_type(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "type_identifier" => {
            let name = node_text(node, source);
            util::looks_like_class_name(&name).then_some(name)
        }
        "nested_type_identifier" => {
            let name = node_text(node.child_by_field_name("name")?, source);
            util::looks_like_class_name(&name).then_some(name)
        }
        "generic_type" => class_reference_of_type(node.child_by_field_name("name")?, source),
        "parenthesized_type" => class_reference_of_type(node.named_child(0)?, source),
        "union_type" | "intersection_type" => {
            let mut cursor = node.walk();
            let result = node
                .named_children(&mut cursor)
                .find_map(|child| class_reference_of_type(child, source));
            result
        }
        _ => None,
    }
}

/// Record `this.<field> = new <Type>(...)` assignments from a constructor
/// body.
fn collect_constructor_compositions(body: Node<'_>, source: &str, class: &mut ClassModel) {
    let mut stack = vec![body];
    while let Some(node) = stack.pop() {
        if node.kind() == "assignment_expression" {
            if let (Some(left), Some(right)) = (
                node.child_by_field_name("left"),
                node.child_by_field_name("right"),
            ) {
                if let Some(field) = this_property_name(left, source) {
                    if let Some(composed) = new_expression_class(right, source) {
                        class.composed_fields.entry(field).or_insert(composed);
                    }
                }
            }
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }
}

/// `this.<name>` -> name.
fn this_property_name(node: Node<'_>, source: &str) -> Option<String> {
    if node.kind() != "member_expression" {
        return None;
    }
    let object = node.child_by_field_name("object")?;
    if object.kind() != "this" {
        return None;
    }
    let property = node.child_by_field_name("property")?;
    let name = node_text(property, source);
    (!name.is_empty()).then_some(name)
}

/// `new <Type>(...)` -> Type, unwrapping awaits and parens.
fn new_expression_class(node: Node<'_>, source: &str) -> Option<String> {
    let mut current = node;
    loop {
        match current.kind() {
            "await_expression" | "parenthesized_expression" => {
                current = current.named_child(0)?;
            }
            "as_expression" | "non_null_expression" | "satisfies_expression" => {
                current = current.named_child(0)?;
            }
            _ => break,
        }
    }
    if current.kind() != "new_expression" {
        return None;
    }
    let constructor = current.child_by_field_name("constructor")?;
    let name = match constructor.kind() {
        "identifier" => node_text(constructor, source),
        "member_expression" => {
            let property = constructor.child_by_field_name("property")?;
            node_text(property, source)
        }
        _ => return None,
    };
    util::looks_like_class_name(&name).then_some(name)
}

/// Walk a callable body and record every `this.*` / `super.*` call shape.
fn collect_this_calls(body: Node<'_>, source: &str, out: &mut Vec<ThisCall>) {
    let mut stack = vec![body];
    while let Some(node) = stack.pop() {
        if node.kind() == "call_expression" {
            if let Some(callee) = node.child_by_field_name("function") {
                if let Some(call) = classify_callee(callee, source) {
                    out.push(call);
                }
            }
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            stack.push(child);
        }
    }
}

fn classify_callee(callee: Node<'_>, source: &str) -> Option<ThisCall> {
    match callee.kind() {
        "member_expression" => {
            let object = callee.child_by_field_name("object")?;
            let property = callee.child_by_field_name("property")?;
            let method = node_text(property, source);
            if method.is_empty() {
                return None;
            }
            match object.kind() {
                "this" => Some(ThisCall::Method(method)),
                "super" => Some(ThisCall::SuperMethod(method)),
                "member_expression" => {
                    let inner_object = object.child_by_field_name("object")?;
                    if inner_object.kind() == "this" {
                        let field = node_text(object.child_by_field_name("property")?, source);
                        (!field.is_empty())
                            .then_some(ThisCall::ComposedMethod { field, method })
                    } else if rooted_at_this(object) {
                        Some(ThisCall::DeepChain)
                    } else {
                        None
                    }
                }
                "subscript_expression" => rooted_at_this(object).then_some(ThisCall::DeepChain),
                _ => None,
            }
        }
        "subscript_expression" => {
            let object = callee.child_by_field_name("object")?;
            let index = callee.child_by_field_name("index")?;
            match object.kind() {
                "this" => match string_literal_value(index, source) {
                    Some(name) if !name.is_empty() => Some(ThisCall::Method(name)),
                    _ => Some(ThisCall::DynamicIndex),
                },
                "member_expression" => {
                    let inner_object = object.child_by_field_name("object")?;
                    if inner_object.kind() == "this" {
                        let field = node_text(object.child_by_field_name("property")?, source);
                        match string_literal_value(index, source) {
                            Some(method) if !method.is_empty() && !field.is_empty() => {
                                Some(ThisCall::ComposedMethod { field, method })
                            }
                            _ => Some(ThisCall::DeepChain),
                        }
                    } else if rooted_at_this(object) {
                        Some(ThisCall::DeepChain)
                    } else {
                        None
                    }
                }
                "subscript_expression" => rooted_at_this(object).then_some(ThisCall::DeepChain),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Whether a member/subscript chain bottoms out at `this`.
fn rooted_at_this(node: Node<'_>) -> bool {
    let mut current = node;
    loop {
        match current.kind() {
            "this" => return true,
            "member_expression" | "subscript_expression" => {
                match current.child_by_field_name("object") {
                    Some(object) => current = object,
                    None => return false,
                }
            }
            _ => return false,
        }
    }
}
