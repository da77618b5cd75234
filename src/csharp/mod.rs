//! C# parsing helpers shared by the EF, migration and inline-SQL stages.
//!
//! Parsing is purely syntactic: tree-sitter gives us declarations,
//! invocation chains and literals, which is all the downstream analyses
//! need. Parsers are pooled because creating one and loading the grammar is
//! far more expensive than a parse.

pub mod ef;
pub mod inline_sql;
pub mod migrations;

use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Mutex;
use tree_sitter::{Node as SyntaxNode, Parser, Tree};

/// Ready-to-use parsers configured with the C# grammar.
static PARSER_POOL: Lazy<Mutex<Vec<Parser>>> = Lazy::new(|| Mutex::new(Vec::new()));

const MAX_POOLED_PARSERS: usize = 8;

fn get_parser() -> Option<Parser> {
    {
        let mut pool = PARSER_POOL
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parser) = pool.pop() {
            return Some(parser);
        }
    }
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_c_sharp::LANGUAGE.into())
        .ok()?;
    Some(parser)
}

fn return_parser(parser: Parser) {
    let mut pool = PARSER_POOL
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if pool.len() < MAX_POOLED_PARSERS {
        pool.push(parser);
    }
}

/// Parse a C# source file. `None` means the parser could not produce a
/// tree at all; a tree with error nodes still comes back `Some` and the
/// walkers simply see less.
pub fn parse_csharp(source: &str) -> Option<Tree> {
    let mut parser = get_parser()?;
    let tree = parser.parse(source, None);
    return_parser(parser);
    tree
}

/// UTF-8 text of a node, empty on decode failure.
pub fn node_text<'s>(node: SyntaxNode<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// 1-based line of the node's first character.
pub fn line_of(node: SyntaxNode<'_>) -> usize {
    node.start_position().row + 1
}

/// Depth-first collection of all nodes with one of the given kinds.
pub fn collect_nodes<'t>(root: SyntaxNode<'t>, kinds: &[&str]) -> Vec<SyntaxNode<'t>> {
    let mut found = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if kinds.contains(&node.kind()) {
            found.push(node);
        }
        let mut cursor = node.walk();
        // Reverse keeps the DFS in source order once popped.
        let children: Vec<SyntaxNode<'t>> = node.children(&mut cursor).collect();
        for child in children.into_iter().rev() {
            stack.push(child);
        }
    }
    found
}

/// The `name` field of a declaration, falling back to its first bare
/// identifier child.
pub fn identifier_of(node: SyntaxNode<'_>, source: &str) -> Option<String> {
    if let Some(name) = node.child_by_field_name("name") {
        return Some(node_text(name, source).to_string());
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() == "identifier" {
            return Some(node_text(child, source).to_string());
        }
    }
    None
}

const TYPE_DECLARATIONS: [&str; 3] = [
    "class_declaration",
    "struct_declaration",
    "record_declaration",
];

const NAMESPACE_DECLARATIONS: [&str; 2] = [
    "namespace_declaration",
    "file_scoped_namespace_declaration",
];

/// Fully qualified identity of a type declaration: namespace chain plus
/// enclosing type chain.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeIdentity {
    pub simple_name: String,
    pub full_name: String,
    pub namespace: String,
}

pub fn type_identity(decl: SyntaxNode<'_>, source: &str) -> Option<TypeIdentity> {
    let simple_name = identifier_of(decl, source)?;
    let mut namespaces: Vec<String> = Vec::new();
    let mut enclosing_types: Vec<String> = Vec::new();
    let mut current = decl;
    while let Some(parent) = current.parent() {
        if TYPE_DECLARATIONS.contains(&parent.kind()) {
            if let Some(name) = identifier_of(parent, source) {
                enclosing_types.push(name);
            }
        } else if NAMESPACE_DECLARATIONS.contains(&parent.kind()) {
            if let Some(name) = identifier_of(parent, source) {
                namespaces.push(name);
            }
        }
        current = parent;
    }
    namespaces.reverse();
    enclosing_types.reverse();

    let namespace = namespaces.join(".");
    let mut parts: Vec<&str> = Vec::new();
    if !namespace.is_empty() {
        parts.push(&namespace);
    }
    for t in &enclosing_types {
        parts.push(t);
    }
    parts.push(&simple_name);
    let full_name = parts.join(".");
    Some(TypeIdentity {
        simple_name,
        full_name,
        namespace,
    })
}

/// Nearest enclosing method-like declaration.
pub fn enclosing_method<'t>(node: SyntaxNode<'t>) -> Option<SyntaxNode<'t>> {
    let mut current = node;
    while let Some(parent) = current.parent() {
        if matches!(
            parent.kind(),
            "method_declaration" | "constructor_declaration" | "local_function_statement"
        ) {
            return Some(parent);
        }
        current = parent;
    }
    None
}

const STRING_LITERAL_KINDS: [&str; 4] = [
    "string_literal",
    "verbatim_string_literal",
    "raw_string_literal",
    "interpolated_string_expression",
];

pub fn is_string_literal_kind(kind: &str) -> bool {
    STRING_LITERAL_KINDS.contains(&kind)
}

static INTERPOLATION_HOLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

/// Decode the value of a string-literal expression from its source slice.
/// Interpolation holes in `$"..."` literals are neutralized to `0`, mirroring
/// the deploy-variable substitution on the SQL side.
pub fn string_literal_value(node: SyntaxNode<'_>, source: &str) -> Option<String> {
    let raw = node_text(node, source);
    match node.kind() {
        "string_literal" => {
            let inner = raw.strip_prefix('"')?.strip_suffix('"')?;
            Some(unescape(inner))
        }
        "verbatim_string_literal" => {
            let inner = raw.strip_prefix("@\"")?.strip_suffix('"')?;
            Some(inner.replace("\"\"", "\""))
        }
        "raw_string_literal" => {
            let inner = raw
                .trim_start_matches('"')
                .trim_end_matches('"');
            Some(inner.to_string())
        }
        "interpolated_string_expression" => {
            let body = raw.strip_prefix('$')?;
            let body = body.strip_prefix("@\"").or_else(|| body.strip_prefix('"'))?;
            let body = body.strip_suffix('"')?;
            let filled = INTERPOLATION_HOLE.replace_all(body, "0");
            Some(filled.replace("{{", "{").replace("}}", "}"))
        }
        _ => None,
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// Arguments of an invocation, as raw source slices in order.
pub fn argument_texts<'s>(invocation: SyntaxNode<'_>, source: &'s str) -> Vec<&'s str> {
    let Some(args) = invocation.child_by_field_name("arguments") else {
        return Vec::new();
    };
    let mut cursor = args.walk();
    args.children(&mut cursor)
        .filter(|c| c.kind() == "argument")
        .map(|c| node_text(c, source))
        .collect()
}

/// The simple method name an invocation calls: `a.b.Query(...)` -> `Query`.
pub fn invoked_method_name(invocation: SyntaxNode<'_>, source: &str) -> Option<String> {
    let function = invocation.child_by_field_name("function")?;
    match function.kind() {
        "member_access_expression" => function
            .child_by_field_name("name")
            .map(|n| strip_generic_suffix(node_text(n, source))),
        "identifier" => Some(node_text(function, source).to_string()),
        "generic_name" => Some(strip_generic_suffix(node_text(function, source))),
        _ => None,
    }
}

/// `AddColumn<int>` -> `AddColumn`.
pub fn strip_generic_suffix(name: &str) -> String {
    match name.find('<') {
        Some(idx) => name[..idx].to_string(),
        None => name.to_string(),
    }
}
