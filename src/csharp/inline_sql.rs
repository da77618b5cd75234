// Inline-SQL recovery: finds SQL string literals inside C# sources, parses
// them, and projects method-to-object references onto the graph.
//
// Literals are recognized three ways: as arguments of known data-access
// ("hot") methods, by the SQL-verb heuristic over remaining syntax-tree
// literals, and by a line scan when the file does not parse at all. Every
// recovered literal becomes an artifact with a per-snippet body file and a
// JSONL record; artifacts with no usable method context are dropped after
// the line-span recovery described below fails.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

use crate::artifacts::bodies::{sanitize_component, BodyWriter};
use crate::config::IndexerConfig;
use crate::csharp::{
    collect_nodes, enclosing_method, identifier_of, invoked_method_name, is_string_literal_kind,
    line_of, parse_csharp, string_literal_value, type_identity,
};
use crate::graph::keys::{node_key, split_key, CSHARP_PREFIX, SqlName};
use crate::graph::GraphModel;
use crate::models::{
    BodyRecord, Edge, InlineSqlArtifact, InlineSqlOrigin, Node, NodeKind, Relation,
};
use crate::orchestrator::{CancelFlag, StageStats};
use crate::sql::fallback::FOREIGN_KEY_REFERENCES;
use crate::sql::{analyzer, fallback, relative_to};
use tree_sitter::Node as SyntaxNode;

/// Method names whose string argument is expected to be SQL.
pub const HOT_METHODS: [&str; 8] = [
    "Query",
    "QueryAsync",
    "Execute",
    "ExecuteAsync",
    "ExecuteScalar",
    "ExecuteReader",
    "FromSqlRaw",
    "FromSqlInterpolated",
];

const SQL_VERBS: [&str; 10] = [
    "SELECT", "INSERT", "UPDATE", "DELETE", "MERGE", "WITH", "EXEC", "CREATE", "ALTER", "DROP",
];

static FALLBACK_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""((?:SELECT|INSERT|UPDATE|DELETE|MERGE|WITH|EXEC|CREATE|ALTER|DROP)\b[^"]*)""#)
        .unwrap()
});

pub struct InlineSqlScanner<'a> {
    pub graph: &'a GraphModel,
    pub bodies: &'a BodyWriter,
    pub repo_root: &'a Path,
    pub sql_root: &'a Path,
    pub config: &'a IndexerConfig,
    pub cancel: &'a CancelFlag,
}

impl<'a> InlineSqlScanner<'a> {
    pub fn run(&self, files: &[PathBuf]) -> StageStats {
        let extracted: Vec<(StageStats, Vec<(PathBuf, InlineSqlArtifact)>)> = files
            .par_iter()
            .map(|path| {
                if self.cancel.is_cancelled() {
                    return (StageStats::skipped_file(), Vec::new());
                }
                match self.extract_file(path) {
                    Ok(artifacts) => (
                        StageStats::indexed_file(),
                        artifacts
                            .into_iter()
                            .map(|a| (path.clone(), a))
                            .collect(),
                    ),
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "skipping C# file");
                        (StageStats::failed_file(), Vec::new())
                    }
                }
            })
            .collect();

        let mut stats = StageStats::default();
        let mut artifacts: Vec<(PathBuf, InlineSqlArtifact)> = Vec::new();
        for (s, found) in extracted {
            stats = stats.merge(s);
            artifacts.extend(found);
        }

        for (path, mut artifact) in artifacts {
            if self.cancel.is_cancelled() {
                break;
            }
            if artifact.method_full_name().is_none()
                && !self.recover_method_context(&path, &mut artifact)
            {
                debug!(file = %artifact.file, line = artifact.line, "no method context, dropping snippet");
                continue;
            }
            self.project_artifact(&path, &artifact);
        }
        stats
    }

    fn extract_file(&self, path: &Path) -> Result<Vec<InlineSqlArtifact>> {
        let source = fs::read_to_string(path)?;
        let rel_file = relative_to(path, self.repo_root);
        let Some(tree) = parse_csharp(&source) else {
            return Ok(self.scan_lines(&source, &rel_file));
        };
        let root = tree.root_node();

        let mut artifacts = Vec::new();
        let mut consumed: HashSet<usize> = HashSet::new();

        for invocation in collect_nodes(root, &["invocation_expression"]) {
            let Some(method) = invoked_method_name(invocation, &source) else {
                continue;
            };
            let origin = if HOT_METHODS.contains(&method.as_str()) {
                InlineSqlOrigin::HotMethod
            } else if self
                .config
                .inline_sql_extra_hot_methods
                .iter()
                .any(|extra| extra == &method)
            {
                InlineSqlOrigin::ExtraHotMethod
            } else {
                continue;
            };
            let Some(literal) = first_literal_argument(invocation, &source) else {
                continue;
            };
            let Some(sql) = string_literal_value(literal, &source) else {
                continue;
            };
            consumed.insert(literal.id());
            artifacts.push(self.artifact_for(literal, &source, &rel_file, origin, sql));
        }

        // Remaining literals that look like SQL on their own.
        for literal in collect_nodes(
            root,
            &[
                "string_literal",
                "verbatim_string_literal",
                "raw_string_literal",
                "interpolated_string_expression",
            ],
        ) {
            if consumed.contains(&literal.id()) {
                continue;
            }
            let Some(sql) = string_literal_value(literal, &source) else {
                continue;
            };
            if !starts_with_sql_verb(&sql) {
                continue;
            }
            artifacts.push(self.artifact_for(
                literal,
                &source,
                &rel_file,
                InlineSqlOrigin::HeuristicRoslyn,
                sql,
            ));
        }

        Ok(artifacts)
    }

    fn artifact_for(
        &self,
        literal: SyntaxNode<'_>,
        source: &str,
        rel_file: &str,
        origin: InlineSqlOrigin,
        sql: String,
    ) -> InlineSqlArtifact {
        let method = enclosing_method(literal);
        let method_name = method.and_then(|m| identifier_of(m, source));
        let type_full_name = method
            .and_then(|m| enclosing_type(m))
            .and_then(|decl| type_identity(decl, source))
            .map(|identity| identity.full_name);
        InlineSqlArtifact {
            file: rel_file.to_string(),
            line: line_of(literal),
            type_full_name,
            method_name,
            origin,
            sql,
        }
    }

    /// Line scan for files tree-sitter could not parse.
    fn scan_lines(&self, source: &str, rel_file: &str) -> Vec<InlineSqlArtifact> {
        let mut artifacts = Vec::new();
        for (idx, line) in source.lines().enumerate() {
            for captures in FALLBACK_LITERAL.captures_iter(line) {
                artifacts.push(InlineSqlArtifact {
                    file: rel_file.to_string(),
                    line: idx + 1,
                    type_full_name: None,
                    method_name: None,
                    origin: InlineSqlOrigin::HeuristicFallback,
                    sql: captures[1].to_string(),
                });
            }
        }
        artifacts
    }

    /// Re-parse the file and pick the method whose span contains the
    /// artifact's line, else the nearest method by line distance; with no
    /// methods in the file the artifact is dropped.
    fn recover_method_context(&self, path: &Path, artifact: &mut InlineSqlArtifact) -> bool {
        let Ok(source) = fs::read_to_string(path) else {
            return false;
        };
        let Some(tree) = parse_csharp(&source) else {
            return false;
        };
        let methods = collect_nodes(tree.root_node(), &["method_declaration"]);
        let target = methods
            .iter()
            .find(|m| {
                let start = m.start_position().row + 1;
                let end = m.end_position().row + 1;
                start <= artifact.line && artifact.line <= end
            })
            .or_else(|| {
                methods.iter().min_by_key(|m| {
                    let start = m.start_position().row + 1;
                    let end = m.end_position().row + 1;
                    artifact.line.abs_diff(start).min(artifact.line.abs_diff(end))
                })
            });
        let Some(method) = target else {
            return false;
        };
        artifact.method_name = identifier_of(*method, &source);
        artifact.type_full_name = enclosing_type(*method)
            .and_then(|decl| type_identity(decl, &source))
            .map(|identity| identity.full_name);
        artifact.method_full_name().is_some()
    }

    fn project_artifact(&self, path: &Path, artifact: &InlineSqlArtifact) {
        let Some(method_full_name) = artifact.method_full_name() else {
            return;
        };
        let method_key = node_key(
            &format!("{CSHARP_PREFIX}{method_full_name}"),
            NodeKind::Method,
        );
        // The METHOD node's file is recorded relative to the SQL root, which
        // puts code paths and database paths in one navigable namespace.
        let sql_root_rel = relative_path_from(self.sql_root, path);
        let body_rel = format!(
            "docs/bodies/InlineSql.{}.L{}.sql",
            sanitize_component(&method_full_name),
            artifact.line
        );
        self.graph.try_add_node(Node {
            key: method_key.clone(),
            kind: NodeKind::Method,
            name: artifact
                .method_name
                .clone()
                .unwrap_or_else(|| method_full_name.clone()),
            schema: "csharp".to_string(),
            file: sql_root_rel.clone(),
            batch: None,
            domain: "code-inline-sql".to_string(),
            body_path: Some(body_rel.clone()),
        });

        for identifier in self.referenced_identifiers(artifact) {
            let (object_key, _) = identifier.split_once("|inline@").unwrap_or((identifier.as_str(), ""));
            let (base, kind) = split_key(object_key);
            self.graph.add_edge(
                Edge::new(
                    method_key.clone(),
                    node_key(base, kind),
                    Relation::ReadsFrom,
                )
                .with_origin(sql_root_rel.clone(), None),
            );
        }

        self.emit_snippet_foreign_keys(artifact, &sql_root_rel);

        let mut record = BodyRecord::new(
            NodeKind::Method,
            &method_key,
            &artifact.file,
            &body_rel,
            &artifact.sql,
        );
        record.method_full_name = Some(method_full_name);
        record.type_full_name = artifact.type_full_name.clone();
        record.line = Some(artifact.line);
        record.origin = Some(artifact.origin.as_str().to_string());
        if let Err(err) = self.bodies.write_body(&body_rel, &artifact.sql, &record) {
            warn!(key = %method_key, error = %err, "inline body write failed");
            self.graph.clear_body_path(&method_key);
        }
    }

    /// Distinct objects the snippet references, encoded as
    /// `schema.name|KIND|inline@{relPath}:L{line}`.
    fn referenced_identifiers(&self, artifact: &InlineSqlArtifact) -> Vec<String> {
        let refs = match analyzer::parse_batch(&artifact.sql) {
            Ok(statements) => statements
                .iter()
                .map(analyzer::analyze_statement)
                .flat_map(|facts| facts.refs)
                .collect::<Vec<_>>(),
            Err(_) => fallback::scan_batch(&artifact.sql).refs,
        };
        let mut seen = HashSet::new();
        let mut identifiers = Vec::new();
        for reference in refs {
            let identifier = format!(
                "{}|{}|inline@{}:L{}",
                reference.name.base,
                reference.kind.as_str(),
                artifact.file,
                artifact.line
            );
            if seen.insert(identifier.to_lowercase()) {
                identifiers.push(identifier);
            }
        }
        identifiers
    }

    /// `FOREIGN KEY ... REFERENCES` inside the snippet links the object the
    /// snippet declares to each referenced principal.
    fn emit_snippet_foreign_keys(&self, artifact: &InlineSqlArtifact, rel_file: &str) {
        if !FOREIGN_KEY_REFERENCES.is_match(&artifact.sql) {
            return;
        }
        let defines = match analyzer::parse_batch(&artifact.sql) {
            Ok(statements) => statements
                .iter()
                .map(analyzer::analyze_statement)
                .flat_map(|facts| facts.defines)
                .collect::<Vec<_>>(),
            Err(_) => fallback::scan_batch(&artifact.sql).defines,
        };
        let Some(child) = defines.first() else {
            return;
        };
        for captures in FOREIGN_KEY_REFERENCES.captures_iter(&artifact.sql) {
            let Some(parent) = SqlName::parse(&captures[1]) else {
                continue;
            };
            self.graph.add_edge(
                Edge::new(
                    child.name.key(NodeKind::Table),
                    parent.key(NodeKind::Table),
                    Relation::ForeignKey,
                )
                .with_origin(rel_file, None),
            );
        }
    }
}

fn enclosing_type(node: SyntaxNode<'_>) -> Option<SyntaxNode<'_>> {
    let mut current = node;
    while let Some(parent) = current.parent() {
        if parent.kind() == "class_declaration"
            || parent.kind() == "struct_declaration"
            || parent.kind() == "record_declaration"
        {
            return Some(parent);
        }
        current = parent;
    }
    None
}

fn first_literal_argument<'t>(
    invocation: SyntaxNode<'t>,
    _source: &str,
) -> Option<SyntaxNode<'t>> {
    let args = invocation.child_by_field_name("arguments")?;
    let mut cursor = args.walk();
    for argument in args.children(&mut cursor) {
        if argument.kind() != "argument" {
            continue;
        }
        let mut arg_cursor = argument.walk();
        for child in argument.children(&mut arg_cursor) {
            if is_string_literal_kind(child.kind()) {
                return Some(child);
            }
        }
    }
    None
}

fn starts_with_sql_verb(sql: &str) -> bool {
    let trimmed = sql.trim_start();
    SQL_VERBS.iter().any(|verb| match trimmed.get(..verb.len()) {
        Some(head) if head.eq_ignore_ascii_case(verb) => trimmed[verb.len()..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true),
        _ => false,
    })
}

/// Relative path from `base` to `path`, using `..` segments where the file
/// lies outside `base`.
pub fn relative_path_from(base: &Path, path: &Path) -> String {
    let base_components: Vec<Component> = base.components().collect();
    let path_components: Vec<Component> = path.components().collect();
    let common = base_components
        .iter()
        .zip(path_components.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<String> = Vec::new();
    for _ in common..base_components.len() {
        parts.push("..".to_string());
    }
    for component in &path_components[common..] {
        parts.push(component.as_os_str().to_string_lossy().to_string());
    }
    parts.join("/")
}
