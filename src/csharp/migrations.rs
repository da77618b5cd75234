// Migration analysis: finds migration classes, classifies the schema
// operations their `Up()` methods perform, and projects the structural ones
// onto the graph. When the syntax-driven pass finds no migrations at all, a
// lexical sweep over the same files recovers `class XxxMigration` /
// `Schema.Table(...)` pairs so older hand-rolled migration styles still
// register.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

use crate::artifacts::bodies::{sanitize_component, BodyWriter};
use crate::csharp::{
    argument_texts, collect_nodes, identifier_of, invoked_method_name, node_text, parse_csharp,
    type_identity, TypeIdentity,
};
use crate::graph::keys::{node_key, CSHARP_PREFIX, DEFAULT_SCHEMA};
use crate::graph::GraphModel;
use crate::models::{BodyRecord, Edge, MigrationOp, Node, NodeKind, Relation};
use crate::orchestrator::{CancelFlag, StageStats};
use crate::sql::relative_to;
use tree_sitter::Node as SyntaxNode;

static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static NAMEOF: Lazy<Regex> = Lazy::new(|| Regex::new(r"nameof\s*\(\s*([\w.]+)\s*\)").unwrap());
static NAMED_ARG: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*(\w+)\s*:").unwrap());
static PRINCIPAL_TABLE_RAW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"principalTable\s*[:=]?\s*"([^"]+)""#).unwrap());
static LEXICAL_MIGRATION_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"class\s+(\w*Migration)\b").unwrap());
static LEXICAL_SCHEMA_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"Schema\.Table\(\s*(?:nameof\(\s*(\w+)\s*\)|"([^"]+)")\s*\)"#).unwrap()
});

#[derive(Debug, Clone)]
struct MigrationClass {
    identity: TypeIdentity,
    rel_file: String,
    up_body: Option<String>,
    ops: Vec<MigrationOp>,
}

pub struct MigrationAnalyzer<'a> {
    pub graph: &'a GraphModel,
    pub bodies: &'a BodyWriter,
    pub repo_root: &'a Path,
    pub cancel: &'a CancelFlag,
}

impl<'a> MigrationAnalyzer<'a> {
    pub fn run(&self, files: &[PathBuf]) -> StageStats {
        let extracted: Vec<(StageStats, Vec<MigrationClass>)> = files
            .par_iter()
            .map(|path| {
                if self.cancel.is_cancelled() {
                    return (StageStats::skipped_file(), Vec::new());
                }
                match self.extract_file(path) {
                    Ok(found) => (StageStats::indexed_file(), found),
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "skipping C# file");
                        (StageStats::failed_file(), Vec::new())
                    }
                }
            })
            .collect();

        let mut stats = StageStats::default();
        let mut migrations: Vec<MigrationClass> = Vec::new();
        for (s, found) in extracted {
            stats = stats.merge(s);
            migrations.extend(found);
        }

        if migrations.is_empty() {
            debug!("no migrations found syntactically, running lexical sweep");
            self.lexical_sweep(files);
            return stats;
        }

        for migration in migrations {
            if self.cancel.is_cancelled() {
                break;
            }
            self.emit_migration(&migration);
        }
        stats
    }

    fn extract_file(&self, path: &Path) -> Result<Vec<MigrationClass>> {
        let source = fs::read_to_string(path)?;
        let tree = parse_csharp(&source)
            .ok_or_else(|| anyhow::anyhow!("tree-sitter produced no tree"))?;
        let rel_file = relative_to(path, self.repo_root);

        let mut found = Vec::new();
        for class in collect_nodes(tree.root_node(), &["class_declaration"]) {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(identity) = type_identity(class, &source) else {
                continue;
            };
            if !is_migration_class(class, &identity, &source) {
                continue;
            }
            let up = find_up_method(class, &source);
            let ops = up
                .map(|up| classify_operations(up, &source))
                .unwrap_or_default();
            found.push(MigrationClass {
                identity,
                rel_file: rel_file.clone(),
                up_body: up.map(|up| node_text(up, &source).to_string()),
                ops,
            });
        }
        Ok(found)
    }

    fn emit_migration(&self, migration: &MigrationClass) {
        let full_name = &migration.identity.full_name;
        let migration_key = node_key(&format!("{CSHARP_PREFIX}{full_name}"), NodeKind::Migration);
        let body_rel = migration.up_body.as_ref().map(|_| {
            format!(
                "docs/bodies/Migration.{}.MIGRATION.cs",
                sanitize_component(full_name)
            )
        });
        let inserted = self.graph.try_add_node(Node {
            key: migration_key.clone(),
            kind: NodeKind::Migration,
            name: migration.identity.simple_name.clone(),
            schema: "csharp".to_string(),
            file: migration.rel_file.clone(),
            batch: None,
            domain: "code".to_string(),
            body_path: body_rel.clone(),
        });

        for op in &migration.ops {
            // TODO: carry the operation's schema through to these edges;
            // today every migration edge lands on dbo regardless.
            match op {
                MigrationOp::CreateTable { table, .. }
                | MigrationOp::DropTable { table, .. }
                | MigrationOp::CreateIndex { table }
                | MigrationOp::DropIndex { table }
                | MigrationOp::TouchTable { table } => {
                    self.graph.add_edge(
                        Edge::new(
                            migration_key.clone(),
                            node_key(&format!("{DEFAULT_SCHEMA}.{table}"), NodeKind::Table),
                            Relation::SchemaChange,
                        )
                        .with_origin(migration.rel_file.clone(), None),
                    );
                }
                MigrationOp::AddForeignKey {
                    table,
                    principal_table: Some(principal),
                    ..
                } => {
                    self.graph.add_edge(
                        Edge::new(
                            node_key(&format!("{DEFAULT_SCHEMA}.{table}"), NodeKind::Table),
                            node_key(&format!("{DEFAULT_SCHEMA}.{principal}"), NodeKind::Table),
                            Relation::ForeignKey,
                        )
                        .with_origin(migration.rel_file.clone(), None),
                    );
                }
                _ => {}
            }
        }

        if !inserted {
            return;
        }
        if let (Some(body_rel), Some(body)) = (body_rel, &migration.up_body) {
            let mut record = BodyRecord::new(
                NodeKind::Migration,
                &migration_key,
                &migration.rel_file,
                &body_rel,
                body,
            );
            record.namespace =
                Some(migration.identity.namespace.clone()).filter(|n| !n.is_empty());
            record.type_full_name = Some(full_name.clone());
            summarize_ops(&migration.ops, &mut record);
            if let Err(err) = self.bodies.write_body(&body_rel, body, &record) {
                warn!(key = %migration_key, error = %err, "migration body write failed");
                self.graph.clear_body_path(&migration_key);
            }
        }
    }

    /// Last-resort scan when the syntax pass produced nothing: pairs each
    /// `class XxxMigration` with the `Schema.Table(...)` references in the
    /// same file.
    fn lexical_sweep(&self, files: &[PathBuf]) {
        for path in files {
            if self.cancel.is_cancelled() {
                break;
            }
            let Ok(source) = fs::read_to_string(path) else {
                continue;
            };
            let rel_file = relative_to(path, self.repo_root);
            let tables: Vec<String> = LEXICAL_SCHEMA_TABLE
                .captures_iter(&source)
                .filter_map(|captures| {
                    captures
                        .get(1)
                        .or_else(|| captures.get(2))
                        .map(|m| m.as_str().to_string())
                })
                .collect();
            for captures in LEXICAL_MIGRATION_CLASS.captures_iter(&source) {
                let class_name = &captures[1];
                let key = node_key(&format!("{CSHARP_PREFIX}{class_name}"), NodeKind::Migration);
                self.graph.try_add_node(Node {
                    key: key.clone(),
                    kind: NodeKind::Migration,
                    name: class_name.to_string(),
                    schema: "csharp".to_string(),
                    file: rel_file.clone(),
                    batch: None,
                    domain: "code".to_string(),
                    body_path: None,
                });
                for table in &tables {
                    self.graph.add_edge(
                        Edge::new(
                            key.clone(),
                            node_key(&format!("{DEFAULT_SCHEMA}.{table}"), NodeKind::Table),
                            Relation::SchemaChange,
                        )
                        .with_origin(rel_file.clone(), None),
                    );
                }
            }
        }
    }
}

fn is_migration_class(class: SyntaxNode<'_>, identity: &TypeIdentity, source: &str) -> bool {
    if identity.simple_name.contains("Migration") {
        return true;
    }
    let mut cursor = class.walk();
    for child in class.children(&mut cursor) {
        if child.kind() != "attribute_list" {
            continue;
        }
        for attribute in collect_nodes(child, &["attribute"]) {
            if let Some(name) = identifier_of(attribute, source) {
                let simple = name.rsplit('.').next().unwrap_or(&name);
                if simple.ends_with("UpdateMigration") {
                    return true;
                }
            }
        }
    }
    false
}

fn find_up_method<'t>(class: SyntaxNode<'t>, source: &str) -> Option<SyntaxNode<'t>> {
    let body = class.child_by_field_name("body")?;
    collect_nodes(body, &["method_declaration"])
        .into_iter()
        .find(|method| identifier_of(*method, source).as_deref() == Some("Up"))
}

/// Classify every invocation in `Up()`, in source order.
fn classify_operations(up: SyntaxNode<'_>, source: &str) -> Vec<MigrationOp> {
    collect_nodes(up, &["invocation_expression"])
        .into_iter()
        .filter_map(|invocation| classify_invocation(invocation, source))
        .collect()
}

fn classify_invocation(invocation: SyntaxNode<'_>, source: &str) -> Option<MigrationOp> {
    let method = invoked_method_name(invocation, source)?;
    let args = ArgumentView::parse(invocation, source);
    let op = match method.as_str() {
        "CreateTable" => MigrationOp::CreateTable {
            schema: args.value("schema", 1).unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            table: args.value("name", 0)?,
        },
        "DropTable" => MigrationOp::DropTable {
            schema: args.value("schema", 1).unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            table: args.value("name", 0)?,
        },
        "AddColumn" => MigrationOp::AddColumn {
            table: args.value("table", 1)?,
            column: args.value("name", 0)?,
        },
        "DropColumn" => MigrationOp::DropColumn {
            table: args.value("table", 1)?,
            column: args.value("name", 0)?,
        },
        "RenameColumn" => MigrationOp::RenameColumn {
            table: args.value("table", 2)?,
            from: args.value("name", 0)?,
            to: args.value("newName", 1)?,
        },
        "AddForeignKey" => MigrationOp::AddForeignKey {
            table: args.value("table", 1)?,
            principal_table: args.value("principalTable", 3).or_else(|| {
                // Positional shapes drift between migration APIs; the raw
                // token scan still finds the principal in most of them.
                PRINCIPAL_TABLE_RAW
                    .captures(node_text(invocation, source))
                    .map(|captures| captures[1].to_string())
            }),
            fk_name: args.value("name", 0),
        },
        "DropForeignKey" => MigrationOp::DropForeignKey {
            table: args.value("table", 1)?,
            fk_name: args.value("name", 0)?,
        },
        "CreateIndex" => MigrationOp::CreateIndex {
            table: args.value("table", 1)?,
        },
        "DropIndex" => MigrationOp::DropIndex {
            table: args.value("table", 1)?,
        },
        "Sql" => MigrationOp::RawSql {
            sql: args.value("sql", 0)?,
        },
        "Table" if is_schema_table_call(invocation, source) => MigrationOp::TouchTable {
            table: args.value("name", 0)?,
        },
        _ => MigrationOp::Unknown { method },
    };
    Some(op)
}

/// `Schema.Table("X")` / `Schema.Table(nameof(X))`.
fn is_schema_table_call(invocation: SyntaxNode<'_>, source: &str) -> bool {
    invocation
        .child_by_field_name("function")
        .filter(|function| function.kind() == "member_access_expression")
        .and_then(|function| function.child_by_field_name("expression"))
        .map(|expression| {
            let text = node_text(expression, source);
            text == "Schema" || text.ends_with(".Schema")
        })
        .unwrap_or(false)
}

/// Positional/named argument access over raw argument slices. Values come
/// from string literals or `nameof(...)`; anything else is opaque.
struct ArgumentView {
    positional: Vec<Option<String>>,
    named: Vec<(String, Option<String>)>,
}

impl ArgumentView {
    fn parse(invocation: SyntaxNode<'_>, source: &str) -> ArgumentView {
        let mut positional = Vec::new();
        let mut named = Vec::new();
        for raw in argument_texts(invocation, source) {
            let value = literal_value(raw);
            match NAMED_ARG.captures(raw) {
                Some(captures) => named.push((captures[1].to_string(), value)),
                None => positional.push(value),
            }
        }
        ArgumentView { positional, named }
    }

    fn value(&self, name: &str, position: usize) -> Option<String> {
        if let Some((_, value)) = self.named.iter().find(|(n, _)| n == name) {
            return value.clone();
        }
        // Positional arguments precede named ones, so their indices hold
        // even in mixed calls.
        self.positional.get(position).cloned().flatten()
    }
}

fn literal_value(raw: &str) -> Option<String> {
    if let Some(captures) = NAMEOF.captures(raw) {
        let full = captures[1].to_string();
        return Some(full.rsplit('.').next().unwrap_or(&full).to_string());
    }
    QUOTED.captures(raw).map(|captures| captures[1].to_string())
}

/// Fill the structured summary arrays on a migration's JSONL record,
/// preserving operation order. Tables canonicalize as `schema.table`; the
/// column-level operations default to `dbo` because the typed ops do not
/// carry a schema.
fn summarize_ops(ops: &[MigrationOp], record: &mut BodyRecord) {
    let mut creates = Vec::new();
    let mut drops = Vec::new();
    let mut adds_columns = Vec::new();
    let mut drops_columns = Vec::new();
    let mut renames = Vec::new();
    let mut adds_fks = Vec::new();
    let mut drops_fks = Vec::new();
    for op in ops {
        match op {
            MigrationOp::CreateTable { schema, table } => creates.push(format!("{schema}.{table}")),
            MigrationOp::DropTable { schema, table } => drops.push(format!("{schema}.{table}")),
            MigrationOp::AddColumn { table, column } => {
                adds_columns.push(format!("{DEFAULT_SCHEMA}.{table}.{column}"))
            }
            MigrationOp::DropColumn { table, column } => {
                drops_columns.push(format!("{DEFAULT_SCHEMA}.{table}.{column}"))
            }
            MigrationOp::RenameColumn { table, from, to } => {
                renames.push(format!("{DEFAULT_SCHEMA}.{table}.{from}->{to}"))
            }
            MigrationOp::AddForeignKey {
                table,
                principal_table,
                ..
            } => adds_fks.push(format!(
                "{DEFAULT_SCHEMA}.{table}->{DEFAULT_SCHEMA}.{}",
                principal_table.as_deref().unwrap_or("?")
            )),
            MigrationOp::DropForeignKey { table, fk_name } => {
                drops_fks.push(format!("{DEFAULT_SCHEMA}.{table}.{fk_name}"))
            }
            _ => {}
        }
    }
    record.creates_tables = Some(creates).filter(|v| !v.is_empty());
    record.drops_tables = Some(drops).filter(|v| !v.is_empty());
    record.adds_columns = Some(adds_columns).filter(|v| !v.is_empty());
    record.drops_columns = Some(drops_columns).filter(|v| !v.is_empty());
    record.renames_columns = Some(renames).filter(|v| !v.is_empty());
    record.adds_foreign_keys = Some(adds_fks).filter(|v| !v.is_empty());
    record.drops_foreign_keys = Some(drops_fks).filter(|v| !v.is_empty());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::CancelFlag;
    use tempfile::tempdir;

    fn run_analyzer(files: &[(&str, &str)]) -> (GraphModel, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        let mut paths = Vec::new();
        for (name, contents) in files {
            let path = root.join(name);
            fs::write(&path, contents).unwrap();
            paths.push(path);
        }
        let graph = GraphModel::new();
        let bodies = BodyWriter::create(&root.join("out")).expect("body writer");
        let cancel = CancelFlag::default();
        let analyzer = MigrationAnalyzer {
            graph: &graph,
            bodies: &bodies,
            repo_root: &root,
            cancel: &cancel,
        };
        analyzer.run(&paths);
        (graph, dir)
    }

    const TOUCH_MIGRATION: &str = r#"
namespace MiniEf.Migrations
{
    public class AddCustomerTouchMigration
    {
        public void Up()
        {
            Schema.Table(nameof(Customer));
        }
    }
}
"#;

    #[test]
    fn touch_table_emits_schema_change() {
        let (graph, _dir) = run_analyzer(&[("AddCustomerTouchMigration.cs", TOUCH_MIGRATION)]);
        assert!(graph
            .contains_node("csharp:MiniEf.Migrations.AddCustomerTouchMigration|MIGRATION"));
        let finalized = graph.finalize();
        assert!(finalized.edges.iter().any(|e| {
            e.from == "csharp:MiniEf.Migrations.AddCustomerTouchMigration|MIGRATION"
                && e.to == "dbo.Customer|TABLE"
                && e.relation == Relation::SchemaChange
        }));
        // Backfill materialized the touched table.
        assert!(finalized.nodes.iter().any(|n| n.key == "dbo.Customer|TABLE"));
    }

    #[test]
    fn add_foreign_key_links_child_to_principal() {
        let source = r#"
namespace MiniEf.Migrations
{
    public class LinkOrdersMigration
    {
        public void Up()
        {
            migrationBuilder.AddForeignKey(
                name: "FK_Orders_Customer",
                table: "Orders",
                principalTable: "Customer");
        }
    }
}
"#;
        let (graph, _dir) = run_analyzer(&[("LinkOrdersMigration.cs", source)]);
        let finalized = graph.finalize();
        assert!(finalized.edges.iter().any(|e| {
            e.from == "dbo.Orders|TABLE"
                && e.to == "dbo.Customer|TABLE"
                && e.relation == Relation::ForeignKey
        }));
    }

    #[test]
    fn create_table_ops_are_summarized_in_order() {
        let source = r#"
namespace MiniEf.Migrations
{
    public class InitialMigration
    {
        public void Up()
        {
            migrationBuilder.CreateTable(name: "Customers", schema: "sales");
            migrationBuilder.AddColumn<string>(name: "Email", table: "Customers");
            migrationBuilder.Sql("UPDATE dbo.Settings SET V = 1");
        }
    }
}
"#;
        let (graph, dir) = run_analyzer(&[("InitialMigration.cs", source)]);
        let jsonl =
            fs::read_to_string(dir.path().join("out/docs/sql_bodies.jsonl")).expect("jsonl");
        let record: serde_json::Value =
            serde_json::from_str(jsonl.lines().next().expect("one record")).unwrap();
        assert_eq!(record["kind"], "MIGRATION");
        assert_eq!(record["createsTables"][0], "sales.Customers");
        assert_eq!(record["addsColumns"][0], "dbo.Customers.Email");
        // The edge still lands on dbo even though the op said sales.
        let finalized = graph.finalize();
        assert!(finalized
            .edges
            .iter()
            .any(|e| e.to == "dbo.Customers|TABLE" && e.relation == Relation::SchemaChange));
    }

    #[test]
    fn attribute_marks_migration_without_name_hint() {
        let source = r#"
namespace MiniEf
{
    [NightlyUpdateMigration]
    public class RefreshViews
    {
        public void Up()
        {
            migrationBuilder.CreateTable(name: "Snapshots");
        }
    }
}
"#;
        let (graph, _dir) = run_analyzer(&[("RefreshViews.cs", source)]);
        assert!(graph.contains_node("csharp:MiniEf.RefreshViews|MIGRATION"));
    }

    #[test]
    fn lexical_sweep_activates_when_nothing_parses_as_migration() {
        // No class here satisfies the syntactic detector's Up() walk, but
        // the file still names a migration class and touches a table.
        let source = "public partial class SeedDataMigration { void Apply() { Schema.Table(\"Seeds\"); } }";
        let (graph, _dir) = run_analyzer(&[("SeedDataMigration.cs", source)]);
        // The syntactic pass sees the class (name contains Migration), so
        // the sweep must NOT have produced a second node for it.
        assert!(graph.contains_node("csharp:SeedDataMigration|MIGRATION"));
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn unknown_calls_produce_no_edges() {
        let source = r#"
public class AuditMigration
{
    public void Up()
    {
        migrationBuilder.EnsureSchema(name: "audit");
    }
}
"#;
        let (graph, _dir) = run_analyzer(&[("AuditMigration.cs", source)]);
        assert_eq!(graph.edge_count(), 0);
    }
}
