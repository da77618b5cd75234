// EF mapping analysis: entity/table mappings, DbSet bindings, POCO entity
// detection and fluent foreign keys, all derived syntactically from the C#
// trees. Files are reduced to plain per-file facts in parallel, then merged
// sequentially so the entity map is complete before entities resolve.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, warn};

use crate::artifacts::bodies::{sanitize_component, BodyWriter};
use crate::config::IndexerConfig;
use crate::csharp::{
    argument_texts, collect_nodes, identifier_of, invoked_method_name, node_text, parse_csharp,
    type_identity, TypeIdentity,
};
use crate::graph::keys::{node_key, CSHARP_PREFIX, DEFAULT_SCHEMA};
use crate::graph::resolver::CiMap;
use crate::graph::GraphModel;
use crate::models::{BodyRecord, Edge, Node, NodeKind, Relation};
use crate::orchestrator::{CancelFlag, StageStats};
use crate::sql::relative_to;
use tree_sitter::Node as SyntaxNode;

static TABLE_ATTR_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:Table|TableAttribute)\s*\(\s*"([^"]+)""#).unwrap());
static TABLE_ATTR_SCHEMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"Schema\s*=\s*"([^"]+)""#).unwrap());
static QUOTED: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]+)""#).unwrap());
static GENERIC_ARG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<\s*([\w.]+)\s*>").unwrap());
static LAMBDA_NAV: Lazy<Regex> = Lazy::new(|| Regex::new(r"=>\s*\w+\.(\w+)").unwrap());
static DBSET_TYPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^I?DbSet<\s*([\w.]+)\s*>").unwrap());

/// `(schema, table)` pair an entity type maps to.
#[derive(Debug, Clone, PartialEq)]
pub struct TableTarget {
    pub schema: String,
    pub table: String,
}

impl TableTarget {
    pub fn base(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    fn default_for(type_name: &str) -> TableTarget {
        TableTarget {
            schema: DEFAULT_SCHEMA.to_string(),
            table: simple_type_name(type_name).to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct TableMapping {
    entity_full: Option<String>,
    entity_simple: String,
    target: TableTarget,
}

#[derive(Debug, Clone)]
struct DbSetBinding {
    class_full: String,
    property: String,
    target_type: String,
}

#[derive(Debug, Clone)]
struct ClassDecl {
    identity: TypeIdentity,
    first_base: Option<String>,
    table_attr: Option<TableTarget>,
    source_text: String,
}

#[derive(Debug, Clone)]
struct FluentForeignKey {
    outer_entity: String,
    related: String,
    from_has_one: bool,
}

#[derive(Debug, Default)]
struct FileFacts {
    rel_file: String,
    mappings: Vec<TableMapping>,
    dbsets: Vec<DbSetBinding>,
    classes: Vec<ClassDecl>,
    fluent_fks: Vec<FluentForeignKey>,
}

pub struct EfGraphBuilder<'a> {
    pub graph: &'a GraphModel,
    pub bodies: &'a BodyWriter,
    pub repo_root: &'a Path,
    pub config: &'a IndexerConfig,
    pub cancel: &'a CancelFlag,
}

impl<'a> EfGraphBuilder<'a> {
    pub fn run(&self, files: &[PathBuf]) -> StageStats {
        let extracted: Vec<(StageStats, Option<FileFacts>)> = files
            .par_iter()
            .map(|path| {
                if self.cancel.is_cancelled() {
                    return (StageStats::skipped_file(), None);
                }
                match self.extract_file(path) {
                    Ok(facts) => (StageStats::indexed_file(), Some(facts)),
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "skipping C# file");
                        (StageStats::failed_file(), None)
                    }
                }
            })
            .collect();

        let mut stats = StageStats::default();
        let mut facts: Vec<FileFacts> = Vec::new();
        for (s, f) in extracted {
            stats = stats.merge(s);
            if let Some(f) = f {
                facts.push(f);
            }
        }
        self.project(facts);
        stats
    }

    /// Parse one file into plain facts. No graph access here; this is the
    /// parallel half of the stage.
    fn extract_file(&self, path: &Path) -> Result<FileFacts> {
        let source = fs::read_to_string(path)?;
        let tree = parse_csharp(&source)
            .ok_or_else(|| anyhow::anyhow!("tree-sitter produced no tree"))?;
        let root = tree.root_node();
        let mut facts = FileFacts {
            rel_file: relative_to(path, self.repo_root),
            ..Default::default()
        };

        for class in collect_nodes(root, &["class_declaration"]) {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(identity) = type_identity(class, &source) else {
                continue;
            };
            let table_attr = table_attribute(class, &source);
            if let Some(target) = &table_attr {
                facts.mappings.push(TableMapping {
                    entity_full: Some(identity.full_name.clone()),
                    entity_simple: identity.simple_name.clone(),
                    target: target.clone(),
                });
            }
            facts.classes.push(ClassDecl {
                first_base: first_base_type(class, &source),
                table_attr,
                source_text: node_text(class, &source).to_string(),
                identity,
            });
        }

        for property in collect_nodes(root, &["property_declaration"]) {
            let Some(type_node) = property.child_by_field_name("type") else {
                continue;
            };
            let type_text = node_text(type_node, &source).trim().to_string();
            let Some(captures) = DBSET_TYPE.captures(&type_text) else {
                continue;
            };
            let Some(property_name) = identifier_of(property, &source) else {
                continue;
            };
            let class_full = property
                .parent()
                .and_then(|body| body.parent())
                .filter(|decl| decl.kind() == "class_declaration")
                .and_then(|decl| type_identity(decl, &source))
                .map(|id| id.full_name)
                .unwrap_or_default();
            facts.dbsets.push(DbSetBinding {
                class_full,
                property: property_name,
                target_type: captures[1].to_string(),
            });
        }

        for invocation in collect_nodes(root, &["invocation_expression"]) {
            match invoked_method_name(invocation, &source).as_deref() {
                Some("ToTable") => {
                    if let Some(mapping) = to_table_mapping(invocation, &source) {
                        facts.mappings.push(mapping);
                    }
                }
                Some("HasForeignKey") => {
                    if let Some(fk) = fluent_foreign_key(invocation, &source) {
                        facts.fluent_fks.push(fk);
                    }
                }
                _ => {}
            }
        }

        Ok(facts)
    }

    /// Merge all file facts into the graph. Sequential: the entity map must
    /// be complete before entities and foreign keys resolve against it.
    fn project(&self, all_facts: Vec<FileFacts>) {
        let mut entity_map: CiMap<TableTarget> = CiMap::new();
        for facts in &all_facts {
            for mapping in &facts.mappings {
                if let Some(full) = &mapping.entity_full {
                    entity_map.insert(full, mapping.target.clone());
                }
                entity_map.insert(&mapping.entity_simple, mapping.target.clone());
            }
        }

        // DbSet bindings: DBSET node, MapsTo edge, and the set of entity
        // names implied by DbSet usage.
        let mut dbset_entities: HashSet<String> = HashSet::new();
        for facts in &all_facts {
            for binding in &facts.dbsets {
                let target = entity_map
                    .get(&binding.target_type)
                    .or_else(|| entity_map.get(simple_type_name(&binding.target_type)))
                    .cloned()
                    .unwrap_or_else(|| TableTarget::default_for(&binding.target_type));
                let base = format!("{CSHARP_PREFIX}{}.{}", binding.class_full, binding.property);
                let dbset_key = node_key(&base, NodeKind::DbSet);
                self.graph.try_add_node(Node {
                    key: dbset_key.clone(),
                    kind: NodeKind::DbSet,
                    name: binding.property.clone(),
                    schema: "csharp".to_string(),
                    file: facts.rel_file.clone(),
                    batch: None,
                    domain: "code".to_string(),
                    body_path: None,
                });
                self.graph.add_edge(
                    Edge::new(
                        dbset_key,
                        node_key(&target.base(), NodeKind::Table),
                        Relation::MapsTo,
                    )
                    .with_origin(facts.rel_file.clone(), None),
                );
                dbset_entities.insert(simple_type_name(&binding.target_type).to_lowercase());
            }
        }

        for facts in &all_facts {
            for class in &facts.classes {
                if self.cancel.is_cancelled() {
                    return;
                }
                let via_dbset = dbset_entities.contains(&class.identity.simple_name.to_lowercase());
                let via_base = class
                    .first_base
                    .as_deref()
                    .map(|base| self.matches_entity_base(base))
                    .unwrap_or(false);
                if !via_dbset && !via_base {
                    continue;
                }
                self.emit_entity(class, via_dbset, &entity_map, &facts.rel_file);
            }

            for fk in &facts.fluent_fks {
                self.emit_fluent_fk(fk, &entity_map, &facts.rel_file);
            }
        }
    }

    /// Configured entity base types match on exact full name, exact simple
    /// name, or simple-vs-simple.
    fn matches_entity_base(&self, base: &str) -> bool {
        let base_simple = simple_type_name(base);
        self.config.entity_base_types.iter().any(|configured| {
            base == configured.as_str()
                || base == simple_type_name(configured)
                || base_simple.eq_ignore_ascii_case(simple_type_name(configured))
        })
    }

    fn emit_entity(
        &self,
        class: &ClassDecl,
        via_dbset: bool,
        entity_map: &CiMap<TableTarget>,
        rel_file: &str,
    ) {
        let entity_key = node_key(
            &format!("{CSHARP_PREFIX}{}", class.identity.simple_name),
            NodeKind::Entity,
        );
        let body_rel = format!(
            "docs/bodies/Poco.{}.ENTITY.cs",
            sanitize_component(&class.identity.full_name)
        );
        let inserted = self.graph.try_add_node(Node {
            key: entity_key.clone(),
            kind: NodeKind::Entity,
            name: class.identity.simple_name.clone(),
            schema: "csharp".to_string(),
            file: rel_file.to_string(),
            batch: None,
            domain: "code".to_string(),
            body_path: Some(body_rel.clone()),
        });
        if inserted {
            debug!(key = %entity_key, "detected entity");
            let mut record = BodyRecord::new(
                NodeKind::Entity,
                &entity_key,
                rel_file,
                &body_rel,
                &class.source_text,
            );
            record.namespace = Some(class.identity.namespace.clone()).filter(|n| !n.is_empty());
            record.type_full_name = Some(class.identity.full_name.clone());
            if let Err(err) = self
                .bodies
                .write_body(&body_rel, &class.source_text, &record)
            {
                warn!(key = %entity_key, error = %err, "entity body write failed");
                self.graph.clear_body_path(&entity_key);
            }
        }

        if let Some(target) = self.resolve_entity_table(class, via_dbset, entity_map) {
            let table_key = node_key(&target.base(), NodeKind::Table);
            self.graph.try_add_node(Node {
                key: table_key.clone(),
                kind: NodeKind::Table,
                name: target.table.clone(),
                schema: target.schema.clone(),
                file: rel_file.to_string(),
                batch: None,
                domain: "ef".to_string(),
                body_path: None,
            });
            self.graph.add_edge(
                Edge::new(entity_key, table_key, Relation::MapsTo).with_origin(rel_file, None),
            );
        }
    }

    /// Best-effort table resolution for an entity, in order: entity map
    /// (exact, then the ±"s" probe), `[Table]` attribute, an already
    /// defined TABLE node (±"s"), and finally the DbSet default.
    fn resolve_entity_table(
        &self,
        class: &ClassDecl,
        via_dbset: bool,
        entity_map: &CiMap<TableTarget>,
    ) -> Option<TableTarget> {
        if let Some(target) = entity_map
            .get(&class.identity.full_name)
            .or_else(|| entity_map.get(&class.identity.simple_name))
        {
            return Some(target.clone());
        }
        if let Some(target) = entity_map.get_plural_tolerant(&class.identity.simple_name) {
            return Some(target.clone());
        }
        if let Some(target) = &class.table_attr {
            return Some(target.clone());
        }
        if let Some(base) = self.graph.find_table_base(&class.identity.simple_name) {
            let (schema, table) = match base.rsplit_once('.') {
                Some((schema, table)) => (schema.to_string(), table.to_string()),
                None => (DEFAULT_SCHEMA.to_string(), base.clone()),
            };
            return Some(TableTarget { schema, table });
        }
        if via_dbset {
            return Some(TableTarget::default_for(&class.identity.simple_name));
        }
        None
    }

    fn emit_fluent_fk(
        &self,
        fk: &FluentForeignKey,
        entity_map: &CiMap<TableTarget>,
        rel_file: &str,
    ) {
        let resolve = |type_name: &str| -> TableTarget {
            entity_map
                .get(type_name)
                .or_else(|| entity_map.get(simple_type_name(type_name)))
                .cloned()
                .unwrap_or_else(|| TableTarget::default_for(type_name))
        };
        let outer = resolve(&fk.outer_entity);
        let related = resolve(&fk.related);
        // HasOne: the outer entity carries the foreign key; HasMany: the
        // related entity does.
        let (child, parent) = if fk.from_has_one {
            (outer, related)
        } else {
            (related, outer)
        };
        for end in [&child, &parent] {
            self.graph.try_add_node(Node {
                key: node_key(&end.base(), NodeKind::Table),
                kind: NodeKind::Table,
                name: end.table.clone(),
                schema: end.schema.clone(),
                file: rel_file.to_string(),
                batch: None,
                domain: "ef".to_string(),
                body_path: None,
            });
        }
        self.graph.add_edge(
            Edge::new(
                node_key(&child.base(), NodeKind::Table),
                node_key(&parent.base(), NodeKind::Table),
                Relation::ForeignKey,
            )
            .with_origin(rel_file, None),
        );
    }
}

/// `Shop.Data.Customer` -> `Customer`.
pub fn simple_type_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

fn table_attribute(class: SyntaxNode<'_>, source: &str) -> Option<TableTarget> {
    let mut cursor = class.walk();
    for child in class.children(&mut cursor) {
        if child.kind() != "attribute_list" {
            continue;
        }
        let text = node_text(child, source);
        if let Some(captures) = TABLE_ATTR_NAME.captures(text) {
            let schema = TABLE_ATTR_SCHEMA
                .captures(text)
                .map(|c| c[1].to_string())
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
            return Some(TableTarget {
                schema,
                table: captures[1].to_string(),
            });
        }
    }
    None
}

fn first_base_type(class: SyntaxNode<'_>, source: &str) -> Option<String> {
    let mut cursor = class.walk();
    for child in class.children(&mut cursor) {
        if child.kind() != "base_list" {
            continue;
        }
        let mut base_cursor = child.walk();
        for base in child.children(&mut base_cursor) {
            if base.is_named() {
                return Some(node_text(base, source).trim().to_string());
            }
        }
    }
    None
}

/// The invocation chain from this call leftwards:
/// `a.Entity<T>().HasOne(x).HasForeignKey(y)` walked from `HasForeignKey`
/// yields `[HasForeignKey, HasOne, Entity]`.
fn chain_leftwards<'t>(
    invocation: SyntaxNode<'t>,
    source: &str,
) -> Vec<(String, SyntaxNode<'t>)> {
    let mut chain = Vec::new();
    let mut current = invocation;
    loop {
        let name = invoked_method_name(current, source).unwrap_or_default();
        chain.push((name, current));
        let Some(function) = current.child_by_field_name("function") else {
            break;
        };
        if function.kind() != "member_access_expression" {
            break;
        }
        let Some(expression) = function.child_by_field_name("expression") else {
            break;
        };
        if expression.kind() == "invocation_expression" {
            current = expression;
        } else {
            break;
        }
    }
    chain
}

fn generic_argument(invocation: SyntaxNode<'_>, source: &str) -> Option<String> {
    let function = invocation.child_by_field_name("function")?;
    let name_text = match function.kind() {
        "member_access_expression" => {
            node_text(function.child_by_field_name("name")?, source)
        }
        "generic_name" => node_text(function, source),
        _ => return None,
    };
    GENERIC_ARG
        .captures(name_text)
        .map(|captures| captures[1].to_string())
}

fn to_table_mapping(invocation: SyntaxNode<'_>, source: &str) -> Option<TableMapping> {
    let args = argument_texts(invocation, source);
    let table = QUOTED.captures(args.first()?)?[1].to_string();
    let schema = args
        .get(1)
        .and_then(|arg| QUOTED.captures(arg))
        .map(|captures| captures[1].to_string())
        .unwrap_or_else(|| DEFAULT_SCHEMA.to_string());
    let entity = chain_leftwards(invocation, source)
        .into_iter()
        .find(|(name, _)| name == "Entity")
        .and_then(|(_, inv)| generic_argument(inv, source))?;
    Some(TableMapping {
        entity_full: Some(entity.clone()).filter(|e| e.contains('.')),
        entity_simple: simple_type_name(&entity).to_string(),
        target: TableTarget { schema, table },
    })
}

fn fluent_foreign_key(invocation: SyntaxNode<'_>, source: &str) -> Option<FluentForeignKey> {
    let chain = chain_leftwards(invocation, source);
    let mut related: Option<String> = None;
    let mut from_has_one = false;
    let mut outer: Option<String> = None;
    for (name, inv) in chain.iter().skip(1) {
        match name.as_str() {
            "HasOne" | "HasMany" if related.is_none() => {
                from_has_one = name == "HasOne";
                related = generic_argument(*inv, source).or_else(|| {
                    argument_texts(*inv, source)
                        .first()
                        .and_then(|arg| LAMBDA_NAV.captures(arg))
                        .map(|captures| captures[1].to_string())
                });
            }
            "Entity" => {
                outer = generic_argument(*inv, source);
                break;
            }
            _ => {}
        }
    }
    Some(FluentForeignKey {
        outer_entity: outer?,
        related: related?,
        from_has_one,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::bodies::BodyWriter;
    use crate::orchestrator::CancelFlag;
    use tempfile::tempdir;

    fn run_builder(files: &[(&str, &str)], config: IndexerConfig) -> (GraphModel, tempfile::TempDir) {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().to_path_buf();
        let mut paths = Vec::new();
        for (name, contents) in files {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
            paths.push(path);
        }
        let out = root.join("out");
        let graph = GraphModel::new();
        let bodies = BodyWriter::create(&out).expect("body writer");
        let cancel = CancelFlag::default();
        let builder = EfGraphBuilder {
            graph: &graph,
            bodies: &bodies,
            repo_root: &root,
            config: &config,
            cancel: &cancel,
        };
        builder.run(&paths);
        (graph, dir)
    }

    #[test]
    fn dbset_binding_maps_to_default_table() {
        let source = r#"
namespace Shop.Data
{
    public class ShopContext
    {
        public DbSet<Customer> Customers { get; set; }
    }
}
"#;
        let (graph, _dir) = run_builder(&[("ShopContext.cs", source)], IndexerConfig::default());
        assert!(graph.contains_node("csharp:Shop.Data.ShopContext.Customers|DBSET"));
        let finalized = graph.finalize();
        assert!(finalized.edges.iter().any(|e| {
            e.from == "csharp:Shop.Data.ShopContext.Customers|DBSET"
                && e.to == "dbo.Customer|TABLE"
                && e.relation == Relation::MapsTo
        }));
    }

    #[test]
    fn base_type_entities_are_detected_and_mapped() {
        let context = r#"
namespace Shop.Data
{
    public class ShopContext
    {
        public DbSet<Customer> Customers { get; set; }
    }
}
"#;
        let poco = r#"
namespace Shop.Domain
{
    public class Customer : BaseEntity
    {
        public int Id { get; set; }
    }

    public class Untracked
    {
        public int Id { get; set; }
    }
}
"#;
        let config = IndexerConfig {
            entity_base_types: vec!["Shop.Core.BaseEntity".to_string()],
            ..Default::default()
        };
        let (graph, _dir) = run_builder(&[("ShopContext.cs", context), ("Models.cs", poco)], config);
        assert!(graph.contains_node("csharp:Customer|ENTITY"));
        assert!(!graph.contains_node("csharp:Untracked|ENTITY"));
        let finalized = graph.finalize();
        assert!(finalized.edges.iter().any(|e| {
            e.from == "csharp:Customer|ENTITY"
                && e.to == "dbo.Customer|TABLE"
                && e.relation == Relation::MapsTo
        }));
    }

    #[test]
    fn table_attribute_wins_over_dbset_default() {
        let source = r#"
namespace Shop.Data
{
    [Table("Customers", Schema = "sales")]
    public class Customer : BaseEntity
    {
        public int Id { get; set; }
    }
}
"#;
        let config = IndexerConfig {
            entity_base_types: vec!["BaseEntity".to_string()],
            ..Default::default()
        };
        let (graph, _dir) = run_builder(&[("Customer.cs", source)], config);
        let finalized = graph.finalize();
        assert!(finalized
            .edges
            .iter()
            .any(|e| e.from == "csharp:Customer|ENTITY" && e.to == "sales.Customers|TABLE"));
    }

    #[test]
    fn fluent_foreign_key_orients_child_to_parent() {
        let source = r#"
namespace Shop.Data
{
    public class Configuration
    {
        void Configure(ModelBuilder modelBuilder)
        {
            modelBuilder.Entity<Order>().ToTable("Orders");
            modelBuilder.Entity<Order>()
                .HasOne(o => o.Customer)
                .WithMany(c => c.Orders)
                .HasForeignKey(o => o.CustomerId);
        }
    }
}
"#;
        let (graph, _dir) = run_builder(&[("Configuration.cs", source)], IndexerConfig::default());
        let finalized = graph.finalize();
        assert!(finalized.edges.iter().any(|e| {
            e.from == "dbo.Orders|TABLE"
                && e.to == "dbo.Customer|TABLE"
                && e.relation == Relation::ForeignKey
        }));
    }

    #[test]
    fn has_many_reverses_orientation() {
        let source = r#"
class Cfg
{
    void Configure(ModelBuilder modelBuilder)
    {
        modelBuilder.Entity<Customer>()
            .HasMany<Order>()
            .HasForeignKey(o => o.CustomerId);
    }
}
"#;
        let (graph, _dir) = run_builder(&[("Cfg.cs", source)], IndexerConfig::default());
        let finalized = graph.finalize();
        assert!(finalized.edges.iter().any(|e| {
            e.from == "dbo.Order|TABLE"
                && e.to == "dbo.Customer|TABLE"
                && e.relation == Relation::ForeignKey
        }));
    }

    #[test]
    fn entity_body_file_is_written_once() {
        let source = r#"
namespace Shop
{
    public class Customer : BaseEntity
    {
        public int Id { get; set; }
    }
}
"#;
        let config = IndexerConfig {
            entity_base_types: vec!["BaseEntity".to_string()],
            ..Default::default()
        };
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("Customer.cs"), source).unwrap();
        let out = root.join("out");
        let graph = GraphModel::new();
        let bodies = BodyWriter::create(&out).unwrap();
        let cancel = CancelFlag::default();
        let builder = EfGraphBuilder {
            graph: &graph,
            bodies: &bodies,
            repo_root: root,
            config: &config,
            cancel: &cancel,
        };
        builder.run(&[root.join("Customer.cs")]);
        let body = out.join("docs/bodies/Poco.Shop.Customer.ENTITY.cs");
        assert!(body.exists());
        let node = graph.get_node("csharp:Customer|ENTITY").unwrap();
        assert_eq!(
            node.body_path.as_deref(),
            Some("docs/bodies/Poco.Shop.Customer.ENTITY.cs")
        );
    }
}
