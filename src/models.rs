// Core value types shared by every indexing stage.

use serde::{Deserialize, Serialize};

/// What kind of entity a graph node represents.
///
/// `TableOrView` and `Unknown` are placeholders used by reference emitters
/// when the referenced object has not been seen yet; they are reconciled
/// against defined nodes during `GraphModel::finalize`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Table,
    View,
    Proc,
    Func,
    Trigger,
    Type,
    Sequence,
    Synonym,
    Deploy,
    Batch,
    DbSet,
    Entity,
    Method,
    Migration,
    TableOrView,
    Unknown,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Table => "TABLE",
            NodeKind::View => "VIEW",
            NodeKind::Proc => "PROC",
            NodeKind::Func => "FUNC",
            NodeKind::Trigger => "TRIGGER",
            NodeKind::Type => "TYPE",
            NodeKind::Sequence => "SEQUENCE",
            NodeKind::Synonym => "SYNONYM",
            NodeKind::Deploy => "DEPLOY",
            NodeKind::Batch => "BATCH",
            NodeKind::DbSet => "DBSET",
            NodeKind::Entity => "ENTITY",
            NodeKind::Method => "METHOD",
            NodeKind::Migration => "MIGRATION",
            NodeKind::TableOrView => "TABLE_OR_VIEW",
            NodeKind::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> NodeKind {
        match s {
            "TABLE" => NodeKind::Table,
            "VIEW" => NodeKind::View,
            "PROC" => NodeKind::Proc,
            "FUNC" => NodeKind::Func,
            "TRIGGER" => NodeKind::Trigger,
            "TYPE" => NodeKind::Type,
            "SEQUENCE" => NodeKind::Sequence,
            "SYNONYM" => NodeKind::Synonym,
            "DEPLOY" => NodeKind::Deploy,
            "BATCH" => NodeKind::Batch,
            "DBSET" => NodeKind::DbSet,
            "ENTITY" => NodeKind::Entity,
            "METHOD" => NodeKind::Method,
            "MIGRATION" => NodeKind::Migration,
            "TABLE_OR_VIEW" => NodeKind::TableOrView,
            _ => NodeKind::Unknown,
        }
    }

    /// Placeholder kinds are tentative; finalize rewrites them when the
    /// referenced object turns out to be defined under a concrete kind.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, NodeKind::TableOrView | NodeKind::Unknown)
    }

    /// Kinds whose SQL source text is preserved to a side file under docs/bodies.
    pub fn is_body_bearing_sql(&self) -> bool {
        matches!(
            self,
            NodeKind::Table
                | NodeKind::View
                | NodeKind::Proc
                | NodeKind::Func
                | NodeKind::Trigger
                | NodeKind::Type
                | NodeKind::Sequence
        )
    }

    /// Tie-break order when one base name is defined under several kinds.
    /// Lower wins during placeholder resolution.
    pub fn resolution_priority(&self) -> u8 {
        match self {
            NodeKind::Table => 0,
            NodeKind::View => 1,
            NodeKind::Proc => 2,
            NodeKind::Func => 3,
            NodeKind::Trigger => 4,
            NodeKind::Type => 5,
            NodeKind::Sequence => 6,
            NodeKind::Synonym => 7,
            NodeKind::Deploy => 8,
            NodeKind::Batch => 9,
            NodeKind::DbSet => 10,
            NodeKind::Entity => 11,
            NodeKind::Method => 12,
            NodeKind::Migration => 13,
            NodeKind::TableOrView => 14,
            NodeKind::Unknown => 15,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Kinds serialize as their wire spelling (`TABLE_OR_VIEW`), which is also
// the segment embedded in node keys.
impl Serialize for NodeKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(NodeKind::parse(&raw))
    }
}

/// Directed relation carried by an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    ReadsFrom,
    WritesTo,
    Executes,
    Uses,
    MapsTo,
    SchemaChange,
    ForeignKey,
    SynonymFor,
    On,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::ReadsFrom => "ReadsFrom",
            Relation::WritesTo => "WritesTo",
            Relation::Executes => "Executes",
            Relation::Uses => "Uses",
            Relation::MapsTo => "MapsTo",
            Relation::SchemaChange => "SchemaChange",
            Relation::ForeignKey => "ForeignKey",
            Relation::SynonymFor => "SynonymFor",
            Relation::On => "On",
        }
    }
}

impl Relation {
    pub fn parse(s: &str) -> Option<Relation> {
        Some(match s {
            "ReadsFrom" => Relation::ReadsFrom,
            "WritesTo" => Relation::WritesTo,
            "Executes" => Relation::Executes,
            "Uses" => Relation::Uses,
            "MapsTo" => Relation::MapsTo,
            "SchemaChange" => Relation::SchemaChange,
            "ForeignKey" => Relation::ForeignKey,
            "SynonymFor" => Relation::SynonymFor,
            "On" => Relation::On,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Relation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Relation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Relation::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown relation: {raw}")))
    }
}

/// A single graph node. The `key` is the composite identity
/// `{qualifier}.{name}|{KIND}` (e.g. `dbo.Customer|TABLE`,
/// `csharp:Ns.Class.Method|METHOD`); equality over keys is case-insensitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub key: String,
    pub kind: NodeKind,
    pub name: String,
    /// Database schema for DB objects, or the language tag `csharp`.
    pub schema: String,
    /// Source path, `/`-separated.
    pub file: String,
    /// T-SQL batch index when the node came out of a scripted batch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<i32>,
    /// Top-level folder label, or one of `code`, `ef`, `code-inline-sql`,
    /// `db`, `(external)`.
    pub domain: String,
    /// Relative path of the extracted body file, when one was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_path: Option<String>,
}

/// A directed edge between two node keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub relation: Relation,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<i32>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>, relation: Relation) -> Self {
        Edge {
            from: from.into(),
            to: to.into(),
            relation,
            file: String::new(),
            batch: None,
        }
    }

    pub fn with_origin(mut self, file: impl Into<String>, batch: Option<i32>) -> Self {
        self.file = file.into();
        self.batch = batch;
        self
    }
}

/// One line of `docs/sql_bodies.jsonl`. Field presence varies by kind;
/// `kind`, `key`, `file`, `bodyPath` and `body` are always set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyRecord {
    pub kind: String,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    pub file: String,
    pub body_path: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creates_tables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drops_tables: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adds_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drops_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub renames_columns: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adds_foreign_keys: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drops_foreign_keys: Option<Vec<String>>,
}

impl BodyRecord {
    pub fn new(kind: NodeKind, key: &str, file: &str, body_path: &str, body: &str) -> Self {
        BodyRecord {
            kind: kind.as_str().to_string(),
            key: key.to_string(),
            file: file.to_string(),
            body_path: body_path.to_string(),
            body: body.to_string(),
            ..Default::default()
        }
    }
}

/// Where an inline-SQL literal was recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineSqlOrigin {
    /// Argument of a built-in hot method (`Query`, `Execute`, ...).
    HotMethod,
    /// Argument of a hot method supplied through configuration.
    ExtraHotMethod,
    /// Syntax-tree string literal that starts with a SQL verb.
    HeuristicRoslyn,
    /// Line-scan fallback for files the parser could not handle.
    HeuristicFallback,
}

impl InlineSqlOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            InlineSqlOrigin::HotMethod => "HotMethod",
            InlineSqlOrigin::ExtraHotMethod => "ExtraHotMethod",
            InlineSqlOrigin::HeuristicRoslyn => "HeuristicRoslyn",
            InlineSqlOrigin::HeuristicFallback => "HeuristicFallback",
        }
    }
}

/// A recovered SQL string literal, before projection onto the graph.
#[derive(Debug, Clone)]
pub struct InlineSqlArtifact {
    /// Source path relative to the repository root.
    pub file: String,
    /// 1-based line of the literal.
    pub line: usize,
    /// Full name of the owning type, when known.
    pub type_full_name: Option<String>,
    /// Simple name of the owning method, when known.
    pub method_name: Option<String>,
    pub origin: InlineSqlOrigin,
    pub sql: String,
}

impl InlineSqlArtifact {
    /// `{TypeFullName}.{Method}` when both halves are known.
    pub fn method_full_name(&self) -> Option<String> {
        match (&self.type_full_name, &self.method_name) {
            (Some(t), Some(m)) => Some(format!("{t}.{m}")),
            _ => None,
        }
    }
}

/// A classified migration `Up()` operation, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOp {
    CreateTable {
        schema: String,
        table: String,
    },
    DropTable {
        schema: String,
        table: String,
    },
    AddColumn {
        table: String,
        column: String,
    },
    DropColumn {
        table: String,
        column: String,
    },
    RenameColumn {
        table: String,
        from: String,
        to: String,
    },
    AddForeignKey {
        table: String,
        principal_table: Option<String>,
        fk_name: Option<String>,
    },
    DropForeignKey {
        table: String,
        fk_name: String,
    },
    CreateIndex {
        table: String,
    },
    DropIndex {
        table: String,
    },
    RawSql {
        sql: String,
    },
    TouchTable {
        table: String,
    },
    Unknown {
        method: String,
    },
}
