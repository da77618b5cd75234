// Per-batch statement analysis over the sqlparser AST.
//
// Each statement yields definitions (CREATE/ALTER of schema objects) and
// references (reads, writes, executions, foreign keys). References carry
// tentative kinds (`TABLE_OR_VIEW`, `UNKNOWN`) where the statement alone
// cannot decide what the referenced object is; the graph's finalize pass
// settles them. All access to AST name types goes through `object_name` /
// `table_factor_name` so dialect quirks stay in one place.

use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_relations, AlterTableOperation, ColumnOption, ObjectName, Statement, TableConstraint,
    TableFactor, TableObject, TableWithJoins,
};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser as TsqlParser;

use crate::graph::keys::SqlName;
use crate::models::{NodeKind, Relation};

/// A schema object defined by a statement.
#[derive(Debug, Clone)]
pub struct SqlDefine {
    pub name: SqlName,
    pub kind: NodeKind,
    /// Re-serialized statement text for body-bearing kinds.
    pub body: Option<String>,
}

/// An object referenced by a statement.
#[derive(Debug, Clone)]
pub struct SqlRef {
    pub name: SqlName,
    pub kind: NodeKind,
    pub relation: Relation,
}

/// Everything one statement contributes to the graph.
#[derive(Debug, Default, Clone)]
pub struct StatementFacts {
    pub defines: Vec<SqlDefine>,
    pub refs: Vec<SqlRef>,
}

/// Parse one preprocessed batch with the T-SQL dialect.
pub fn parse_batch(text: &str) -> Result<Vec<Statement>, sqlparser::parser::ParserError> {
    TsqlParser::parse_sql(&MsSqlDialect {}, text)
}

/// Classify a statement into definitions and references.
pub fn analyze_statement(stmt: &Statement) -> StatementFacts {
    let mut facts = StatementFacts::default();

    match stmt {
        Statement::CreateTable(create) => {
            if let Some(name) = object_name(&create.name) {
                push_define(&mut facts, name, NodeKind::Table, Some(stmt.to_string()));
            }
            for constraint in &create.constraints {
                if let TableConstraint::ForeignKey { foreign_table, .. } = constraint {
                    push_ref(&mut facts, object_name(foreign_table), NodeKind::Table, Relation::ForeignKey);
                }
            }
            for column in &create.columns {
                for option in &column.options {
                    if let ColumnOption::ForeignKey { foreign_table, .. } = &option.option {
                        push_ref(&mut facts, object_name(foreign_table), NodeKind::Table, Relation::ForeignKey);
                    }
                }
            }
        }
        Statement::CreateView { name, .. } => {
            if let Some(name) = object_name(name) {
                push_define(&mut facts, name, NodeKind::View, Some(stmt.to_string()));
            }
        }
        Statement::AlterView { name, .. } => {
            if let Some(name) = object_name(name) {
                push_define(&mut facts, name, NodeKind::View, Some(stmt.to_string()));
            }
        }
        Statement::CreateProcedure { name, body, .. } => {
            if let Some(name) = object_name(name) {
                push_define(&mut facts, name, NodeKind::Proc, Some(stmt.to_string()));
            }
            for inner in body {
                let inner_facts = analyze_statement(inner);
                facts.refs.extend(inner_facts.refs);
            }
        }
        Statement::CreateFunction(create) => {
            if let Some(name) = object_name(&create.name) {
                push_define(&mut facts, name, NodeKind::Func, Some(stmt.to_string()));
            }
        }
        Statement::CreateTrigger {
            name, table_name, ..
        } => {
            if let Some(name) = object_name(name) {
                push_define(&mut facts, name, NodeKind::Trigger, Some(stmt.to_string()));
            }
            push_ref(&mut facts, object_name(table_name), NodeKind::Table, Relation::On);
        }
        Statement::CreateSequence { name, .. } => {
            if let Some(name) = object_name(name) {
                push_define(&mut facts, name, NodeKind::Sequence, Some(stmt.to_string()));
            }
        }
        Statement::CreateType { name, .. } => {
            if let Some(name) = object_name(name) {
                push_define(&mut facts, name, NodeKind::Type, Some(stmt.to_string()));
            }
        }
        Statement::AlterTable {
            name, operations, ..
        } => {
            let adds_something = operations.iter().any(|op| {
                matches!(
                    op,
                    AlterTableOperation::AddColumn { .. } | AlterTableOperation::AddConstraint(_)
                )
            });
            if adds_something {
                if let Some(name) = object_name(name) {
                    push_define(&mut facts, name, NodeKind::Table, Some(stmt.to_string()));
                }
            }
            for op in operations {
                if let AlterTableOperation::AddConstraint(TableConstraint::ForeignKey {
                    foreign_table,
                    ..
                }) = op
                {
                    push_ref(&mut facts, object_name(foreign_table), NodeKind::Table, Relation::ForeignKey);
                }
            }
        }
        Statement::Insert(insert) => {
            if let TableObject::TableName(name) = &insert.table {
                push_ref(&mut facts, object_name(name), NodeKind::Table, Relation::WritesTo);
            }
        }
        Statement::Update { table, .. } => {
            push_ref(&mut facts, table_with_joins_name(table), NodeKind::Table, Relation::WritesTo);
        }
        Statement::Delete(delete) => {
            if !delete.tables.is_empty() {
                for name in &delete.tables {
                    push_ref(&mut facts, object_name(name), NodeKind::Table, Relation::WritesTo);
                }
            } else {
                for table in delete_from_tables(delete) {
                    push_ref(&mut facts, Some(table), NodeKind::Table, Relation::WritesTo);
                }
            }
        }
        Statement::Merge { table, source, .. } => {
            push_ref(&mut facts, table_factor_name(table), NodeKind::Table, Relation::WritesTo);
            push_ref(
                &mut facts,
                table_factor_name(source),
                NodeKind::TableOrView,
                Relation::ReadsFrom,
            );
        }
        Statement::Execute { name, .. } => {
            push_ref(&mut facts, object_name(name), NodeKind::Proc, Relation::Executes);
        }
        _ => {}
    }

    collect_generic_reads(stmt, &mut facts);
    facts
}

/// Sweep every named relation in the statement and record the ones not
/// already accounted for as `ReadsFrom TABLE_OR_VIEW`.
fn collect_generic_reads(stmt: &Statement, facts: &mut StatementFacts) {
    let mut reads: Vec<SqlName> = Vec::new();
    let _ = visit_relations(stmt, |relation: &ObjectName| {
        if let Some(name) = object_name(relation) {
            reads.push(name);
        }
        ControlFlow::<()>::Continue(())
    });

    for name in reads {
        if name.is_transient() {
            continue;
        }
        let already_known = facts
            .defines
            .iter()
            .map(|d| d.name.base.as_str())
            .chain(facts.refs.iter().map(|r| r.name.base.as_str()))
            .any(|base| base.eq_ignore_ascii_case(&name.base));
        if !already_known {
            facts.refs.push(SqlRef {
                name,
                kind: NodeKind::TableOrView,
                relation: Relation::ReadsFrom,
            });
        }
    }
}

fn push_define(facts: &mut StatementFacts, name: SqlName, kind: NodeKind, body: Option<String>) {
    if name.is_transient() {
        return;
    }
    facts.defines.push(SqlDefine { name, kind, body });
}

fn push_ref(facts: &mut StatementFacts, name: Option<SqlName>, kind: NodeKind, relation: Relation) {
    if let Some(name) = name {
        if name.is_transient() {
            return;
        }
        facts.refs.push(SqlRef { name, kind, relation });
    }
}

fn object_name(name: &ObjectName) -> Option<SqlName> {
    let parts: Vec<String> = name.0.iter().map(|ident| ident.value.clone()).collect();
    let part_refs: Vec<&str> = parts.iter().map(|p| p.as_str()).collect();
    SqlName::from_parts(&part_refs)
}

fn table_factor_name(factor: &TableFactor) -> Option<SqlName> {
    match factor {
        TableFactor::Table { name, .. } => object_name(name),
        _ => None,
    }
}

fn table_with_joins_name(table: &TableWithJoins) -> Option<SqlName> {
    table_factor_name(&table.relation)
}

fn delete_from_tables(delete: &sqlparser::ast::Delete) -> Vec<SqlName> {
    use sqlparser::ast::FromTable;
    let tables = match &delete.from {
        FromTable::WithFromKeyword(tables) => tables,
        FromTable::WithoutKeyword(tables) => tables,
    };
    tables.iter().filter_map(table_with_joins_name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(sql: &str) -> Vec<StatementFacts> {
        parse_batch(sql)
            .expect("batch should parse")
            .iter()
            .map(analyze_statement)
            .collect()
    }

    #[test]
    fn create_table_defines_and_carries_body() {
        let facts = analyze("CREATE TABLE dbo.Customer (Id INT NOT NULL PRIMARY KEY, Name NVARCHAR(100) NOT NULL);");
        assert_eq!(facts[0].defines.len(), 1);
        let def = &facts[0].defines[0];
        assert_eq!(def.name.base, "dbo.Customer");
        assert_eq!(def.kind, NodeKind::Table);
        assert!(def.body.as_ref().unwrap().contains("CREATE TABLE"));
    }

    #[test]
    fn foreign_key_constraint_references_principal() {
        let facts = analyze(
            "CREATE TABLE dbo.Child (Id INT PRIMARY KEY, ParentId INT NOT NULL, \
             CONSTRAINT FK_Child_Parent FOREIGN KEY (ParentId) REFERENCES dbo.Parent(Id));",
        );
        let fk: Vec<&SqlRef> = facts[0]
            .refs
            .iter()
            .filter(|r| r.relation == Relation::ForeignKey)
            .collect();
        assert_eq!(fk.len(), 1);
        assert_eq!(fk[0].name.base, "dbo.Parent");
        assert_eq!(fk[0].kind, NodeKind::Table);
    }

    #[test]
    fn select_sources_become_tentative_reads() {
        let facts = analyze("SELECT c.Id FROM dbo.Customer c JOIN dbo.Orders o ON o.CustomerId = c.Id;");
        let bases: Vec<&str> = facts[0].refs.iter().map(|r| r.name.base.as_str()).collect();
        assert!(bases.contains(&"dbo.Customer"));
        assert!(bases.contains(&"dbo.Orders"));
        assert!(facts[0]
            .refs
            .iter()
            .all(|r| r.relation == Relation::ReadsFrom && r.kind == NodeKind::TableOrView));
    }

    #[test]
    fn insert_target_is_a_write() {
        let facts = analyze("INSERT INTO dbo.AuditLog (Message) SELECT Message FROM dbo.Staging;");
        let writes: Vec<&SqlRef> = facts[0]
            .refs
            .iter()
            .filter(|r| r.relation == Relation::WritesTo)
            .collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].name.base, "dbo.AuditLog");
        assert!(facts[0]
            .refs
            .iter()
            .any(|r| r.relation == Relation::ReadsFrom && r.name.base == "dbo.Staging"));
    }

    #[test]
    fn update_and_delete_targets_are_writes() {
        let facts = analyze("UPDATE dbo.Customer SET Name = 'x' WHERE Id = 1;");
        assert!(facts[0]
            .refs
            .iter()
            .any(|r| r.relation == Relation::WritesTo && r.name.base == "dbo.Customer"));

        let facts = analyze("DELETE FROM dbo.Orders WHERE Id = 2;");
        assert!(facts[0]
            .refs
            .iter()
            .any(|r| r.relation == Relation::WritesTo && r.name.base == "dbo.Orders"));
    }

    #[test]
    fn temp_tables_and_variables_are_ignored() {
        let facts = analyze("SELECT * FROM #staging;");
        assert!(facts[0].refs.is_empty());
    }

    #[test]
    fn create_view_defines_and_reads() {
        let facts = analyze("CREATE VIEW dbo.ActiveCustomers AS SELECT Id FROM dbo.Customer WHERE IsActive = 1;");
        assert_eq!(facts[0].defines[0].kind, NodeKind::View);
        assert!(facts[0]
            .refs
            .iter()
            .any(|r| r.name.base == "dbo.Customer" && r.relation == Relation::ReadsFrom));
    }
}
