// Lexical batch scanner.
//
// T-SQL carries constructs the AST parser rejects (`CREATE SYNONYM`,
// trigger bodies, vendor-specific hints). A batch that fails to parse is
// not dropped: this scanner recovers definitions and references with
// compiled regexes over the raw text, at the price of coarser precision.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::graph::keys::SqlName;
use crate::models::{NodeKind, Relation};
use crate::sql::analyzer::{SqlDefine, SqlRef, StatementFacts};

/// `[bracketed]`, `"quoted"` or bare identifier, up to three dotted parts.
const NAME: &str = r#"(?:\[[^\]]+\]|"[^"]+"|[A-Za-z_#@][\w$]*)(?:\s*\.\s*(?:\[[^\]]+\]|"[^"]+"|[A-Za-z_#@][\w$]*)){0,2}"#;

static CREATE_OBJECT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)\b(CREATE|ALTER)\s+(TABLE|VIEW|PROCEDURE|PROC|FUNCTION|TRIGGER|TYPE|SEQUENCE|SYNONYM)\s+({NAME})"
    ))
    .unwrap()
});

static ALTER_TABLE_ADD: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)\bALTER\s+TABLE\s+({NAME})\s+ADD\b")).unwrap());

static TRIGGER_ON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?is)\bCREATE\s+TRIGGER\s+{NAME}\s+ON\s+({NAME})")).unwrap()
});

static SYNONYM_FOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?is)\bCREATE\s+SYNONYM\s+{NAME}\s+FOR\s+({NAME})")).unwrap()
});

static INSERT_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)\bINSERT\s+(?:INTO\s+)?({NAME})")).unwrap());

static UPDATE_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)\bUPDATE\s+({NAME})\s+SET\b")).unwrap());

static DELETE_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)\bDELETE\s+FROM\s+({NAME})")).unwrap());

static MERGE_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)\bMERGE\s+(?:INTO\s+)?({NAME})")).unwrap());

static EXEC_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)\bEXEC(?:UTE)?\s+({NAME})")).unwrap());

static READ_SOURCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?is)\b(?:FROM|JOIN)\s+({NAME})")).unwrap());

/// `FOREIGN KEY (...) REFERENCES [schema.]name`; shared with the inline-SQL
/// scanner, which applies it to snippets recovered from C# literals.
pub static FOREIGN_KEY_REFERENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?is)\bFOREIGN\s+KEY\s*\([^)]*\)\s*REFERENCES\s+({NAME})"
    ))
    .unwrap()
});

/// Scan one batch of raw text and produce the same shape of facts the AST
/// analyzer yields.
pub fn scan_batch(text: &str) -> StatementFacts {
    let mut facts = StatementFacts::default();

    for captures in CREATE_OBJECT.captures_iter(text) {
        let verb = captures[1].to_uppercase();
        let object = captures[2].to_uppercase();
        let Some(name) = SqlName::parse(&captures[3]) else {
            continue;
        };
        if name.is_transient() {
            continue;
        }
        let kind = match object.as_str() {
            "TABLE" => NodeKind::Table,
            "VIEW" => NodeKind::View,
            "PROCEDURE" | "PROC" => NodeKind::Proc,
            "FUNCTION" => NodeKind::Func,
            "TRIGGER" => NodeKind::Trigger,
            "TYPE" => NodeKind::Type,
            "SEQUENCE" => NodeKind::Sequence,
            "SYNONYM" => NodeKind::Synonym,
            _ => continue,
        };
        // ALTER only defines for TABLE when it adds something, and for the
        // re-definable object kinds.
        if verb == "ALTER" {
            let redefines = matches!(kind, NodeKind::View | NodeKind::Proc | NodeKind::Func)
                || (kind == NodeKind::Table && ALTER_TABLE_ADD.is_match(text));
            if !redefines {
                continue;
            }
        }
        facts.defines.push(SqlDefine {
            name,
            kind,
            body: None,
        });
    }

    for captures in TRIGGER_ON.captures_iter(text) {
        push_ref(&mut facts, &captures[1], NodeKind::Table, Relation::On);
    }
    for captures in SYNONYM_FOR.captures_iter(text) {
        push_ref(&mut facts, &captures[1], NodeKind::Unknown, Relation::SynonymFor);
    }
    for captures in INSERT_TARGET.captures_iter(text) {
        push_ref(&mut facts, &captures[1], NodeKind::Table, Relation::WritesTo);
    }
    for captures in UPDATE_TARGET.captures_iter(text) {
        push_ref(&mut facts, &captures[1], NodeKind::Table, Relation::WritesTo);
    }
    for captures in DELETE_TARGET.captures_iter(text) {
        push_ref(&mut facts, &captures[1], NodeKind::Table, Relation::WritesTo);
    }
    for captures in MERGE_TARGET.captures_iter(text) {
        push_ref(&mut facts, &captures[1], NodeKind::Table, Relation::WritesTo);
    }
    for captures in EXEC_TARGET.captures_iter(text) {
        push_ref(&mut facts, &captures[1], NodeKind::Proc, Relation::Executes);
    }
    for captures in FOREIGN_KEY_REFERENCES.captures_iter(text) {
        push_ref(&mut facts, &captures[1], NodeKind::Table, Relation::ForeignKey);
    }

    let defined: Vec<String> = facts
        .defines
        .iter()
        .map(|d| d.name.base.to_lowercase())
        .collect();
    let referenced: Vec<String> = facts
        .refs
        .iter()
        .map(|r| r.name.base.to_lowercase())
        .collect();
    for captures in READ_SOURCE.captures_iter(text) {
        let Some(name) = SqlName::parse(&captures[1]) else {
            continue;
        };
        if name.is_transient() {
            continue;
        }
        let base = name.base.to_lowercase();
        if defined.contains(&base) || referenced.contains(&base) {
            continue;
        }
        facts.refs.push(SqlRef {
            name,
            kind: NodeKind::TableOrView,
            relation: Relation::ReadsFrom,
        });
    }

    facts
}

fn push_ref(facts: &mut StatementFacts, raw: &str, kind: NodeKind, relation: Relation) {
    if let Some(name) = SqlName::parse(raw) {
        if name.is_transient() {
            return;
        }
        facts.refs.push(SqlRef { name, kind, relation });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synonym_definition_and_target() {
        let facts = scan_batch("CREATE SYNONYM dbo.Cust FOR dbo.Customer;");
        assert_eq!(facts.defines.len(), 1);
        assert_eq!(facts.defines[0].kind, NodeKind::Synonym);
        assert_eq!(facts.defines[0].name.base, "dbo.Cust");
        let synonym_for: Vec<&SqlRef> = facts
            .refs
            .iter()
            .filter(|r| r.relation == Relation::SynonymFor)
            .collect();
        assert_eq!(synonym_for.len(), 1);
        assert_eq!(synonym_for[0].name.base, "dbo.Customer");
    }

    #[test]
    fn trigger_defines_and_points_at_table() {
        let facts = scan_batch(
            "CREATE TRIGGER dbo.trg_Audit ON dbo.Customer AFTER INSERT AS BEGIN \
             INSERT INTO dbo.AuditLog (Msg) SELECT 'x' FROM inserted; END",
        );
        assert!(facts
            .defines
            .iter()
            .any(|d| d.kind == NodeKind::Trigger && d.name.base == "dbo.trg_Audit"));
        assert!(facts
            .refs
            .iter()
            .any(|r| r.relation == Relation::On && r.name.base == "dbo.Customer"));
        assert!(facts
            .refs
            .iter()
            .any(|r| r.relation == Relation::WritesTo && r.name.base == "dbo.AuditLog"));
    }

    #[test]
    fn alter_procedure_and_function_redefine() {
        let facts = scan_batch(
            "ALTER PROCEDURE dbo.GetCustomers AS BEGIN SELECT Id, Name FROM dbo.Customer; END",
        );
        assert_eq!(facts.defines.len(), 1);
        assert_eq!(facts.defines[0].kind, NodeKind::Proc);
        assert_eq!(facts.defines[0].name.base, "dbo.GetCustomers");
        assert!(facts
            .refs
            .iter()
            .any(|r| r.relation == Relation::ReadsFrom && r.name.base == "dbo.Customer"));

        let facts = scan_batch(
            "ALTER FUNCTION dbo.fn_OrderTotal (@Id INT) RETURNS INT AS BEGIN RETURN 1; END",
        );
        assert_eq!(facts.defines.len(), 1);
        assert_eq!(facts.defines[0].kind, NodeKind::Func);
        assert_eq!(facts.defines[0].name.base, "dbo.fn_OrderTotal");
    }

    #[test]
    fn alter_table_without_add_is_not_a_definition() {
        let facts = scan_batch("ALTER TABLE dbo.Customer DROP COLUMN LegacyFlag;");
        assert!(facts.defines.is_empty());
        let facts = scan_batch("ALTER TABLE dbo.Customer ADD Email NVARCHAR(200) NULL;");
        assert_eq!(facts.defines.len(), 1);
        assert_eq!(facts.defines[0].kind, NodeKind::Table);
    }

    #[test]
    fn exec_and_reads_are_recovered() {
        let facts = scan_batch("EXEC dbo.RebuildIndexes; SELECT * FROM dbo.Health h JOIN dbo.Checks c ON c.Id = h.Id;");
        assert!(facts
            .refs
            .iter()
            .any(|r| r.relation == Relation::Executes && r.name.base == "dbo.RebuildIndexes"));
        assert!(facts
            .refs
            .iter()
            .any(|r| r.relation == Relation::ReadsFrom && r.name.base == "dbo.Health"));
        assert!(facts
            .refs
            .iter()
            .any(|r| r.relation == Relation::ReadsFrom && r.name.base == "dbo.Checks"));
    }

    #[test]
    fn temp_objects_never_surface() {
        let facts = scan_batch("INSERT INTO #work SELECT * FROM @rows;");
        assert!(facts.refs.is_empty());
        assert!(facts.defines.is_empty());
    }

    #[test]
    fn foreign_key_references_matches_bracketed_names() {
        let caps = FOREIGN_KEY_REFERENCES
            .captures("ALTER TABLE dbo.Child ADD CONSTRAINT FK FOREIGN KEY (PId) REFERENCES [dbo].[Parent] (Id)")
            .unwrap();
        assert_eq!(SqlName::parse(&caps[1]).unwrap().base, "dbo.Parent");
    }
}
