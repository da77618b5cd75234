// Node-key construction and parsing.
//
// A key is `{base}|{KIND}` where base is either a SQL object name
// (`[db.]schema.name`) or a C# identity prefixed with `csharp:`. Keys refer
// to objects that may not be defined yet, so references can carry tentative
// placeholder kinds that finalize reconciles later.

use crate::models::NodeKind;

/// Prefix marking C#-side node bases (`csharp:Ns.Class.Member`).
pub const CSHARP_PREFIX: &str = "csharp:";

/// Default schema for unqualified SQL object names.
pub const DEFAULT_SCHEMA: &str = "dbo";

/// Build a node key from a base identity and a kind.
pub fn node_key(base: &str, kind: NodeKind) -> String {
    format!("{base}|{}", kind.as_str())
}

/// Split a key into its base and kind. Keys without a `|` separator come
/// back with `NodeKind::Unknown`.
pub fn split_key(key: &str) -> (&str, NodeKind) {
    match key.rsplit_once('|') {
        Some((base, kind)) => (base, NodeKind::parse(kind)),
        None => (key, NodeKind::Unknown),
    }
}

/// Split a base identity into `(qualifier, name)` at the last dot.
/// `dbo.Customer` -> `("dbo", "Customer")`; an unqualified base has an
/// empty qualifier.
pub fn split_base(base: &str) -> (&str, &str) {
    match base.rsplit_once('.') {
        Some((qualifier, name)) => (qualifier, name),
        None => ("", base),
    }
}

/// Strip T-SQL identifier delimiters: `[x]`, `"x"` and surrounding whitespace.
pub fn clean_ident(raw: &str) -> String {
    let s = raw.trim();
    let s = s.strip_prefix('[').and_then(|s| s.strip_suffix(']')).unwrap_or(s);
    let s = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')).unwrap_or(s);
    s.trim().to_string()
}

/// Normalized SQL object name: schema-qualified with `dbo` as the default,
/// keeping a database prefix when the source used a three-part name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlName {
    pub schema: String,
    pub name: String,
    /// `[db.]schema.name`, the base used in node keys.
    pub base: String,
}

impl SqlName {
    /// Build from raw name parts (already split on `.`). Empty input yields
    /// `None`; delimiters are stripped from each part.
    pub fn from_parts(parts: &[&str]) -> Option<SqlName> {
        let cleaned: Vec<String> = parts
            .iter()
            .map(|p| clean_ident(p))
            .filter(|p| !p.is_empty())
            .collect();
        match cleaned.as_slice() {
            [] => None,
            [name] => Some(SqlName {
                schema: DEFAULT_SCHEMA.to_string(),
                name: name.clone(),
                base: format!("{DEFAULT_SCHEMA}.{name}"),
            }),
            [schema, name] => Some(SqlName {
                schema: schema.clone(),
                name: name.clone(),
                base: format!("{schema}.{name}"),
            }),
            more => {
                let name = more[more.len() - 1].clone();
                let schema = more[more.len() - 2].clone();
                let base = more.join(".");
                Some(SqlName { schema, name, base })
            }
        }
    }

    /// Parse a dotted (possibly bracketed) name such as `[dbo].[Customer]`.
    pub fn parse(raw: &str) -> Option<SqlName> {
        let parts: Vec<&str> = raw.split('.').collect();
        SqlName::from_parts(&parts)
    }

    /// Temp tables (`#t`) and table variables (`@t`) never enter the graph.
    pub fn is_transient(&self) -> bool {
        self.name.starts_with('#') || self.name.starts_with('@')
    }

    pub fn key(&self, kind: NodeKind) -> String {
        node_key(&self.base, kind)
    }
}

/// Normalize a path to forward slashes for keys, CSV cells and JSON.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/")
}
