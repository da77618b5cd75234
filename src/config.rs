use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// On-disk configuration file. All fields are optional so partial files
/// work; unset fields fall back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    entity_base_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ef_migration_roots: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_sql_extra_hot_methods: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_sql_roots: Option<Vec<String>>,
}

/// Resolved, immutable configuration handed to the stages. Tests construct
/// these directly; the binary loads them from `codegraph.json`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexerConfig {
    /// Fully qualified base types whose subclasses count as entities even
    /// without a DbSet.
    pub entity_base_types: Vec<String>,
    /// Roots to scan for migration classes; empty falls back to code roots.
    pub ef_migration_roots: Vec<String>,
    /// Extra method names treated as SQL-bearing, merged with the built-ins.
    pub inline_sql_extra_hot_methods: Vec<String>,
    /// Roots to scan for inline SQL; empty falls back to code roots.
    pub inline_sql_roots: Vec<String>,
}

/// Default config file name, looked up in the repository root.
pub const CONFIG_FILE_NAME: &str = "codegraph.json";

impl IndexerConfig {
    pub fn load(path: &Path) -> Result<IndexerConfig> {
        let raw_text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let raw: RawConfig = serde_json::from_str(&raw_text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(IndexerConfig {
            entity_base_types: raw.entity_base_types.unwrap_or_default(),
            ef_migration_roots: raw.ef_migration_roots.unwrap_or_default(),
            inline_sql_extra_hot_methods: raw.inline_sql_extra_hot_methods.unwrap_or_default(),
            inline_sql_roots: raw.inline_sql_roots.unwrap_or_default(),
        })
    }

    /// Explicit path wins; otherwise `codegraph.json` in the repository
    /// root is picked up when present, and defaults apply when it is not.
    pub fn discover(explicit: Option<&Path>, repo_root: &Path) -> Result<IndexerConfig> {
        if let Some(path) = explicit {
            return IndexerConfig::load(path);
        }
        let default_path = repo_root.join(CONFIG_FILE_NAME);
        if default_path.is_file() {
            return IndexerConfig::load(&default_path);
        }
        Ok(IndexerConfig::default())
    }
}
