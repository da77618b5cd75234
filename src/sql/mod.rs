//! SQL stage: walks `*.sql` files under the SQL root and projects their
//! definitions and references into the shared graph, streaming object
//! bodies to `docs/bodies/` as they are produced.
//!
//! Files are independent and parse in parallel; graph insertion is
//! insert-or-skip and body/JSONL writes serialize behind the body writer's
//! mutex. A batch the AST parser rejects is logged and handed to the
//! lexical fallback scanner instead of being dropped.

pub mod analyzer;
pub mod fallback;
pub mod preprocess;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::artifacts::bodies::{sanitize_component, BodyWriter};
use crate::graph::keys::{normalize_path, node_key};
use crate::graph::GraphModel;
use crate::models::{BodyRecord, Edge, Node, NodeKind};
use crate::orchestrator::{CancelFlag, StageStats};
use analyzer::{SqlDefine, SqlRef, StatementFacts};
use preprocess::SqlBatch;

/// Directory names that never contribute schema objects.
pub const SKIP_DIRS: [&str; 7] = ["Snapshots", "Tools", "bin", "obj", ".git", ".svn", ".hg"];

/// File names whose define-less batches count as deployment scripts.
const DEPLOY_SCRIPTS: [&str; 2] = ["PreDeployment.sql", "PostDeployment.sql"];

pub struct SqlGraphBuilder<'a> {
    pub graph: &'a GraphModel,
    pub bodies: &'a BodyWriter,
    pub repo_root: &'a Path,
    pub sql_root: &'a Path,
    pub cancel: &'a CancelFlag,
}

impl<'a> SqlGraphBuilder<'a> {
    /// Index every SQL file, in parallel. Per-file failures are logged and
    /// counted; they never abort the stage.
    pub fn run(&self, files: &[PathBuf]) -> StageStats {
        let outcomes: Vec<StageStats> = files
            .par_iter()
            .map(|path| {
                if self.cancel.is_cancelled() || is_skipped(path) {
                    return StageStats::skipped_file();
                }
                match self.index_file(path) {
                    Ok(stats) => stats,
                    Err(err) => {
                        warn!(file = %path.display(), error = %err, "skipping unreadable SQL file");
                        StageStats::failed_file()
                    }
                }
            })
            .collect();
        outcomes.into_iter().fold(StageStats::default(), StageStats::merge)
    }

    fn index_file(&self, path: &Path) -> Result<StageStats> {
        let raw = fs::read_to_string(path)?;
        let mut stats = StageStats::seen_file();

        let rel_file = relative_to(path, self.repo_root);
        let domain = domain_of(path, self.sql_root);
        let script = preprocess::preprocess(&raw);

        for batch in preprocess::split_batches(&script) {
            if self.cancel.is_cancelled() {
                break;
            }
            let parsed = match analyzer::parse_batch(&batch.text) {
                Ok(statements) => {
                    let facts: Vec<StatementFacts> =
                        statements.iter().map(analyzer::analyze_statement).collect();
                    Some(facts)
                }
                Err(err) => {
                    stats.parse_errors += 1;
                    warn!(
                        file = %path.display(),
                        batch = batch.index,
                        error = %err,
                        "batch rejected by SQL parser, using lexical scan"
                    );
                    None
                }
            };
            let per_statement =
                parsed.unwrap_or_else(|| vec![fallback::scan_batch(&batch.text)]);
            self.emit_batch(&batch, per_statement, path, &rel_file, &domain);
        }

        stats.files_indexed = 1;
        Ok(stats)
    }

    /// Project one batch's facts into the graph. References attach to the
    /// statement's own definition when it has one, otherwise to the most
    /// recent definition in the batch; references seen before any
    /// definition attach to the batch's first definition, or to the
    /// DEPLOY/BATCH pseudo-definition when the batch defines nothing.
    fn emit_batch(
        &self,
        batch: &SqlBatch,
        per_statement: Vec<StatementFacts>,
        path: &Path,
        rel_file: &str,
        domain: &str,
    ) {
        let mut current_def: Option<String> = None;
        let mut first_def: Option<String> = None;
        let mut pending: Vec<SqlRef> = Vec::new();

        for facts in per_statement {
            let statement_def = facts.defines.first().map(|d| d.name.key(d.kind));
            for define in &facts.defines {
                self.emit_define(define, batch, rel_file, domain);
            }
            if let Some(def_key) = &statement_def {
                first_def.get_or_insert_with(|| def_key.clone());
                // Attach the refs that accumulated before the batch's first
                // definition appeared.
                for reference in pending.drain(..) {
                    self.emit_ref(def_key, &reference, batch, rel_file);
                }
            }
            let from = statement_def.clone().or_else(|| current_def.clone());
            for reference in facts.refs {
                match &from {
                    Some(def_key) => self.emit_ref(def_key, &reference, batch, rel_file),
                    None => pending.push(reference),
                }
            }
            if let Some(def_key) = facts.defines.last().map(|d| d.name.key(d.kind)) {
                current_def = Some(def_key);
            }
        }

        if first_def.is_none() {
            let pseudo = self.emit_pseudo_define(batch, path, rel_file, domain);
            for reference in pending.drain(..) {
                self.emit_ref(&pseudo, &reference, batch, rel_file);
            }
        }
    }

    fn emit_define(&self, define: &SqlDefine, batch: &SqlBatch, rel_file: &str, domain: &str) {
        let key = define.name.key(define.kind);
        let body_rel = define.kind.is_body_bearing_sql().then(|| {
            format!(
                "docs/bodies/{}.{}.{}.sql",
                sanitize_component(&define.name.schema),
                sanitize_component(&define.name.name),
                define.kind.as_str()
            )
        });
        let node = Node {
            key: key.clone(),
            kind: define.kind,
            name: define.name.name.clone(),
            schema: define.name.schema.clone(),
            file: rel_file.to_string(),
            batch: Some(batch.index),
            domain: domain.to_string(),
            body_path: body_rel.clone(),
        };
        if !self.graph.try_add_node(node) {
            return;
        }
        debug!(key = %key, "defined SQL object");

        if let Some(body_rel) = body_rel {
            let body = define.body.clone().unwrap_or_else(|| batch.text.clone());
            let record = BodyRecord::new(define.kind, &key, rel_file, &body_rel, &body);
            if let Err(err) = self.bodies.write_body(&body_rel, &body, &record) {
                warn!(key = %key, error = %err, "body write failed");
                self.graph.clear_body_path(&key);
            }
        }
    }

    fn emit_ref(&self, from_key: &str, reference: &SqlRef, batch: &SqlBatch, rel_file: &str) {
        self.graph.add_edge(
            Edge::new(from_key, reference.name.key(reference.kind), reference.relation)
                .with_origin(rel_file, Some(batch.index)),
        );
    }

    /// A batch with no definitions still appears in the graph, as a DEPLOY
    /// node for the deployment entry scripts and a BATCH node otherwise.
    fn emit_pseudo_define(
        &self,
        batch: &SqlBatch,
        path: &Path,
        rel_file: &str,
        domain: &str,
    ) -> String {
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| rel_file.to_string());
        let kind = if DEPLOY_SCRIPTS.iter().any(|d| *d == basename) {
            NodeKind::Deploy
        } else {
            NodeKind::Batch
        };
        let base = format!("{basename}#batch{}", batch.index);
        let key = node_key(&base, kind);
        self.graph.try_add_node(Node {
            key: key.clone(),
            kind,
            name: basename,
            schema: String::new(),
            file: rel_file.to_string(),
            batch: Some(batch.index),
            domain: domain.to_string(),
            body_path: None,
        });
        key
    }
}

/// Whether the path crosses one of the ignored directory names.
pub fn is_skipped(path: &Path) -> bool {
    path.components().any(|c| {
        let text = c.as_os_str().to_string_lossy();
        SKIP_DIRS.iter().any(|skip| *skip == text)
    })
}

/// Path relative to `root`, `/`-separated; falls back to the full path when
/// the file lies outside the root.
pub fn relative_to(path: &Path, root: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    normalize_path(&rel.to_string_lossy())
}

/// First path segment under the SQL root, empty when the file sits at the
/// root itself.
pub fn domain_of(path: &Path, sql_root: &Path) -> String {
    path.strip_prefix(sql_root)
        .ok()
        .and_then(|rel| {
            let mut components = rel.components();
            let first = components.next()?;
            // Only a directory counts; a bare file name is not a domain.
            components.next()?;
            Some(first.as_os_str().to_string_lossy().to_string())
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_list_matches_directory_components() {
        assert!(is_skipped(Path::new("db/Snapshots/v1.sql")));
        assert!(is_skipped(Path::new("db/bin/out.sql")));
        assert!(!is_skipped(Path::new("db/Tables/Customer.sql")));
        // Only whole components match, not substrings.
        assert!(!is_skipped(Path::new("db/Toolsmith/Customer.sql")));
    }

    #[test]
    fn domain_is_first_segment_under_sql_root() {
        let root = Path::new("/repo/db");
        assert_eq!(domain_of(Path::new("/repo/db/Sales/Customer.sql"), root), "Sales");
        assert_eq!(domain_of(Path::new("/repo/db/Customer.sql"), root), "");
        assert_eq!(
            domain_of(Path::new("/repo/db/Sales/Tables/Customer.sql"), root),
            "Sales"
        );
    }

    #[test]
    fn relative_paths_are_slash_normalized() {
        let root = Path::new("/repo");
        assert_eq!(
            relative_to(Path::new("/repo/db/Tables/Customer.sql"), root),
            "db/Tables/Customer.sql"
        );
    }
}
