//! Stage sequencing for a full index run.
//!
//! Stages run in a fixed order — SQL, EF, migrations, inline SQL — over a
//! shared graph, followed by finalize and serialization. Work inside a
//! stage is parallel; stages themselves are sequential so later stages can
//! resolve against what earlier ones defined. Per-file problems stay local
//! to their file, stage-level problems degrade to warnings, and only input
//! validation or primary-artifact writes can fail the run.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{info, warn};

use crate::artifacts::bodies::BodyWriter;
use crate::artifacts::{ArtifactWriter, ManifestInfo};
use crate::config::IndexerConfig;
use crate::csharp::ef::EfGraphBuilder;
use crate::csharp::inline_sql::InlineSqlScanner;
use crate::csharp::migrations::MigrationAnalyzer;
use crate::graph::GraphModel;
use crate::sql::SqlGraphBuilder;
use crate::workspace;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("required root does not exist: {}", .0.display())]
    MissingRoot(PathBuf),
    #[error("no input roots configured; provide an SQL root or at least one code root")]
    NoInputs,
}

/// Cooperative cancellation shared across stages. Checked before each file,
/// each batch and each class/method traversal; in-flight parses finish but
/// nothing new is scheduled once the flag is set.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-stage counters, merged across worker threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageStats {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub parse_errors: usize,
}

impl StageStats {
    pub fn seen_file() -> StageStats {
        StageStats {
            files_seen: 1,
            ..Default::default()
        }
    }

    pub fn indexed_file() -> StageStats {
        StageStats {
            files_seen: 1,
            files_indexed: 1,
            ..Default::default()
        }
    }

    pub fn skipped_file() -> StageStats {
        StageStats {
            files_seen: 1,
            files_skipped: 1,
            ..Default::default()
        }
    }

    pub fn failed_file() -> StageStats {
        StageStats {
            files_seen: 1,
            files_failed: 1,
            ..Default::default()
        }
    }

    pub fn merge(self, other: StageStats) -> StageStats {
        StageStats {
            files_seen: self.files_seen + other.files_seen,
            files_indexed: self.files_indexed + other.files_indexed,
            files_skipped: self.files_skipped + other.files_skipped,
            files_failed: self.files_failed + other.files_failed,
            parse_errors: self.parse_errors + other.parse_errors,
        }
    }
}

/// Resolved inputs for one run.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub repo_root: PathBuf,
    pub sql_root: Option<PathBuf>,
    pub code_roots: Vec<PathBuf>,
    /// Empty means: fall back to the code roots.
    pub migration_roots: Vec<PathBuf>,
    /// Empty means: fall back to the code roots.
    pub inline_sql_roots: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub config: IndexerConfig,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub sql: StageStats,
    pub ef: StageStats,
    pub migrations: StageStats,
    pub inline_sql: StageStats,
    pub nodes: usize,
    pub edges: usize,
    pub docs: usize,
}

/// Run the whole pipeline. Any stage whose input root set is empty is
/// skipped; a failing SQL stage fails the run while the C# stages degrade
/// to warnings with whatever was collected so far still serialized.
pub fn run_index(options: &IndexOptions, cancel: &CancelFlag) -> Result<RunSummary> {
    validate_roots(options)?;

    let graph = GraphModel::new();
    let bodies = BodyWriter::create(&options.output_dir)?;
    let mut summary = RunSummary::default();

    if let Some(sql_root) = &options.sql_root {
        let files = workspace::find_files(sql_root, "sql")
            .with_context(|| format!("enumerating SQL files under {}", sql_root.display()))?;
        info!(count = files.len(), root = %sql_root.display(), "SQL stage");
        let builder = SqlGraphBuilder {
            graph: &graph,
            bodies: &bodies,
            repo_root: &options.repo_root,
            sql_root,
            cancel,
        };
        summary.sql = builder.run(&files);
        log_stage("sql", &summary.sql);
    }

    if !options.code_roots.is_empty() {
        match enumerate_all(&options.code_roots) {
            Ok(files) => {
                info!(count = files.len(), "EF stage");
                let builder = EfGraphBuilder {
                    graph: &graph,
                    bodies: &bodies,
                    repo_root: &options.repo_root,
                    config: &options.config,
                    cancel,
                };
                summary.ef = builder.run(&files);
                log_stage("ef", &summary.ef);
            }
            Err(err) => warn!(error = %err, "EF stage skipped"),
        }
    }

    let migration_roots = fallback_roots(&options.migration_roots, &options.code_roots);
    if !migration_roots.is_empty() {
        match enumerate_all(&migration_roots) {
            Ok(files) => {
                info!(count = files.len(), "migration stage");
                let analyzer = MigrationAnalyzer {
                    graph: &graph,
                    bodies: &bodies,
                    repo_root: &options.repo_root,
                    cancel,
                };
                summary.migrations = analyzer.run(&files);
                log_stage("migrations", &summary.migrations);
            }
            Err(err) => warn!(error = %err, "migration stage skipped"),
        }
    }

    let inline_roots = fallback_roots(&options.inline_sql_roots, &options.code_roots);
    if !inline_roots.is_empty() {
        match enumerate_all(&inline_roots) {
            Ok(files) => {
                info!(count = files.len(), "inline SQL stage");
                let sql_root = options
                    .sql_root
                    .clone()
                    .unwrap_or_else(|| options.repo_root.clone());
                let scanner = InlineSqlScanner {
                    graph: &graph,
                    bodies: &bodies,
                    repo_root: &options.repo_root,
                    sql_root: &sql_root,
                    config: &options.config,
                    cancel,
                };
                summary.inline_sql = scanner.run(&files);
                log_stage("inline-sql", &summary.inline_sql);
            }
            Err(err) => warn!(error = %err, "inline SQL stage skipped"),
        }
    }

    let finalized = graph.finalize();
    if let Err(err) = bodies.finish() {
        warn!(error = %err, "body stream flush failed");
    }

    let manifest = ManifestInfo {
        built_at: chrono::Utc::now().to_rfc3339(),
        sql_root: options
            .sql_root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        code_roots: options
            .code_roots
            .iter()
            .map(|p| p.display().to_string())
            .collect(),
        docs: bodies.docs_written(),
    };
    let writer = ArtifactWriter {
        output_dir: &options.output_dir,
    };
    writer.write_all(&finalized, &manifest)?;

    summary.nodes = finalized.nodes.len();
    summary.edges = finalized.edges.len();
    summary.docs = bodies.docs_written();
    info!(
        nodes = summary.nodes,
        edges = summary.edges,
        docs = summary.docs,
        "index complete"
    );
    Ok(summary)
}

fn validate_roots(options: &IndexOptions) -> Result<(), IndexError> {
    if options.sql_root.is_none() && options.code_roots.is_empty() {
        return Err(IndexError::NoInputs);
    }
    let mut required: Vec<&Path> = Vec::new();
    if let Some(sql_root) = &options.sql_root {
        required.push(sql_root);
    }
    required.extend(options.code_roots.iter().map(PathBuf::as_path));
    for root in required {
        if !root.is_dir() {
            return Err(IndexError::MissingRoot(root.to_path_buf()));
        }
    }
    Ok(())
}

fn fallback_roots(primary: &[PathBuf], fallback: &[PathBuf]) -> Vec<PathBuf> {
    if primary.is_empty() {
        fallback.to_vec()
    } else {
        primary.to_vec()
    }
}

fn enumerate_all(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for root in roots {
        files.extend(
            workspace::find_files(root, "cs")
                .with_context(|| format!("enumerating C# files under {}", root.display()))?,
        );
    }
    files.sort();
    files.dedup();
    Ok(files)
}

fn log_stage(stage: &str, stats: &StageStats) {
    info!(
        stage,
        seen = stats.files_seen,
        indexed = stats.files_indexed,
        skipped = stats.files_skipped,
        failed = stats.files_failed,
        parse_errors = stats.parse_errors,
        "stage finished"
    );
}
