//! # Codegraph
//!
//! Codegraph is a fully local indexer that fuses three views of a C#/T-SQL
//! codebase — SQL scripts, EF-style mappings and migrations, and SQL
//! embedded in C# string literals — into one cross-domain knowledge graph.
//!
//! The crate provides both a command-line interface and a library that can
//! be driven programmatically.
//!
//! ## Example
//!
//! ```no_run
//! use codegraph::config::IndexerConfig;
//! use codegraph::orchestrator::{run_index, CancelFlag, IndexOptions};
//! use std::path::PathBuf;
//!
//! let options = IndexOptions {
//!     repo_root: PathBuf::from("."),
//!     sql_root: Some(PathBuf::from("db")),
//!     code_roots: vec![PathBuf::from("src")],
//!     migration_roots: vec![],
//!     inline_sql_roots: vec![],
//!     output_dir: PathBuf::from("codegraph-out"),
//!     config: IndexerConfig::default(),
//! };
//!
//! let summary = run_index(&options, &CancelFlag::default()).unwrap();
//! println!("{} nodes, {} edges", summary.nodes, summary.edges);
//! ```
//!
//! The outputs land under the output directory: `graph/nodes.csv`,
//! `graph/edges.csv`, `graph/graph.json`, `docs/sql_bodies.jsonl`,
//! per-object body files under `docs/bodies/`, and `manifest.json`.

pub mod artifacts;
pub mod cli;
pub mod config;
pub mod csharp;
pub mod graph;
pub mod models;
pub mod orchestrator;
pub mod sql;
pub mod version;
pub mod workspace;

// Re-export commonly used types for convenience
pub use config::IndexerConfig;
pub use graph::{FinalizedGraph, GraphModel};
pub use models::{Edge, Node, NodeKind, Relation};
pub use orchestrator::{run_index, CancelFlag, IndexOptions, RunSummary};
