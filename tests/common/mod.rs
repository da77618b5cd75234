// Shared fixture for end-to-end tests: builds a throwaway repository
// layout, runs the full pipeline, and reads back the emitted artifacts.

use std::fs;
use std::path::{Path, PathBuf};

use codegraph::config::IndexerConfig;
use codegraph::orchestrator::{run_index, CancelFlag, IndexOptions, RunSummary};
use tempfile::TempDir;

pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    pub fn new() -> Fixture {
        Fixture {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn out(&self) -> PathBuf {
        self.root().join("out")
    }

    pub fn write(&self, rel: &str, contents: &str) {
        let path = self.root().join(rel);
        fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        fs::write(path, contents).expect("write fixture file");
    }

    /// Run the pipeline with `db/` as the SQL root and `src/` as the code
    /// root, whichever of the two exist.
    pub fn run(&self, config: IndexerConfig) -> RunSummary {
        self.run_into(config, &self.out())
    }

    pub fn run_into(&self, config: IndexerConfig, output_dir: &Path) -> RunSummary {
        let sql_root = self.root().join("db");
        let code_root = self.root().join("src");
        let options = IndexOptions {
            repo_root: self.root().to_path_buf(),
            sql_root: sql_root.is_dir().then_some(sql_root),
            code_roots: if code_root.is_dir() {
                vec![code_root]
            } else {
                vec![]
            },
            migration_roots: vec![],
            inline_sql_roots: vec![],
            output_dir: output_dir.to_path_buf(),
            config,
        };
        run_index(&options, &CancelFlag::default()).expect("pipeline run")
    }

    pub fn nodes(&self) -> Vec<Vec<String>> {
        read_csv(&self.out().join("graph/nodes.csv"))
    }

    pub fn edges(&self) -> Vec<Vec<String>> {
        read_csv(&self.out().join("graph/edges.csv"))
    }

    pub fn node_keys(&self) -> Vec<String> {
        self.nodes().into_iter().map(|row| row[0].clone()).collect()
    }

    pub fn jsonl_records(&self) -> Vec<serde_json::Value> {
        let text = fs::read_to_string(self.out().join("docs/sql_bodies.jsonl"))
            .expect("sql_bodies.jsonl");
        text.lines()
            .map(|line| serde_json::from_str(line).expect("jsonl line"))
            .collect()
    }
}

pub fn read_csv(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .unwrap_or_else(|err| panic!("opening {}: {err}", path.display()));
    reader
        .records()
        .map(|record| {
            record
                .expect("csv record")
                .iter()
                .map(|cell| cell.to_string())
                .collect()
        })
        .collect()
}

/// Convenience for asserting an edge row `(from, to, relation)` exists.
pub fn has_edge(edges: &[Vec<String>], from: &str, to: &str, relation: &str) -> bool {
    edges
        .iter()
        .any(|row| row[0] == from && row[1] == to && row[2] == relation)
}
