//! Primary artifact serialization: `graph/nodes.csv`, `graph/edges.csv`,
//! `graph/graph.json` and `manifest.json`. Failures here are fatal for the
//! run, unlike body/JSONL writes.

pub mod bodies;

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use csv::{QuoteStyle, WriterBuilder};
use serde_json::json;

use crate::graph::keys::split_key;
use crate::graph::FinalizedGraph;
use crate::models::{Edge, Node};

/// Everything `manifest.json` reports about a run.
#[derive(Debug, Clone)]
pub struct ManifestInfo {
    pub built_at: String,
    pub sql_root: String,
    pub code_roots: Vec<String>,
    pub docs: usize,
}

pub struct ArtifactWriter<'a> {
    pub output_dir: &'a Path,
}

impl<'a> ArtifactWriter<'a> {
    pub fn write_all(&self, graph: &FinalizedGraph, manifest: &ManifestInfo) -> Result<()> {
        let graph_dir = self.output_dir.join("graph");
        fs::create_dir_all(&graph_dir)
            .with_context(|| format!("creating {}", graph_dir.display()))?;
        self.write_nodes_csv(&graph_dir.join("nodes.csv"), &graph.nodes)?;
        self.write_edges_csv(&graph_dir.join("edges.csv"), &graph.edges)?;
        self.write_graph_json(&graph_dir.join("graph.json"), graph)?;
        self.write_manifest(&self.output_dir.join("manifest.json"), graph, manifest)?;
        Ok(())
    }

    fn csv_writer(&self, path: &PathBuf) -> Result<csv::Writer<File>> {
        let file =
            File::create(path).with_context(|| format!("creating {}", path.display()))?;
        Ok(WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(file))
    }

    fn write_nodes_csv(&self, path: &PathBuf, nodes: &[Node]) -> Result<()> {
        let mut writer = self.csv_writer(path)?;
        writer.write_record([
            "key", "kind", "name", "schema", "file", "batch", "domain", "body_path",
        ])?;
        for node in nodes {
            let batch = batch_cell(node.batch);
            writer.write_record([
                node.key.as_str(),
                node.kind.as_str(),
                node.name.as_str(),
                node.schema.as_str(),
                node.file.as_str(),
                batch.as_str(),
                node.domain.as_str(),
                node.body_path.as_deref().unwrap_or(""),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_edges_csv(&self, path: &PathBuf, edges: &[Edge]) -> Result<()> {
        let mut writer = self.csv_writer(path)?;
        writer.write_record(["from", "to", "relation", "to_kind", "file", "batch"])?;
        for edge in edges {
            let (_, to_kind) = split_key(&edge.to);
            let batch = batch_cell(edge.batch);
            writer.write_record([
                edge.from.as_str(),
                edge.to.as_str(),
                edge.relation.as_str(),
                to_kind.as_str(),
                edge.file.as_str(),
                batch.as_str(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Same rows as the two CSVs, as one JSON document.
    fn write_graph_json(&self, path: &PathBuf, graph: &FinalizedGraph) -> Result<()> {
        let nodes: Vec<serde_json::Value> = graph
            .nodes
            .iter()
            .map(|node| {
                json!({
                    "key": node.key,
                    "kind": node.kind.as_str(),
                    "name": node.name,
                    "schema": node.schema,
                    "file": node.file,
                    "batch": node.batch,
                    "domain": node.domain,
                    "bodyPath": node.body_path,
                })
            })
            .collect();
        let edges: Vec<serde_json::Value> = graph
            .edges
            .iter()
            .map(|edge| {
                let (_, to_kind) = split_key(&edge.to);
                json!({
                    "from": edge.from,
                    "to": edge.to,
                    "relation": edge.relation.as_str(),
                    "toKind": to_kind.as_str(),
                    "file": edge.file,
                    "batch": edge.batch,
                })
            })
            .collect();
        let document = json!({ "nodes": nodes, "edges": edges });
        fs::write(path, serde_json::to_string_pretty(&document)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    fn write_manifest(
        &self,
        path: &PathBuf,
        graph: &FinalizedGraph,
        manifest: &ManifestInfo,
    ) -> Result<()> {
        let document = json!({
            "schema": 1,
            "builtAt": manifest.built_at,
            "sqlRoot": manifest.sql_root,
            "codeRoots": manifest.code_roots,
            "counts": {
                "nodes": graph.nodes.len(),
                "edges": graph.edges.len(),
                "docs": manifest.docs,
            },
        });
        fs::write(path, serde_json::to_string_pretty(&document)?)
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

fn batch_cell(batch: Option<i32>) -> String {
    batch.map(|b| b.to_string()).unwrap_or_default()
}
