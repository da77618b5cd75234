//! Shared graph store: a concurrent node map plus an append-only edge
//! buffer, with the post-processing passes that make the output coherent.
//!
//! Stages run in parallel within themselves and insert concurrently;
//! `try_add_node` is insert-or-skip so the first writer wins and repeated
//! inserts are idempotent. References are allowed to point at objects that
//! are not defined (yet, or at all): `finalize` reconciles placeholder kinds
//! against definitions, deduplicates edge triples and backfills `(external)`
//! nodes so every edge endpoint resolves in the serialized output.

pub mod keys;
pub mod resolver;

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::models::{Edge, Node, NodeKind};
use keys::{node_key, split_base, split_key, CSHARP_PREFIX};
use resolver::plural_variants;

/// Domain label given to nodes fabricated during backfill.
pub const EXTERNAL_DOMAIN: &str = "(external)";

/// Concurrent node/edge accumulator shared by all stages of a run.
#[derive(Debug, Default)]
pub struct GraphModel {
    /// Keyed by the lowercased node key; values keep original spelling.
    nodes: DashMap<String, Node>,
    edges: Mutex<Vec<Edge>>,
}

/// Immutable result of `finalize`, ready for serialization.
#[derive(Debug, Clone)]
pub struct FinalizedGraph {
    /// Sorted by key.
    pub nodes: Vec<Node>,
    /// Sorted by `(from, to, relation)`.
    pub edges: Vec<Edge>,
}

impl GraphModel {
    pub fn new() -> Self {
        GraphModel::default()
    }

    /// Insert-or-skip. Returns whether this call inserted the node; an
    /// existing node (compared case-insensitively by key) is never
    /// overwritten.
    pub fn try_add_node(&self, node: Node) -> bool {
        match self.nodes.entry(node.key.to_lowercase()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(node);
                true
            }
        }
    }

    /// Append an edge. Uniqueness is not checked here; triples collapse in
    /// the dedup pass of `finalize`.
    pub fn add_edge(&self, edge: Edge) {
        self.edges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(edge);
    }

    pub fn get_node(&self, key: &str) -> Option<Node> {
        self.nodes.get(&key.to_lowercase()).map(|n| n.clone())
    }

    pub fn contains_node(&self, key: &str) -> bool {
        self.nodes.contains_key(&key.to_lowercase())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Drop a node's body pointer after a failed body write, so the
    /// body-file invariant holds in the serialized output.
    pub fn clear_body_path(&self, key: &str) {
        if let Some(mut node) = self.nodes.get_mut(&key.to_lowercase()) {
            node.body_path = None;
        }
    }

    /// Find an already-defined TABLE node whose simple name matches `name`
    /// under the ±"s" probe. Returns the node's base identity.
    pub fn find_table_base(&self, name: &str) -> Option<String> {
        for variant in plural_variants(name) {
            for entry in self.nodes.iter() {
                let node = entry.value();
                if node.kind == NodeKind::Table && node.name.eq_ignore_ascii_case(&variant) {
                    let (base, _) = split_key(&node.key);
                    return Some(base.to_string());
                }
            }
        }
        None
    }

    /// Run the three post-processing passes and hand back the final graph:
    ///
    /// 1. kind resolution: edge targets with a placeholder kind are
    ///    rewritten to the defined node's key when a definition with the
    ///    same base exists (any kind; ties break on kind priority). All
    ///    endpoints that resolve case-insensitively are canonicalized to
    ///    the defined spelling so CSV joins are exact.
    /// 2. dedup: `(from, to, relation)` triples collapse, first wins.
    /// 3. backfill: endpoints that still match no node get a minimal
    ///    `(external)` node with the kind parsed from the key.
    pub fn finalize(&self) -> FinalizedGraph {
        // Canonical spelling per lowercased key, and the best-priority
        // defined (non-placeholder) kind per lowercased base.
        let mut canonical: HashMap<String, String> = HashMap::new();
        let mut defined: HashMap<String, (NodeKind, String)> = HashMap::new();
        for entry in self.nodes.iter() {
            let node = entry.value();
            canonical.insert(node.key.to_lowercase(), node.key.clone());
            if !node.kind.is_placeholder() {
                let (base, _) = split_key(&node.key);
                defined
                    .entry(base.to_lowercase())
                    .and_modify(|slot| {
                        if node.kind.resolution_priority() < slot.0.resolution_priority() {
                            *slot = (node.kind, base.to_string());
                        }
                    })
                    .or_insert((node.kind, base.to_string()));
            }
        }

        let resolve_endpoint = |key: &str, allow_retarget: bool| -> String {
            if let Some(spelling) = canonical.get(&key.to_lowercase()) {
                return spelling.clone();
            }
            if allow_retarget {
                let (base, kind) = split_key(key);
                if kind.is_placeholder() {
                    if let Some((defined_kind, defined_base)) = defined.get(&base.to_lowercase()) {
                        let rewritten = node_key(defined_base, *defined_kind);
                        return canonical
                            .get(&rewritten.to_lowercase())
                            .cloned()
                            .unwrap_or(rewritten);
                    }
                }
            }
            key.to_string()
        };

        let snapshot: Vec<Edge> = self
            .edges
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        // Pass 1: kind resolution + canonical spelling.
        let mut resolved: Vec<Edge> = Vec::with_capacity(snapshot.len());
        for mut edge in snapshot {
            edge.from = resolve_endpoint(&edge.from, false);
            edge.to = resolve_endpoint(&edge.to, true);
            resolved.push(edge);
        }

        // Pass 2: dedup on (from, to, relation).
        let mut seen: HashSet<(String, String, &'static str)> = HashSet::new();
        let mut edges: Vec<Edge> = Vec::with_capacity(resolved.len());
        for edge in resolved {
            let triple = (
                edge.from.to_lowercase(),
                edge.to.to_lowercase(),
                edge.relation.as_str(),
            );
            if seen.insert(triple) {
                edges.push(edge);
            }
        }

        // Pass 3: backfill missing endpoints as external nodes.
        let mut nodes: Vec<Node> = self.nodes.iter().map(|e| e.value().clone()).collect();
        let mut known: HashSet<String> = nodes.iter().map(|n| n.key.to_lowercase()).collect();
        for edge in &edges {
            for endpoint in [&edge.from, &edge.to] {
                if known.insert(endpoint.to_lowercase()) {
                    nodes.push(external_node(endpoint));
                }
            }
        }

        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        edges.sort_by(|a, b| {
            (a.from.as_str(), a.to.as_str(), a.relation.as_str())
                .cmp(&(b.from.as_str(), b.to.as_str(), b.relation.as_str()))
        });

        FinalizedGraph { nodes, edges }
    }
}

/// Minimal node for an edge endpoint nothing defined.
fn external_node(key: &str) -> Node {
    let (base, kind) = split_key(key);
    let (schema, name) = if let Some(rest) = base.strip_prefix(CSHARP_PREFIX) {
        let (_, simple) = split_base(rest);
        ("csharp".to_string(), simple.to_string())
    } else {
        let (qualifier, simple) = split_base(base);
        (qualifier.to_string(), simple.to_string())
    };
    Node {
        key: key.to_string(),
        kind,
        name,
        schema,
        file: String::new(),
        batch: None,
        domain: EXTERNAL_DOMAIN.to_string(),
        body_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Relation;

    fn table(base: &str, name: &str) -> Node {
        Node {
            key: node_key(base, NodeKind::Table),
            kind: NodeKind::Table,
            name: name.to_string(),
            schema: "dbo".to_string(),
            file: "db/tables.sql".to_string(),
            batch: Some(0),
            domain: "db".to_string(),
            body_path: None,
        }
    }

    #[test]
    fn try_add_node_is_insert_or_skip() {
        let graph = GraphModel::new();
        assert!(graph.try_add_node(table("dbo.Customer", "Customer")));
        assert!(!graph.try_add_node(table("DBO.CUSTOMER", "CUSTOMER")));
        assert_eq!(graph.node_count(), 1);
        // First writer's spelling survives.
        assert_eq!(
            graph.get_node("dbo.customer|table").unwrap().name,
            "Customer"
        );
    }

    #[test]
    fn placeholder_targets_resolve_to_defined_kind() {
        let graph = GraphModel::new();
        graph.try_add_node(table("dbo.Customer", "Customer"));
        graph.add_edge(Edge::new(
            "csharp:Repo.Load|METHOD",
            "dbo.customer|TABLE_OR_VIEW",
            Relation::ReadsFrom,
        ));
        let finalized = graph.finalize();
        assert_eq!(finalized.edges[0].to, "dbo.Customer|TABLE");
    }

    #[test]
    fn duplicate_triples_collapse() {
        let graph = GraphModel::new();
        graph.try_add_node(table("dbo.Customer", "Customer"));
        for _ in 0..3 {
            graph.add_edge(Edge::new(
                "dbo.GetCustomers|PROC",
                "dbo.Customer|TABLE",
                Relation::ReadsFrom,
            ));
        }
        graph.add_edge(Edge::new(
            "dbo.GetCustomers|PROC",
            "dbo.Customer|TABLE",
            Relation::WritesTo,
        ));
        let finalized = graph.finalize();
        assert_eq!(finalized.edges.len(), 2);
    }

    #[test]
    fn unresolved_endpoints_are_backfilled_as_external() {
        let graph = GraphModel::new();
        graph.add_edge(Edge::new(
            "csharp:Mig.AddCustomer|MIGRATION",
            "dbo.Customer|TABLE",
            Relation::SchemaChange,
        ));
        let finalized = graph.finalize();
        let keys: Vec<&str> = finalized.nodes.iter().map(|n| n.key.as_str()).collect();
        assert!(keys.contains(&"csharp:Mig.AddCustomer|MIGRATION"));
        assert!(keys.contains(&"dbo.Customer|TABLE"));
        let customer = finalized
            .nodes
            .iter()
            .find(|n| n.key == "dbo.Customer|TABLE")
            .unwrap();
        assert_eq!(customer.domain, EXTERNAL_DOMAIN);
        assert_eq!(customer.schema, "dbo");
        assert_eq!(customer.name, "Customer");
    }

    #[test]
    fn every_edge_endpoint_resolves_after_finalize() {
        let graph = GraphModel::new();
        graph.try_add_node(table("dbo.Parent", "Parent"));
        graph.add_edge(Edge::new(
            "dbo.Child|TABLE",
            "dbo.Parent|TABLE",
            Relation::ForeignKey,
        ));
        graph.add_edge(Edge::new(
            "dbo.Loader|PROC",
            "dbo.Missing|TABLE_OR_VIEW",
            Relation::ReadsFrom,
        ));
        let finalized = graph.finalize();
        let keys: HashSet<&str> = finalized.nodes.iter().map(|n| n.key.as_str()).collect();
        for edge in &finalized.edges {
            assert!(keys.contains(edge.from.as_str()), "missing {}", edge.from);
            assert!(keys.contains(edge.to.as_str()), "missing {}", edge.to);
        }
    }

    #[test]
    fn find_table_base_applies_plural_probe() {
        let graph = GraphModel::new();
        graph.try_add_node(table("dbo.Customers", "Customers"));
        assert_eq!(
            graph.find_table_base("Customer").as_deref(),
            Some("dbo.Customers")
        );
        assert_eq!(graph.find_table_base("Invoice"), None);
    }
}
