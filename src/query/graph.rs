//! Code graph - in-memory index over one or more seeds
//!
//! Loaded from seed readers and used read-only by the query engine. A
//! non-base branch is layered over `base`: any file the branch partition
//! mentions replaces the base rows of that file.

use crate::edge::Edge;
use crate::node::Node;
use crate::reference::ExternalRef;
use crate::storage::SeedReader;
use crate::{DEFAULT_BRANCH, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Which seeds a query sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryScope {
    /// Package roots
    pub packages: Vec<PathBuf>,
    pub branch: String,
}

impl QueryScope {
    pub fn new(packages: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            packages: packages.into_iter().map(Into::into).collect(),
            branch: DEFAULT_BRANCH.to_string(),
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

/// In-memory graph over the live rows of a scope.
#[derive(Debug, Default)]
pub struct CodeGraph {
    /// All nodes indexed by entity id
    nodes: HashMap<String, Node>,
    /// Edges from a node (outgoing edges)
    edges_from: HashMap<String, Vec<Edge>>,
    /// Edges to a node (incoming edges)
    edges_to: HashMap<String, Vec<Edge>>,
    /// Node ids indexed by file path
    nodes_by_file: HashMap<String, Vec<String>>,
    external_refs: Vec<ExternalRef>,
}

/// Rows of one package after branch overlay
#[derive(Debug, Default)]
struct PackageRows {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    external_refs: Vec<ExternalRef>,
}

impl CodeGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every package of `scope`
    pub fn load(scope: &QueryScope) -> Result<Self> {
        let mut graph = Self::new();
        for package in &scope.packages {
            let rows = load_package(&SeedReader::open(package, DEFAULT_BRANCH), &scope.branch)?;
            for node in rows.nodes {
                graph.add_node(node);
            }
            for edge in rows.edges {
                graph.add_edge(edge);
            }
            graph.external_refs.extend(rows.external_refs);
        }

        tracing::debug!(
            packages = scope.packages.len(),
            branch = %scope.branch,
            nodes = graph.nodes.len(),
            "Loaded code graph"
        );
        Ok(graph)
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, node: Node) {
        self.nodes_by_file
            .entry(node.file_path.clone())
            .or_default()
            .push(node.entity_id.clone());
        self.nodes.insert(node.entity_id.clone(), node);
    }

    /// Add an edge to the graph
    pub fn add_edge(&mut self, edge: Edge) {
        self.edges_from
            .entry(edge.source_entity_id.clone())
            .or_default()
            .push(edge.clone());
        self.edges_to
            .entry(edge.target_entity_id.clone())
            .or_default()
            .push(edge);
    }

    pub fn add_external_ref(&mut self, external_ref: ExternalRef) {
        self.external_refs.push(external_ref);
    }

    pub fn get_node(&self, entity_id: &str) -> Option<&Node> {
        self.nodes.get(entity_id)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.nodes.contains_key(entity_id)
    }

    /// Get all nodes in a file
    pub fn get_nodes_in_file(&self, path: &str) -> Vec<&Node> {
        self.nodes_by_file
            .get(path)
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    /// Get outgoing edges from a node
    pub fn get_edges_from(&self, entity_id: &str) -> &[Edge] {
        self.edges_from.get(entity_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Get incoming edges to a node
    pub fn get_edges_to(&self, entity_id: &str) -> &[Edge] {
        self.edges_to.get(entity_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn external_refs(&self) -> &[ExternalRef] {
        &self.external_refs
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn all_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges_from.values().flat_map(|v| v.iter())
    }

    pub fn stats(&self) -> GraphStats {
        let total_edges: usize = self.edges_from.values().map(|v| v.len()).sum();
        let unresolved_edges = self.all_edges().filter(|e| e.is_unresolved()).count();
        GraphStats {
            nodes: self.nodes.len(),
            edges: total_edges,
            unresolved_edges,
            external_refs: self.external_refs.len(),
            unresolved_refs: self.external_refs.iter().filter(|r| !r.is_resolved).count(),
            files: self.nodes_by_file.len(),
        }
    }
}

/// Live rows of `base`'s package for `branch`, overlaid on base.
fn load_package(base: &SeedReader, branch: &str) -> Result<PackageRows> {
    let mut rows = PackageRows {
        nodes: base.nodes()?,
        edges: base.edges()?,
        external_refs: base.external_refs()?,
    };
    if branch == DEFAULT_BRANCH {
        return Ok(rows);
    }

    let overlay = base.for_branch(branch);
    if !overlay.exists() {
        return Ok(rows);
    }
    let nodes = overlay.nodes_including_deleted()?;
    let edges = overlay.edges_including_deleted()?;
    let external_refs = overlay.external_refs_including_deleted()?;

    let touched: HashSet<String> = nodes
        .iter()
        .map(|n| n.file_path.clone())
        .chain(edges.iter().map(|e| e.source_file_path.clone()))
        .chain(external_refs.iter().map(|r| r.source_file_path.clone()))
        .collect();
    let branch_ids: HashSet<&str> = nodes.iter().map(|n| n.entity_id.as_str()).collect();

    rows.nodes.retain(|n| !touched.contains(&n.file_path) && !branch_ids.contains(n.entity_id.as_str()));
    rows.edges.retain(|e| !touched.contains(&e.source_file_path));
    rows.external_refs.retain(|r| !touched.contains(&r.source_file_path));

    rows.nodes.extend(nodes.into_iter().filter(|n| !n.is_deleted));
    rows.edges.extend(edges.into_iter().filter(|e| !e.is_deleted));
    rows.external_refs.extend(external_refs.into_iter().filter(|r| !r.is_deleted));
    Ok(rows)
}

/// Statistics about a code graph
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub unresolved_edges: usize,
    pub external_refs: usize,
    pub unresolved_refs: usize,
    pub files: usize,
}

impl std::fmt::Display for GraphStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Code Graph Statistics:")?;
        writeln!(f, "  Files: {}", self.files)?;
        writeln!(f, "  Nodes: {}", self.nodes)?;
        writeln!(f, "  Edges: {} (unresolved: {})", self.edges, self.unresolved_edges)?;
        writeln!(f, "  External refs: {} (unresolved: {})", self.external_refs, self.unresolved_refs)
    }
}
