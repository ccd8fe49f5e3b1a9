//! Query engine - recursive traversals over a code graph

use super::graph::CodeGraph;
use crate::edge::{Edge, EdgeType};
use crate::identity::EntityId;
use crate::node::{Node, NodeKind};
use crate::uri::EntityUri;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::str::FromStr;

/// How far a hit is from the start entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    /// Reached at depth 1
    Direct,
    Transitive,
}

impl ImpactLevel {
    fn at_depth(depth: usize) -> Self {
        if depth == 1 { ImpactLevel::Direct } else { ImpactLevel::Transitive }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImpactLevel::Direct => "direct",
            ImpactLevel::Transitive => "transitive",
        }
    }
}

/// A single traversal result
#[derive(Debug, Clone, Serialize)]
pub struct GraphHit {
    pub entity_id: String,
    pub depth: usize,
    pub impact_level: ImpactLevel,
    /// Edge that first reached this entity
    pub via: Edge,
    pub node: Node,
}

impl GraphHit {
    pub fn is_direct(&self) -> bool {
        self.impact_level == ImpactLevel::Direct
    }

    /// `devac://` address of the hit, when its id names a repo and package
    pub fn uri(&self) -> Option<EntityUri> {
        let id = EntityId::parse(&self.entity_id).ok()?;
        EntityUri::for_node(&id.repo, &id.package, &self.node).ok()
    }

    pub fn summary(&self) -> HitSummary {
        HitSummary {
            entity_id: self.entity_id.clone(),
            uri: self.uri().map(|uri| uri.to_uri_string()),
            name: self.node.name.clone(),
            kind: self.node.kind,
            file_path: self.node.file_path.clone(),
            depth: self.depth,
            impact_level: self.impact_level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HitSummary {
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    pub name: String,
    pub kind: NodeKind,
    pub file_path: String,
    pub depth: usize,
    pub impact_level: ImpactLevel,
}

/// How much of each hit to return.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetailLevel {
    Count,
    #[default]
    Summary,
    Full,
}

impl DetailLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailLevel::Count => "count",
            DetailLevel::Summary => "summary",
            DetailLevel::Full => "full",
        }
    }

    pub fn render(&self, hits: Vec<GraphHit>) -> QueryOutput {
        match self {
            DetailLevel::Count => QueryOutput::Count { count: hits.len() },
            DetailLevel::Summary => QueryOutput::Summary {
                results: hits.iter().map(GraphHit::summary).collect(),
            },
            DetailLevel::Full => QueryOutput::Full { results: hits },
        }
    }
}

impl FromStr for DetailLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "count" => Ok(DetailLevel::Count),
            "summary" => Ok(DetailLevel::Summary),
            "full" => Ok(DetailLevel::Full),
            _ => Err(Error::Validation(format!("Unknown detail level: {}", s))),
        }
    }
}

/// Traversal results shaped by a [`DetailLevel`]
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "detail", rename_all = "snake_case")]
pub enum QueryOutput {
    Count { count: usize },
    Summary { results: Vec<HitSummary> },
    Full { results: Vec<GraphHit> },
}

impl QueryOutput {
    pub fn len(&self) -> usize {
        match self {
            QueryOutput::Count { count } => *count,
            QueryOutput::Summary { results } => results.len(),
            QueryOutput::Full { results } => results.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    Callers,
    Callees,
    Both,
}

impl FromStr for CallDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "callers" => Ok(CallDirection::Callers),
            "callees" => Ok(CallDirection::Callees),
            "both" => Ok(CallDirection::Both),
            _ => Err(Error::Validation(format!("Unknown call direction: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportDirection {
    /// What this file imports
    Outgoing,
    /// Who imports this file
    Incoming,
}

impl FromStr for ImportDirection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "outgoing" | "out" => Ok(ImportDirection::Outgoing),
            "incoming" | "in" => Ok(ImportDirection::Incoming),
            _ => Err(Error::Validation(format!("Unknown import direction: {}", s))),
        }
    }
}

/// One file-level import relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImportHit {
    pub source_file: String,
    pub target_file: Option<String>,
    pub module_specifier: Option<String>,
    pub imported_symbol: Option<String>,
    pub target_entity_id: Option<String>,
    pub is_resolved: bool,
}

/// Caller/callee hit of a call graph query
#[derive(Debug, Clone, Serialize)]
pub struct CallHit {
    pub relation: CallDirection,
    #[serde(flatten)]
    pub hit: GraphHit,
}

/// Direction for graph traversal
#[derive(Debug, Clone, Copy)]
enum TraversalDirection {
    Outgoing,
    Incoming,
}

/// Query engine for traversing a loaded code graph
pub struct QueryEngine<'a> {
    graph: &'a CodeGraph,
}

impl<'a> QueryEngine<'a> {
    pub fn new(graph: &'a CodeGraph) -> Self {
        Self { graph }
    }

    /// Map an entity id or a `devac://` URI onto an entity id
    pub fn resolve_entity(&self, entity: &str) -> Result<String> {
        if EntityUri::is_uri(entity) {
            let uri = EntityUri::parse(entity)?;
            return self.resolve_uri(&uri);
        }
        if self.graph.contains(entity) || EntityId::parse(entity).is_ok() {
            return Ok(entity.to_string());
        }
        Err(Error::NotFound(format!("entity {}", entity)))
    }

    fn resolve_uri(&self, uri: &EntityUri) -> Result<String> {
        let mut candidates: Vec<&Node> = self
            .graph
            .get_nodes_in_file(&uri.file)
            .into_iter()
            .filter(|node| match EntityId::parse(&node.entity_id) {
                Ok(id) => id.repo == uri.repo && id.package == uri.package,
                Err(_) => false,
            })
            .collect();

        match &uri.symbol {
            Some(symbol) => candidates.retain(|n| &n.qualified_name == symbol || &n.name == symbol),
            None => {
                if candidates.iter().any(|n| n.kind == NodeKind::Module) {
                    candidates.retain(|n| n.kind == NodeKind::Module);
                }
            }
        }
        if let Some(line) = uri.line {
            if candidates.len() > 1 {
                candidates.retain(|n| n.start_line <= line && line <= n.end_line);
            }
        }
        candidates.sort_by_key(|n| (n.start_line, n.start_column));

        candidates
            .first()
            .map(|n| n.entity_id.clone())
            .ok_or_else(|| Error::NotFound(format!("no entity at {}", uri.to_uri_string())))
    }

    /// What `entity` depends on
    pub fn deps(
        &self,
        entity: &str,
        edge_type: Option<EdgeType>,
        depth: usize,
        limit: usize,
    ) -> Result<Vec<GraphHit>> {
        let start = self.resolve_entity(entity)?;
        Ok(self.traverse(&start, edge_type, depth, limit, TraversalDirection::Outgoing))
    }

    /// What depends on `entity`
    pub fn dependents(
        &self,
        entity: &str,
        edge_type: Option<EdgeType>,
        depth: usize,
        limit: usize,
    ) -> Result<Vec<GraphHit>> {
        let start = self.resolve_entity(entity)?;
        Ok(self.traverse(&start, edge_type, depth, limit, TraversalDirection::Incoming))
    }

    /// Call graph around `entity`; `Both` lists callers first
    pub fn calls(
        &self,
        entity: &str,
        direction: CallDirection,
        depth: usize,
        limit: usize,
    ) -> Result<Vec<CallHit>> {
        let start = self.resolve_entity(entity)?;
        let mut hits = Vec::new();

        if matches!(direction, CallDirection::Callers | CallDirection::Both) {
            let callers = self.traverse(&start, Some(EdgeType::Calls), depth, limit, TraversalDirection::Incoming);
            hits.extend(callers.into_iter().map(|hit| CallHit { relation: CallDirection::Callers, hit }));
        }
        if matches!(direction, CallDirection::Callees | CallDirection::Both) {
            let remaining = limit.saturating_sub(hits.len());
            let callees =
                self.traverse(&start, Some(EdgeType::Calls), depth, remaining, TraversalDirection::Outgoing);
            hits.extend(callees.into_iter().map(|hit| CallHit { relation: CallDirection::Callees, hit }));
        }
        Ok(hits)
    }

    /// File-level imports from external refs and IMPORTS edges
    pub fn imports(&self, file: &str, direction: ImportDirection) -> Result<Vec<ImportHit>> {
        let file = crate::identity::normalize_path(file);
        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        let mut push = |hit: ImportHit| {
            if seen.insert(hit.clone()) {
                hits.push(hit);
            }
        };

        for r in self.graph.external_refs() {
            let target_file = r
                .target_entity_id
                .as_deref()
                .and_then(|id| self.graph.get_node(id))
                .map(|n| n.file_path.clone());
            let matches = match direction {
                ImportDirection::Outgoing => r.source_file_path == file,
                ImportDirection::Incoming => target_file.as_deref() == Some(file.as_str()),
            };
            if matches {
                push(ImportHit {
                    source_file: r.source_file_path.clone(),
                    target_file,
                    module_specifier: Some(r.module_specifier.clone()),
                    imported_symbol: Some(r.imported_symbol.clone()),
                    target_entity_id: r.target_entity_id.clone(),
                    is_resolved: r.is_resolved,
                });
            }
        }

        for edge in self.graph.all_edges().filter(|e| e.edge_type == EdgeType::Imports) {
            let target_file = self.graph.get_node(&edge.target_entity_id).map(|n| n.file_path.clone());
            let matches = match direction {
                ImportDirection::Outgoing => edge.source_file_path == file,
                ImportDirection::Incoming => target_file.as_deref() == Some(file.as_str()),
            };
            if matches {
                push(ImportHit {
                    source_file: edge.source_file_path.clone(),
                    target_file,
                    module_specifier: None,
                    imported_symbol: None,
                    target_entity_id: Some(edge.target_entity_id.clone()),
                    is_resolved: !edge.is_unresolved(),
                });
            }
        }

        hits.sort_by(|a, b| {
            (&a.source_file, &a.target_file, &a.module_specifier, &a.imported_symbol)
                .cmp(&(&b.source_file, &b.target_file, &b.module_specifier, &b.imported_symbol))
        });
        Ok(hits)
    }

    /// Breadth-first walk from `start`.
    ///
    /// Every entity is reported once, at the shallowest depth it is reached.
    /// Unresolved targets and entities with no live node in the loaded
    /// packages are dead ends and never reported.
    fn traverse(
        &self,
        start: &str,
        edge_type: Option<EdgeType>,
        depth: usize,
        limit: usize,
        direction: TraversalDirection,
    ) -> Vec<GraphHit> {
        let mut results = Vec::new();
        if depth == 0 || limit == 0 {
            return results;
        }

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        visited.insert(start.to_string());
        queue.push_back((start.to_string(), 0));

        while let Some((current, current_depth)) = queue.pop_front() {
            if current_depth >= depth {
                continue;
            }

            let edges = match direction {
                TraversalDirection::Outgoing => self.graph.get_edges_from(&current),
                TraversalDirection::Incoming => self.graph.get_edges_to(&current),
            };

            for edge in edges {
                if edge_type.is_some_and(|t| t != edge.edge_type) || edge.is_unresolved() {
                    continue;
                }
                let next = match direction {
                    TraversalDirection::Outgoing => &edge.target_entity_id,
                    TraversalDirection::Incoming => &edge.source_entity_id,
                };
                if !visited.insert(next.clone()) {
                    continue;
                }
                let Some(node) = self.graph.get_node(next) else {
                    continue;
                };

                let next_depth = current_depth + 1;
                results.push(GraphHit {
                    entity_id: next.clone(),
                    depth: next_depth,
                    impact_level: ImpactLevel::at_depth(next_depth),
                    via: edge.clone(),
                    node: node.clone(),
                });
                if results.len() >= limit {
                    return results;
                }
                queue.push_back((next.clone(), next_depth));
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_entity_id;
    use crate::reference::ExternalRef;

    fn func(graph: &mut CodeGraph, file: &str, name: &str) -> String {
        let id = generate_entity_id("acme", "packages/core", NodeKind::Function, file, name).to_string();
        graph.add_node(Node::new(&id, name, NodeKind::Function, file, 1, 10));
        id
    }

    fn call(graph: &mut CodeGraph, from: &str, to: &str) {
        graph.add_edge(Edge::new(from, to, EdgeType::Calls, "src/x.ts"));
    }

    #[test]
    fn test_cycle_reports_each_entity_once() {
        let mut graph = CodeGraph::new();
        let a = func(&mut graph, "src/a.ts", "a");
        let b = func(&mut graph, "src/b.ts", "b");
        call(&mut graph, &a, &b);
        call(&mut graph, &b, &a);

        let engine = QueryEngine::new(&graph);
        let hits = engine.dependents(&a, None, 10, 100).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, b);
        assert_eq!(hits[0].depth, 1);
        assert!(hits[0].is_direct());
    }

    #[test]
    fn test_depth_bound_and_impact_level() {
        let mut graph = CodeGraph::new();
        let ids: Vec<String> = (0..5).map(|i| func(&mut graph, "src/chain.ts", &format!("f{}", i))).collect();
        for pair in ids.windows(2) {
            call(&mut graph, &pair[0], &pair[1]);
        }
        let engine = QueryEngine::new(&graph);

        let hits = engine.deps(&ids[0], None, 2, 100).unwrap();
        assert_eq!(hits.iter().map(|h| h.depth).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(hits[1].impact_level, ImpactLevel::Transitive);

        let hits = engine.deps(&ids[0], None, 10, 100).unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().all(|h| h.entity_id != ids[0]));

        assert!(engine.deps(&ids[0], None, 0, 100).unwrap().is_empty());
        assert_eq!(engine.deps(&ids[0], None, 10, 3).unwrap().len(), 3);
    }

    #[test]
    fn test_shortcut_path_counts_as_direct() {
        let mut graph = CodeGraph::new();
        let a = func(&mut graph, "src/a.ts", "a");
        let b = func(&mut graph, "src/b.ts", "b");
        let c = func(&mut graph, "src/c.ts", "c");
        call(&mut graph, &a, &b);
        call(&mut graph, &b, &c);
        call(&mut graph, &a, &c);

        let hits = QueryEngine::new(&graph).deps(&a, None, 5, 100).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.depth == 1 && h.is_direct()));
    }

    #[test]
    fn test_edge_type_filter_and_unresolved_targets() {
        let mut graph = CodeGraph::new();
        let a = func(&mut graph, "src/a.ts", "a");
        let b = func(&mut graph, "src/b.ts", "b");
        graph.add_edge(Edge::new(&a, &b, EdgeType::References, "src/a.ts"));
        graph.add_edge(Edge::new(&a, "unresolved:helper", EdgeType::Calls, "src/a.ts"));

        let engine = QueryEngine::new(&graph);
        assert!(engine.deps(&a, Some(EdgeType::Calls), 3, 100).unwrap().is_empty());
        let hits = engine.deps(&a, None, 3, 100).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].node.name, "b");
    }

    #[test]
    fn test_entities_outside_loaded_packages_are_dead_ends() {
        let mut graph = CodeGraph::new();
        let a = func(&mut graph, "src/a.ts", "a");
        let b = func(&mut graph, "src/b.ts", "b");
        let elsewhere = generate_entity_id("other", ".", NodeKind::Function, "lib.ts", "far").to_string();
        call(&mut graph, &a, &elsewhere);
        call(&mut graph, &a, &b);
        call(&mut graph, &elsewhere, &b);

        let engine = QueryEngine::new(&graph);
        let hits = engine.deps(&a, None, 3, 100).unwrap();
        assert_eq!(hits.iter().map(|h| h.entity_id.as_str()).collect::<Vec<_>>(), vec![b.as_str()]);
        let hits = engine.dependents(&b, None, 3, 100).unwrap();
        assert_eq!(hits.iter().map(|h| h.entity_id.as_str()).collect::<Vec<_>>(), vec![a.as_str()]);
    }

    #[test]
    fn test_calls_both_directions() {
        let mut graph = CodeGraph::new();
        let caller = func(&mut graph, "src/a.ts", "caller");
        let mid = func(&mut graph, "src/b.ts", "mid");
        let callee = func(&mut graph, "src/c.ts", "callee");
        call(&mut graph, &caller, &mid);
        call(&mut graph, &mid, &callee);

        let hits = QueryEngine::new(&graph).calls(&mid, CallDirection::Both, 1, 100).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].relation, CallDirection::Callers);
        assert_eq!(hits[0].hit.entity_id, caller);
        assert_eq!(hits[1].relation, CallDirection::Callees);
        assert_eq!(hits[1].hit.entity_id, callee);
    }

    #[test]
    fn test_detail_levels() {
        let mut graph = CodeGraph::new();
        let a = func(&mut graph, "src/a.ts", "a");
        let b = func(&mut graph, "src/b.ts", "b");
        call(&mut graph, &a, &b);
        let hits = QueryEngine::new(&graph).deps(&a, None, 1, 10).unwrap();

        let count = serde_json::to_value(DetailLevel::Count.render(hits.clone())).unwrap();
        assert_eq!(count["count"], 1);

        let summary = DetailLevel::Summary.render(hits.clone());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["results"][0]["name"], "b");
        assert_eq!(json["results"][0]["impact_level"], "direct");
        let uri = EntityUri::parse(json["results"][0]["uri"].as_str().unwrap()).unwrap();
        assert_eq!(uri.package, "packages/core");
        assert_eq!(uri.symbol.as_deref(), Some("b"));
        assert!(json["results"][0].get("via").is_none());

        let full = serde_json::to_value(DetailLevel::Full.render(hits)).unwrap();
        assert_eq!(full["results"][0]["via"]["edge_type"], "CALLS");
        assert_eq!("FULL".parse::<DetailLevel>().unwrap(), DetailLevel::Full);
    }

    #[test]
    fn test_resolve_entity_by_uri() {
        let mut graph = CodeGraph::new();
        let login = generate_entity_id("acme", "packages/core", NodeKind::Method, "src/auth.ts", "Auth.login");
        graph.add_node(
            Node::new(login.to_string(), "login", NodeKind::Method, "src/auth.ts", 4, 9)
                .with_qualified_name("Auth.login"),
        );
        let engine = QueryEngine::new(&graph);

        let uri = EntityUri::new("acme", "packages/core", "src/auth.ts").unwrap().with_symbol("Auth.login");
        assert_eq!(engine.resolve_entity(&uri.to_uri_string()).unwrap(), login.to_string());
        assert_eq!(engine.resolve_entity(&login.to_string()).unwrap(), login.to_string());

        let missing = uri.clone().with_symbol("Auth.logout");
        assert!(matches!(engine.resolve_entity(&missing.to_uri_string()), Err(Error::NotFound(_))));
        assert!(matches!(engine.resolve_entity("nonsense"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_imports_both_directions() {
        let mut graph = CodeGraph::new();
        let app = func(&mut graph, "src/app.ts", "main");
        let helper = func(&mut graph, "src/util.ts", "helper");
        graph.add_external_ref(ExternalRef::new(&app, "./util", "helper", "src/app.ts").resolved_to(&helper));
        graph.add_external_ref(ExternalRef::new(&app, "lodash", "map", "src/app.ts"));

        let engine = QueryEngine::new(&graph);
        let out = engine.imports("./src/app.ts", ImportDirection::Outgoing).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out.iter().filter(|h| h.is_resolved).count(), 1);

        let incoming = engine.imports("src/util.ts", ImportDirection::Incoming).unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source_file, "src/app.ts");
    }
}
