//! Seed Store - per-package graph tables
//!
//! A seed holds four tables per branch:
//! - nodes(entity_id, name, kind, file_path, ...)
//! - edges(source_entity_id, target_entity_id, edge_type, ...)
//! - external_refs(source_entity_id, module_specifier, imported_symbol, ...)
//! - effects(effect_id, effect_type, source_entity_id, ...)
//!
//! Writers merge by source file and replace whole table files atomically
//! under the branch lock. Readers take no lock.

pub mod atomic;
pub mod meta;
pub mod paths;
pub mod reader;
pub mod schema;
pub mod table;
pub mod writer;

pub use meta::{RowCounts, SeedMeta};
pub use paths::SeedPaths;
pub use reader::SeedReader;
pub use schema::{SCHEMA_VERSION, SeedTable};
pub use writer::SeedWriter;

use crate::edge::Edge;
use crate::effect::Effect;
use crate::node::Node;
use crate::reference::ExternalRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Parser output for a set of files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseResult {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub external_refs: Vec<ExternalRef>,
    pub effects: Vec<Effect>,
}

impl ParseResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = Node>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    pub fn with_edges(mut self, edges: impl IntoIterator<Item = Edge>) -> Self {
        self.edges.extend(edges);
        self
    }

    pub fn with_external_refs(mut self, refs: impl IntoIterator<Item = ExternalRef>) -> Self {
        self.external_refs.extend(refs);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.edges.is_empty()
            && self.external_refs.is_empty()
            && self.effects.is_empty()
    }

    /// Every file any row claims to originate from
    pub fn source_files(&self) -> BTreeSet<&str> {
        self.nodes
            .iter()
            .map(|n| n.file_path.as_str())
            .chain(self.edges.iter().map(|e| e.source_file_path.as_str()))
            .chain(self.external_refs.iter().map(|r| r.source_file_path.as_str()))
            .chain(self.effects.iter().map(|e| e.source_file_path.as_str()))
            .collect()
    }
}

/// Row changes in one table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub inserted: usize,
    pub removed: usize,
    pub soft_deleted: usize,
    /// Rows in the table after the write
    pub total: usize,
}

impl TableCounts {
    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.removed > 0 || self.soft_deleted > 0
    }
}

/// Outcome of a seed write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub branch: String,
    pub files: Vec<String>,
    pub nodes: TableCounts,
    pub edges: TableCounts,
    pub external_refs: TableCounts,
    pub effects: TableCounts,
}

impl WriteResult {
    pub fn rows_written(&self) -> usize {
        self.nodes.inserted + self.edges.inserted + self.external_refs.inserted + self.effects.inserted
    }

    pub fn row_counts(&self) -> RowCounts {
        RowCounts {
            nodes: self.nodes.total,
            edges: self.edges.total,
            external_refs: self.external_refs.total,
            effects: self.effects.total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeType;
    use crate::node::NodeKind;

    #[test]
    fn test_source_files() {
        let parse = ParseResult::new()
            .with_nodes([Node::new("a", "a", NodeKind::Function, "src/a.ts", 1, 2)])
            .with_edges([Edge::new("a", "b", EdgeType::Calls, "src/b.ts")]);
        let files: Vec<&str> = parse.source_files().into_iter().collect();
        assert_eq!(files, vec!["src/a.ts", "src/b.ts"]);
        assert!(!parse.is_empty());
        assert!(ParseResult::new().is_empty());
    }
}
