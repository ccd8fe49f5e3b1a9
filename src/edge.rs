//! Edge types - directed relationships between entities
//!
//! Edges are owned by the file they were found in (`source_file_path`). The
//! target may live in another package or not be resolved yet, in which case
//! it is an `unresolved:<name>` placeholder.

use crate::properties::PropertyBag;
use crate::{DEFAULT_BRANCH, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Prefix of placeholder targets the resolution pass has not filled in yet.
pub const UNRESOLVED_PREFIX: &str = "unresolved:";

/// Relationship kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    /// Container holds a symbol (class -> method, module -> function)
    Contains,
    /// Callable calls another callable
    Calls,
    /// Module imports a symbol
    Imports,
    /// Class extends a class
    Extends,
    /// Class implements an interface
    Implements,
    /// Module exports a symbol
    Exports,
    /// Any other usage
    References,
    Returns,
    ParameterOf,
    Decorates,
    Instantiates,
}

impl EdgeType {
    /// Get the string representation of the edge type
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Contains => "CONTAINS",
            EdgeType::Calls => "CALLS",
            EdgeType::Imports => "IMPORTS",
            EdgeType::Extends => "EXTENDS",
            EdgeType::Implements => "IMPLEMENTS",
            EdgeType::Exports => "EXPORTS",
            EdgeType::References => "REFERENCES",
            EdgeType::Returns => "RETURNS",
            EdgeType::ParameterOf => "PARAMETER_OF",
            EdgeType::Decorates => "DECORATES",
            EdgeType::Instantiates => "INSTANTIATES",
        }
    }

    /// Get all edge types
    pub fn all() -> &'static [EdgeType] {
        &[
            EdgeType::Contains,
            EdgeType::Calls,
            EdgeType::Imports,
            EdgeType::Extends,
            EdgeType::Implements,
            EdgeType::Exports,
            EdgeType::References,
            EdgeType::Returns,
            EdgeType::ParameterOf,
            EdgeType::Decorates,
            EdgeType::Instantiates,
        ]
    }
}

impl FromStr for EdgeType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "CONTAINS" | "CONTAIN" => Ok(EdgeType::Contains),
            "CALLS" | "CALL" => Ok(EdgeType::Calls),
            "IMPORTS" | "IMPORT" => Ok(EdgeType::Imports),
            "EXTENDS" | "EXTEND" | "INHERITS" => Ok(EdgeType::Extends),
            "IMPLEMENTS" | "IMPLEMENT" => Ok(EdgeType::Implements),
            "EXPORTS" | "EXPORT" => Ok(EdgeType::Exports),
            "REFERENCES" | "REFERENCE" | "REF" => Ok(EdgeType::References),
            "RETURNS" => Ok(EdgeType::Returns),
            "PARAMETER_OF" => Ok(EdgeType::ParameterOf),
            "DECORATES" => Ok(EdgeType::Decorates),
            "INSTANTIATES" => Ok(EdgeType::Instantiates),
            _ => Err(Error::Validation(format!("Unknown edge type: {}", s))),
        }
    }
}

impl std::fmt::Display for EdgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed relationship between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source_entity_id: String,
    pub target_entity_id: String,
    pub edge_type: EdgeType,
    /// File the relationship was observed in
    pub source_file_path: String,
    pub source_line: u32,
    pub source_column: u32,
    pub properties: PropertyBag,
    pub source_file_hash: String,
    pub branch: String,
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    /// Create a new edge
    pub fn new(
        source_entity_id: impl Into<String>,
        target_entity_id: impl Into<String>,
        edge_type: EdgeType,
        source_file_path: impl Into<String>,
    ) -> Self {
        Self {
            source_entity_id: source_entity_id.into(),
            target_entity_id: target_entity_id.into(),
            edge_type,
            source_file_path: source_file_path.into(),
            source_line: 0,
            source_column: 0,
            properties: PropertyBag::new(),
            source_file_hash: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            is_deleted: false,
            updated_at: Utc::now(),
        }
    }

    /// Set the origin position
    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.source_line = line;
        self.source_column = column;
        self
    }

    pub fn with_properties(mut self, properties: PropertyBag) -> Self {
        self.properties = properties;
        self
    }

    /// Whether the target still needs resolution
    pub fn is_unresolved(&self) -> bool {
        self.target_entity_id.starts_with(UNRESOLVED_PREFIX)
    }

    /// Create a reversed edge (swap source/target)
    pub fn reversed(&self) -> Self {
        Self {
            source_entity_id: self.target_entity_id.clone(),
            target_entity_id: self.source_entity_id.clone(),
            ..self.clone()
        }
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.source_entity_id == other.source_entity_id
            && self.target_entity_id == other.target_entity_id
            && self.edge_type == other.edge_type
            && self.source_file_path == other.source_file_path
            && self.source_line == other.source_line
            && self.source_column == other.source_column
            && self.branch == other.branch
    }
}

impl Eq for Edge {}

impl std::hash::Hash for Edge {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.source_entity_id.hash(state);
        self.target_entity_id.hash(state);
        self.edge_type.hash(state);
        self.source_file_path.hash(state);
        self.source_line.hash(state);
        self.source_column.hash(state);
        self.branch.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_type_roundtrip() {
        for ty in EdgeType::all() {
            let parsed: EdgeType = ty.as_str().parse().unwrap();
            assert_eq!(*ty, parsed);
        }
        assert_eq!(EdgeType::from_str("inherits").unwrap(), EdgeType::Extends);
        assert_eq!(EdgeType::from_str("call").unwrap(), EdgeType::Calls);
    }

    #[test]
    fn test_unresolved_target() {
        let edge = Edge::new("a", "unresolved:helper", EdgeType::Calls, "src/a.ts");
        assert!(edge.is_unresolved());
        let resolved = Edge::new("a", "acme:.:function:0a", EdgeType::Calls, "src/a.ts");
        assert!(!resolved.is_unresolved());
    }

    #[test]
    fn test_edge_reversed() {
        let edge = Edge::new("a", "b", EdgeType::Calls, "src/a.ts").at(3, 4);
        let reversed = edge.reversed();

        assert_eq!(reversed.source_entity_id, "b");
        assert_eq!(reversed.target_entity_id, "a");
        assert_eq!(reversed.source_line, 3);
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&EdgeType::ParameterOf).unwrap();
        assert_eq!(json, "\"PARAMETER_OF\"");
    }
}
