//! Node types - code symbols stored in a seed
//!
//! A node is any named entity a parser found: functions, classes, modules,
//! variables. Nodes are keyed by a content-addressed `entity_id` which is
//! unique inside one (repo, package, branch) partition.

use crate::properties::PropertyBag;
use crate::{DEFAULT_BRANCH, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Kinds of code symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Method,
    Class,
    Interface,
    Type,
    Enum,
    Module,
    Namespace,
    Variable,
    Constant,
    Property,
    Parameter,
    Decorator,
    JsxComponent,
    Hook,
    Unknown,
}

impl NodeKind {
    /// Get the string representation of the node kind
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Function => "function",
            NodeKind::Method => "method",
            NodeKind::Class => "class",
            NodeKind::Interface => "interface",
            NodeKind::Type => "type",
            NodeKind::Enum => "enum",
            NodeKind::Module => "module",
            NodeKind::Namespace => "namespace",
            NodeKind::Variable => "variable",
            NodeKind::Constant => "constant",
            NodeKind::Property => "property",
            NodeKind::Parameter => "parameter",
            NodeKind::Decorator => "decorator",
            NodeKind::JsxComponent => "jsx_component",
            NodeKind::Hook => "hook",
            NodeKind::Unknown => "unknown",
        }
    }

    /// Get all node kinds
    pub fn all() -> &'static [NodeKind] {
        &[
            NodeKind::Function,
            NodeKind::Method,
            NodeKind::Class,
            NodeKind::Interface,
            NodeKind::Type,
            NodeKind::Enum,
            NodeKind::Module,
            NodeKind::Namespace,
            NodeKind::Variable,
            NodeKind::Constant,
            NodeKind::Property,
            NodeKind::Parameter,
            NodeKind::Decorator,
            NodeKind::JsxComponent,
            NodeKind::Hook,
            NodeKind::Unknown,
        ]
    }

    /// Executable symbols, the ones that show up in call graphs.
    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            NodeKind::Function | NodeKind::Method | NodeKind::Hook | NodeKind::JsxComponent
        )
    }
}

impl FromStr for NodeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "function" | "fn" | "def" | "func" => Ok(NodeKind::Function),
            "method" | "constructor" => Ok(NodeKind::Method),
            "class" | "struct" => Ok(NodeKind::Class),
            "interface" | "trait" | "protocol" => Ok(NodeKind::Interface),
            "type" | "type_alias" | "typedef" => Ok(NodeKind::Type),
            "enum" => Ok(NodeKind::Enum),
            "module" | "file" => Ok(NodeKind::Module),
            "namespace" | "package" => Ok(NodeKind::Namespace),
            "variable" | "var" | "let" => Ok(NodeKind::Variable),
            "constant" | "const" => Ok(NodeKind::Constant),
            "property" | "field" | "attribute" => Ok(NodeKind::Property),
            "parameter" | "param" => Ok(NodeKind::Parameter),
            "decorator" | "annotation" => Ok(NodeKind::Decorator),
            "jsx_component" | "component" => Ok(NodeKind::JsxComponent),
            "hook" => Ok(NodeKind::Hook),
            "unknown" => Ok(NodeKind::Unknown),
            _ => Err(Error::Validation(format!("Unknown node kind: {}", s))),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Symbol visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Public,
    Private,
    Protected,
    Internal,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Protected => "protected",
            Visibility::Internal => "internal",
        }
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(Visibility::Public),
            "private" => Ok(Visibility::Private),
            "protected" => Ok(Visibility::Protected),
            "internal" => Ok(Visibility::Internal),
            _ => Err(Error::Validation(format!("Unknown visibility: {}", s))),
        }
    }
}

/// A symbol in a seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Content-addressed identifier (see [`crate::identity`])
    pub entity_id: String,
    /// Symbol name (just the identifier, not fully qualified)
    pub name: String,
    /// Dotted path inside the file (`AuthService.login`)
    pub qualified_name: String,
    pub kind: NodeKind,
    /// File path relative to the package root
    pub file_path: String,
    /// 1-indexed line range, inclusive
    pub start_line: u32,
    pub end_line: u32,
    /// 0-indexed columns
    pub start_column: u32,
    pub end_column: u32,
    pub is_exported: bool,
    pub is_default_export: bool,
    pub visibility: Visibility,
    pub properties: PropertyBag,
    pub source_file_hash: String,
    pub branch: String,
    /// Soft-delete flag: the file is gone but edges still point here
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a new node with minimal required fields
    pub fn new(
        entity_id: impl Into<String>,
        name: impl Into<String>,
        kind: NodeKind,
        file_path: impl Into<String>,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        let name = name.into();
        Self {
            entity_id: entity_id.into(),
            qualified_name: name.clone(),
            name,
            kind,
            file_path: file_path.into(),
            start_line,
            end_line,
            start_column: 0,
            end_column: 0,
            is_exported: false,
            is_default_export: false,
            visibility: Visibility::Public,
            properties: PropertyBag::new(),
            source_file_hash: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            is_deleted: false,
            updated_at: Utc::now(),
        }
    }

    /// Set the qualified name
    pub fn with_qualified_name(mut self, qualified_name: impl Into<String>) -> Self {
        self.qualified_name = qualified_name.into();
        self
    }

    /// Mark the node as exported
    pub fn exported(mut self) -> Self {
        self.is_exported = true;
        self
    }

    pub fn with_properties(mut self, properties: PropertyBag) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_source_hash(mut self, hash: impl Into<String>) -> Self {
        self.source_file_hash = hash.into();
        self
    }

    /// Get a short description for display
    pub fn short_description(&self) -> String {
        format!("{} {} ({}:{})", self.kind, self.qualified_name, self.file_path, self.start_line)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id && self.branch == other.branch
    }
}

impl Eq for Node {}

impl std::hash::Hash for Node {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.entity_id.hash(state);
        self.branch.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_kind_roundtrip() {
        for kind in NodeKind::all() {
            let s = kind.as_str();
            let parsed: NodeKind = s.parse().unwrap();
            assert_eq!(*kind, parsed);
        }
    }

    #[test]
    fn test_node_kind_aliases() {
        assert_eq!(NodeKind::from_str("struct").unwrap(), NodeKind::Class);
        assert_eq!(NodeKind::from_str("def").unwrap(), NodeKind::Function);
        assert_eq!(NodeKind::from_str("trait").unwrap(), NodeKind::Interface);
        assert_eq!(NodeKind::from_str("const").unwrap(), NodeKind::Constant);
        assert!(NodeKind::from_str("gizmo").is_err());
    }

    #[test]
    fn test_node_creation() {
        let node = Node::new("acme:.:method:00ff", "login", NodeKind::Method, "src/auth.ts", 10, 25)
            .with_qualified_name("AuthService.login")
            .exported();

        assert_eq!(node.name, "login");
        assert_eq!(node.qualified_name, "AuthService.login");
        assert_eq!(node.branch, DEFAULT_BRANCH);
        assert!(node.is_exported);
        assert!(!node.is_deleted);
        assert!(node.kind.is_callable());
    }
}
