//! External references - import-like links to other modules
//!
//! A reference starts unresolved (`target_entity_id = None`). The semantic
//! resolution pass, which lives outside this crate, fills in the target and
//! writes it back through [`crate::storage::SeedWriter::update_resolved_refs`].

use crate::{DEFAULT_BRANCH, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// How a symbol was imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImportStyle {
    #[default]
    Named,
    Default,
    Namespace,
    SideEffect,
    Dynamic,
    Require,
}

impl ImportStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStyle::Named => "named",
            ImportStyle::Default => "default",
            ImportStyle::Namespace => "namespace",
            ImportStyle::SideEffect => "side_effect",
            ImportStyle::Dynamic => "dynamic",
            ImportStyle::Require => "require",
        }
    }
}

impl FromStr for ImportStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "named" => Ok(ImportStyle::Named),
            "default" => Ok(ImportStyle::Default),
            "namespace" => Ok(ImportStyle::Namespace),
            "side_effect" => Ok(ImportStyle::SideEffect),
            "dynamic" => Ok(ImportStyle::Dynamic),
            "require" => Ok(ImportStyle::Require),
            _ => Err(Error::Validation(format!("Unknown import style: {}", s))),
        }
    }
}

/// An import-like reference from an entity to a module symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRef {
    /// Importing entity (usually the file's module node)
    pub source_entity_id: String,
    /// Module specifier as written (`./auth`, `@acme/core`)
    pub module_specifier: String,
    /// Imported name (`*` for namespace imports)
    pub imported_symbol: String,
    pub local_alias: Option<String>,
    pub import_style: ImportStyle,
    pub is_type_only: bool,
    pub source_file_path: String,
    pub source_line: u32,
    pub source_column: u32,
    pub target_entity_id: Option<String>,
    pub is_resolved: bool,
    pub is_reexport: bool,
    pub source_file_hash: String,
    pub branch: String,
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl ExternalRef {
    /// Create a new unresolved reference
    pub fn new(
        source_entity_id: impl Into<String>,
        module_specifier: impl Into<String>,
        imported_symbol: impl Into<String>,
        source_file_path: impl Into<String>,
    ) -> Self {
        Self {
            source_entity_id: source_entity_id.into(),
            module_specifier: module_specifier.into(),
            imported_symbol: imported_symbol.into(),
            local_alias: None,
            import_style: ImportStyle::Named,
            is_type_only: false,
            source_file_path: source_file_path.into(),
            source_line: 0,
            source_column: 0,
            target_entity_id: None,
            is_resolved: false,
            is_reexport: false,
            source_file_hash: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            is_deleted: false,
            updated_at: Utc::now(),
        }
    }

    pub fn with_style(mut self, style: ImportStyle) -> Self {
        self.import_style = style;
        self
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.source_line = line;
        self.source_column = column;
        self
    }

    /// Mark the reference as resolved to `target`
    pub fn resolved_to(mut self, target: impl Into<String>) -> Self {
        self.target_entity_id = Some(target.into());
        self.is_resolved = true;
        self
    }

    /// Identity of a reference inside one file, used when writing back
    /// resolutions.
    pub fn ref_key(&self) -> RefKey {
        RefKey {
            source_entity_id: self.source_entity_id.clone(),
            module_specifier: self.module_specifier.clone(),
            imported_symbol: self.imported_symbol.clone(),
        }
    }
}

/// Identifies a reference for resolution write-back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RefKey {
    pub source_entity_id: String,
    pub module_specifier: String,
    pub imported_symbol: String,
}

/// Outcome of the external resolution pass for one reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefResolution {
    pub key: RefKey,
    pub target_entity_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ref_is_unresolved() {
        let r = ExternalRef::new("m", "./auth", "login", "src/app.ts");
        assert!(!r.is_resolved);
        assert!(r.target_entity_id.is_none());

        let r = r.resolved_to("acme:.:function:0a");
        assert!(r.is_resolved);
        assert_eq!(r.target_entity_id.as_deref(), Some("acme:.:function:0a"));
    }

    #[test]
    fn test_import_style_parse() {
        assert_eq!(ImportStyle::from_str("side_effect").unwrap(), ImportStyle::SideEffect);
        assert!(ImportStyle::from_str("glob").is_err());
    }
}
