//! Property bags - typed key/value extras on nodes, edges and effects
//!
//! Parsers attach extra facts to records (decorators, return types, argument
//! counts, ...). Instead of an untyped map, every allowed key is listed in a
//! versioned schema with the value type it must carry. Keys starting with
//! `x-` are free-form extensions and skip the type check.
//!
//! Validation runs once, when rows enter the seed writer.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the allowed-key table below. Bump when keys change meaning.
pub const PROPERTY_SCHEMA_VERSION: u32 = 1;

/// Prefix for free-form extension keys.
pub const EXTENSION_PREFIX: &str = "x-";

/// Value types a property may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyType {
    Bool,
    Int,
    Float,
    Text,
    List,
}

/// Allowed keys for schema version 1.
const ALLOWED_KEYS: &[(&str, PropertyType)] = &[
    // nodes
    ("is_async", PropertyType::Bool),
    ("is_generator", PropertyType::Bool),
    ("is_static", PropertyType::Bool),
    ("is_abstract", PropertyType::Bool),
    ("is_optional", PropertyType::Bool),
    ("return_type", PropertyType::Text),
    ("type_annotation", PropertyType::Text),
    ("docstring", PropertyType::Text),
    ("decorators", PropertyType::List),
    ("type_parameters", PropertyType::List),
    ("parameters", PropertyType::List),
    ("extends", PropertyType::List),
    ("implements", PropertyType::List),
    ("complexity", PropertyType::Int),
    // edges
    ("argument_count", PropertyType::Int),
    ("is_method_call", PropertyType::Bool),
    ("is_constructor", PropertyType::Bool),
    ("is_dynamic", PropertyType::Bool),
    ("callee", PropertyType::Text),
    ("confidence", PropertyType::Float),
    // effects
    ("receiver", PropertyType::Text),
    ("http_method", PropertyType::Text),
    ("route", PropertyType::Text),
    ("resource", PropertyType::Text),
];

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Bool(_) => PropertyType::Bool,
            PropertyValue::Int(_) => PropertyType::Int,
            PropertyValue::Float(_) => PropertyType::Float,
            PropertyValue::Text(_) => PropertyType::Text,
            PropertyValue::List(_) => PropertyType::List,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::Text(value)
    }
}

impl From<Vec<String>> for PropertyValue {
    fn from(value: Vec<String>) -> Self {
        PropertyValue::List(value)
    }
}

/// Typed key/value map attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyBag(BTreeMap<String, PropertyValue>);

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyValue)> {
        self.0.iter()
    }

    /// Check every key against the allowed-key table.
    pub fn validate(&self) -> Result<()> {
        for (key, value) in &self.0 {
            if key.starts_with(EXTENSION_PREFIX) {
                continue;
            }
            let expected = allowed_type(key).ok_or_else(|| {
                Error::Validation(format!(
                    "unknown property key '{}' (schema v{})",
                    key, PROPERTY_SCHEMA_VERSION
                ))
            })?;

            let actual = value.property_type();
            // integers are accepted where floats are expected
            let compatible = actual == expected
                || (expected == PropertyType::Float && actual == PropertyType::Int);
            if !compatible {
                return Err(Error::Validation(format!(
                    "property '{}' expects {:?}, got {:?}",
                    key, expected, actual
                )));
            }
        }
        Ok(())
    }

    /// Serialized form stored in the seed tables.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(raw)?)
    }
}

/// Value type registered for `key`, if any.
pub fn allowed_type(key: &str) -> Option<PropertyType> {
    ALLOWED_KEYS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, ty)| *ty)
}
