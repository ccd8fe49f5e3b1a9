//! Effects - raw observed operations
//!
//! Parsers record what code *does* (calls, stores, requests). An external
//! rules engine later turns these into domain-labelled effects; here they are
//! only stored and read back.

use crate::properties::PropertyBag;
use crate::{DEFAULT_BRANCH, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    FunctionCall,
    Store,
    Retrieve,
    Send,
    Request,
    Response,
    Condition,
    Loop,
    Group,
}

impl EffectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectType::FunctionCall => "function_call",
            EffectType::Store => "store",
            EffectType::Retrieve => "retrieve",
            EffectType::Send => "send",
            EffectType::Request => "request",
            EffectType::Response => "response",
            EffectType::Condition => "condition",
            EffectType::Loop => "loop",
            EffectType::Group => "group",
        }
    }
}

impl FromStr for EffectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "function_call" => Ok(EffectType::FunctionCall),
            "store" => Ok(EffectType::Store),
            "retrieve" => Ok(EffectType::Retrieve),
            "send" => Ok(EffectType::Send),
            "request" => Ok(EffectType::Request),
            "response" => Ok(EffectType::Response),
            "condition" => Ok(EffectType::Condition),
            "loop" => Ok(EffectType::Loop),
            "group" => Ok(EffectType::Group),
            _ => Err(Error::Validation(format!("Unknown effect type: {}", s))),
        }
    }
}

/// A raw effect observed inside an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    /// Unique per (package, branch)
    pub effect_id: String,
    pub effect_type: EffectType,
    pub source_entity_id: String,
    pub source_file_path: String,
    pub source_line: u32,
    pub source_column: u32,
    pub callee_name: Option<String>,
    pub target_entity_id: Option<String>,
    pub is_external: bool,
    pub external_module: Option<String>,
    pub properties: PropertyBag,
    pub source_file_hash: String,
    pub branch: String,
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl Effect {
    pub fn new(
        effect_id: impl Into<String>,
        effect_type: EffectType,
        source_entity_id: impl Into<String>,
        source_file_path: impl Into<String>,
    ) -> Self {
        Self {
            effect_id: effect_id.into(),
            effect_type,
            source_entity_id: source_entity_id.into(),
            source_file_path: source_file_path.into(),
            source_line: 0,
            source_column: 0,
            callee_name: None,
            target_entity_id: None,
            is_external: false,
            external_module: None,
            properties: PropertyBag::new(),
            source_file_hash: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            is_deleted: false,
            updated_at: Utc::now(),
        }
    }

    /// Function call effect
    pub fn call(
        effect_id: impl Into<String>,
        source_entity_id: impl Into<String>,
        source_file_path: impl Into<String>,
        callee: impl Into<String>,
    ) -> Self {
        let mut effect = Self::new(effect_id, EffectType::FunctionCall, source_entity_id, source_file_path);
        effect.callee_name = Some(callee.into());
        effect
    }

    pub fn external(mut self, module: impl Into<String>) -> Self {
        self.is_external = true;
        self.external_module = Some(module.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_effect() {
        let effect = Effect::call("e1", "acme:.:function:0a", "src/db.ts", "pool.query").external("pg");
        assert_eq!(effect.effect_type, EffectType::FunctionCall);
        assert_eq!(effect.callee_name.as_deref(), Some("pool.query"));
        assert!(effect.is_external);
    }

    #[test]
    fn test_effect_type_parse() {
        assert_eq!(EffectType::from_str("request").unwrap(), EffectType::Request);
        assert!(EffectType::from_str("teleport").is_err());
    }
}
