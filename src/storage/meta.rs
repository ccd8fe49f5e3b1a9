//! `meta.json` - per-branch seed summary and commit point
//!
//! Replacing this file is what publishes a write: it names the generation
//! directory readers open.

use super::atomic::StagedFile;
use super::schema::SCHEMA_VERSION;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowCounts {
    pub nodes: usize,
    pub edges: usize,
    pub external_refs: usize,
    pub effects: usize,
}

impl RowCounts {
    pub fn total(&self) -> usize {
        self.nodes + self.edges + self.external_refs + self.effects
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedMeta {
    pub schema_version: u32,
    /// Real branch name; the directory name may be hashed
    pub branch: String,
    /// Live `gen-NNNNNN` directory
    pub generation: u64,
    pub row_counts: RowCounts,
    pub updated_at: DateTime<Utc>,
}

impl SeedMeta {
    pub fn new(branch: &str, row_counts: RowCounts, generation: u64) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            branch: branch.to_string(),
            generation,
            row_counts,
            updated_at: Utc::now(),
        }
    }

    /// Read `meta.json`; `None` when the seed has never been written
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let meta: SeedMeta = serde_json::from_str(&raw)
            .map_err(|e| Error::corrupt(path, format!("invalid meta.json: {}", e)))?;
        if meta.schema_version != SCHEMA_VERSION {
            return Err(Error::corrupt(
                path,
                format!(
                    "schema version {} (expected {})",
                    meta.schema_version, SCHEMA_VERSION
                ),
            ));
        }
        Ok(Some(meta))
    }

    /// Write into a staged file; committing it publishes the generation
    pub fn stage(&self, path: &Path) -> Result<StagedFile> {
        let staged = StagedFile::new(path)?;
        staged.write(&serde_json::to_vec_pretty(self)?)?;
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_meta_wire_format() {
        let meta = SeedMeta::new("feature/x", RowCounts { nodes: 2, edges: 1, external_refs: 0, effects: 3 }, 4);
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(json["rowCounts"]["externalRefs"], 0);
        assert_eq!(json["branch"], "feature/x");
        assert_eq!(json["generation"], 4);
        assert_eq!(meta.row_counts.total(), 6);
    }

    #[test]
    fn test_read_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        assert!(SeedMeta::read(&path).unwrap().is_none());

        fs::write(&path, "{").unwrap();
        assert!(matches!(SeedMeta::read(&path), Err(Error::Corrupt { .. })));

        let mut meta = SeedMeta::new("base", RowCounts::default(), 1);
        meta.schema_version = SCHEMA_VERSION + 1;
        fs::write(&path, serde_json::to_vec(&meta).unwrap()).unwrap();
        assert!(matches!(SeedMeta::read(&path), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn test_stage_and_commit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        let meta = SeedMeta::new("base", RowCounts::default(), 1);
        meta.stage(&path).unwrap().commit().unwrap();
        assert_eq!(SeedMeta::read(&path).unwrap().unwrap(), meta);
    }
}
