//! Seed table definitions
//!
//! Each seed table is its own single-table SQLite file whose table carries
//! the same name as the file (`nodes.db` holds `nodes`). Files are stamped
//! with `PRAGMA user_version` so readers can reject foreign or outdated data.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;

/// Layout version of the table files and `meta.json`
pub const SCHEMA_VERSION: u32 = 1;

/// The four tables of a seed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeedTable {
    Nodes,
    Edges,
    ExternalRefs,
    Effects,
}

impl SeedTable {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeedTable::Nodes => "nodes",
            SeedTable::Edges => "edges",
            SeedTable::ExternalRefs => "external_refs",
            SeedTable::Effects => "effects",
        }
    }

    pub fn all() -> &'static [SeedTable] {
        &[
            SeedTable::Nodes,
            SeedTable::Edges,
            SeedTable::ExternalRefs,
            SeedTable::Effects,
        ]
    }

    pub fn file_name(&self) -> String {
        format!("{}.db", self.as_str())
    }

    /// Placeholder used in ad-hoc query templates (`{nodes}`)
    pub fn placeholder(&self) -> String {
        format!("{{{}}}", self.as_str())
    }

    pub fn columns(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            SeedTable::Nodes => NODE_COLUMNS,
            SeedTable::Edges => EDGE_COLUMNS,
            SeedTable::ExternalRefs => EXTERNAL_REF_COLUMNS,
            SeedTable::Effects => EFFECT_COLUMNS,
        }
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns().iter().map(|(name, _)| *name).collect()
    }

    fn indexes(&self) -> &'static [&'static str] {
        match self {
            SeedTable::Nodes => &["entity_id", "file_path"],
            SeedTable::Edges => &["source_entity_id", "target_entity_id"],
            SeedTable::ExternalRefs => &["source_entity_id", "source_file_path"],
            SeedTable::Effects => &["source_entity_id"],
        }
    }
}

const NODE_COLUMNS: &[(&str, &str)] = &[
    ("entity_id", "TEXT NOT NULL"),
    ("name", "TEXT NOT NULL"),
    ("qualified_name", "TEXT NOT NULL"),
    ("kind", "TEXT NOT NULL"),
    ("file_path", "TEXT NOT NULL"),
    ("start_line", "INTEGER NOT NULL"),
    ("end_line", "INTEGER NOT NULL"),
    ("start_column", "INTEGER NOT NULL"),
    ("end_column", "INTEGER NOT NULL"),
    ("is_exported", "INTEGER NOT NULL"),
    ("is_default_export", "INTEGER NOT NULL"),
    ("visibility", "TEXT NOT NULL"),
    ("properties", "TEXT NOT NULL"),
    ("source_file_hash", "TEXT NOT NULL"),
    ("branch", "TEXT NOT NULL"),
    ("is_deleted", "INTEGER NOT NULL"),
    ("updated_at", "TEXT NOT NULL"),
];

const EDGE_COLUMNS: &[(&str, &str)] = &[
    ("source_entity_id", "TEXT NOT NULL"),
    ("target_entity_id", "TEXT NOT NULL"),
    ("edge_type", "TEXT NOT NULL"),
    ("source_file_path", "TEXT NOT NULL"),
    ("source_line", "INTEGER NOT NULL"),
    ("source_column", "INTEGER NOT NULL"),
    ("properties", "TEXT NOT NULL"),
    ("source_file_hash", "TEXT NOT NULL"),
    ("branch", "TEXT NOT NULL"),
    ("is_deleted", "INTEGER NOT NULL"),
    ("updated_at", "TEXT NOT NULL"),
];

const EXTERNAL_REF_COLUMNS: &[(&str, &str)] = &[
    ("source_entity_id", "TEXT NOT NULL"),
    ("module_specifier", "TEXT NOT NULL"),
    ("imported_symbol", "TEXT NOT NULL"),
    ("local_alias", "TEXT"),
    ("import_style", "TEXT NOT NULL"),
    ("is_type_only", "INTEGER NOT NULL"),
    ("source_file_path", "TEXT NOT NULL"),
    ("source_line", "INTEGER NOT NULL"),
    ("source_column", "INTEGER NOT NULL"),
    ("target_entity_id", "TEXT"),
    ("is_resolved", "INTEGER NOT NULL"),
    ("is_reexport", "INTEGER NOT NULL"),
    ("source_file_hash", "TEXT NOT NULL"),
    ("branch", "TEXT NOT NULL"),
    ("is_deleted", "INTEGER NOT NULL"),
    ("updated_at", "TEXT NOT NULL"),
];

const EFFECT_COLUMNS: &[(&str, &str)] = &[
    ("effect_id", "TEXT NOT NULL"),
    ("effect_type", "TEXT NOT NULL"),
    ("source_entity_id", "TEXT NOT NULL"),
    ("source_file_path", "TEXT NOT NULL"),
    ("source_line", "INTEGER NOT NULL"),
    ("source_column", "INTEGER NOT NULL"),
    ("callee_name", "TEXT"),
    ("target_entity_id", "TEXT"),
    ("is_external", "INTEGER NOT NULL"),
    ("external_module", "TEXT"),
    ("properties", "TEXT NOT NULL"),
    ("source_file_hash", "TEXT NOT NULL"),
    ("branch", "TEXT NOT NULL"),
    ("is_deleted", "INTEGER NOT NULL"),
    ("updated_at", "TEXT NOT NULL"),
];

/// `CREATE TABLE` for `table`, created under `name` (which may carry a
/// schema prefix such as `main.`).
pub fn create_table_sql(table: SeedTable, name: &str) -> String {
    let columns: Vec<String> = table
        .columns()
        .iter()
        .map(|(column, ty)| format!("    {} {}", column, ty))
        .collect();
    format!("CREATE TABLE IF NOT EXISTS {} (\n{}\n)", name, columns.join(",\n"))
}

/// Statements that create a fresh table file.
pub fn all_schema_statements(table: SeedTable) -> Vec<String> {
    let mut stmts = vec![
        format!("PRAGMA user_version = {}", SCHEMA_VERSION),
        create_table_sql(table, table.as_str()),
    ];
    stmts.extend(table.indexes().iter().map(|column| {
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column})",
            table = table.as_str(),
            column = column
        )
    }));
    stmts
}

/// Check that an open table file matches the expected layout.
///
/// `path` is only used in the error.
pub fn validate(conn: &Connection, table: SeedTable, path: &Path) -> Result<()> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version != SCHEMA_VERSION {
        return Err(Error::corrupt(
            path,
            format!("schema version {} (expected {})", version, SCHEMA_VERSION),
        ));
    }

    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let present: Vec<String> = stmt
        .query_map([table.as_str()], |row| row.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    if present.is_empty() {
        return Err(Error::corrupt(path, format!("missing table '{}'", table.as_str())));
    }

    let missing: Vec<&str> = table
        .column_names()
        .into_iter()
        .filter(|column| !present.iter().any(|p| p == column))
        .collect();
    if !missing.is_empty() {
        return Err(Error::corrupt(
            path,
            format!("table '{}' lacks columns: {}", table.as_str(), missing.join(", ")),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_table_validates() {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in all_schema_statements(SeedTable::Edges) {
            conn.execute_batch(&stmt).unwrap();
        }
        assert!(validate(&conn, SeedTable::Edges, Path::new("edges.db")).is_ok());
    }

    #[test]
    fn test_wrong_version_is_corrupt() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&create_table_sql(SeedTable::Nodes, "nodes")).unwrap();
        let err = validate(&conn, SeedTable::Nodes, Path::new("nodes.db")).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
    }

    #[test]
    fn test_missing_columns_are_corrupt() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!(
            "PRAGMA user_version = {}; CREATE TABLE nodes (entity_id TEXT)",
            SCHEMA_VERSION
        ))
        .unwrap();
        let err = validate(&conn, SeedTable::Nodes, Path::new("nodes.db")).unwrap_err();
        assert!(err.to_string().contains("lacks columns"));
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(SeedTable::ExternalRefs.placeholder(), "{external_refs}");
        assert_eq!(SeedTable::Effects.file_name(), "effects.db");
    }
}
