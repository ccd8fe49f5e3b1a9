//! Central hub schema

use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const HUB_SCHEMA_VERSION: u32 = 1;

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// SQL to create the hub metadata table
pub const CREATE_HUB_META_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS hub_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

/// SQL to create the repos table
pub const CREATE_REPOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS repos (
    repo_id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    name TEXT NOT NULL,
    status TEXT NOT NULL,
    content_hash TEXT,
    package_count INTEGER NOT NULL DEFAULT 0,
    cross_repo_edges INTEGER NOT NULL DEFAULT 0,
    registered_at TEXT NOT NULL,
    last_refreshed_at TEXT
)
"#;

/// SQL to create the cached manifests table
pub const CREATE_REPO_MANIFESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS repo_manifests (
    repo_id TEXT PRIMARY KEY REFERENCES repos(repo_id),
    content_hash TEXT NOT NULL,
    manifest TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the diagnostics table
pub const CREATE_DIAGNOSTICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS unified_diagnostics (
    diagnostic_id TEXT PRIMARY KEY,
    repo_id TEXT NOT NULL,
    source TEXT NOT NULL,
    severity TEXT NOT NULL,
    category TEXT NOT NULL,
    file_path TEXT,
    line_number INTEGER,
    column_number INTEGER,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    code TEXT,
    suggestion TEXT,
    resolved INTEGER NOT NULL DEFAULT 0,
    actionable INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_repos_status ON repos(status)",
    "CREATE INDEX IF NOT EXISTS idx_diagnostics_repo ON unified_diagnostics(repo_id)",
    "CREATE INDEX IF NOT EXISTS idx_diagnostics_source ON unified_diagnostics(source)",
    "CREATE INDEX IF NOT EXISTS idx_diagnostics_file ON unified_diagnostics(file_path)",
];

const REQUIRED_TABLES: &[&str] = &["hub_meta", "repos", "repo_manifests", "unified_diagnostics"];

/// Get all schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_HUB_META_TABLE,
        CREATE_REPOS_TABLE,
        CREATE_REPO_MANIFESTS_TABLE,
        CREATE_DIAGNOSTICS_TABLE,
    ];
    stmts.extend(CREATE_INDEXES);
    stmts
}

/// Create the schema and stamp the version. Idempotent.
pub fn initialize(conn: &Connection) -> Result<()> {
    for stmt in all_schema_statements() {
        conn.execute(stmt, [])?;
    }
    conn.execute(
        "INSERT OR IGNORE INTO hub_meta (key, value) VALUES (?1, ?2)",
        rusqlite::params![SCHEMA_VERSION_KEY, HUB_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Check that `conn` holds a hub this build understands
pub fn validate(conn: &Connection, path: &Path) -> Result<()> {
    for table in REQUIRED_TABLES {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(Error::corrupt(path, format!("hub table {} is missing", table)));
        }
    }

    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM hub_meta WHERE key = ?1",
            [SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()?;
    match version.as_deref().map(str::parse::<u32>) {
        Some(Ok(v)) if v == HUB_SCHEMA_VERSION => Ok(()),
        Some(Ok(v)) => Err(Error::corrupt(
            path,
            format!("hub schema version {} (expected {})", v, HUB_SCHEMA_VERSION),
        )),
        _ => Err(Error::corrupt(path, "hub schema version missing or unreadable")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();
        initialize(&conn).unwrap();
        validate(&conn, Path::new(":memory:")).unwrap();
    }

    #[test]
    fn test_validate_rejects_foreign_database() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE unrelated (x INTEGER)", []).unwrap();
        assert!(matches!(validate(&conn, Path::new("x.db")), Err(Error::Corrupt { .. })));

        initialize(&conn).unwrap();
        conn.execute("UPDATE hub_meta SET value = '99' WHERE key = 'schema_version'", []).unwrap();
        assert!(matches!(validate(&conn, Path::new("x.db")), Err(Error::Corrupt { .. })));
    }
}
