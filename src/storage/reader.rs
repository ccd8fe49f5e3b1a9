//! Seed reader - lock-free access to seed tables
//!
//! `meta.json` names the live generation and generations are immutable, so a
//! read always sees a complete table: either the one before a concurrent
//! write or the one after it. Typed reads also filter on the `branch`
//! column.

use super::meta::SeedMeta;
use super::paths::SeedPaths;
use super::schema::{self, SeedTable};
use super::table::{self, SeedRow};
use crate::edge::{Edge, EdgeType, UNRESOLVED_PREFIX};
use crate::effect::Effect;
use crate::node::Node;
use crate::reference::ExternalRef;
use crate::Result;
use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;
use serde_json::{Map, Value as JsonValue};
use std::path::{Path, PathBuf};

/// SQLite refuses more than this many attached databases by default.
const MAX_ATTACHED: usize = 10;

/// One row of an ad-hoc query.
pub type QueryRow = Map<String, JsonValue>;

/// Reads one package's seed.
#[derive(Debug, Clone)]
pub struct SeedReader {
    paths: SeedPaths,
}

impl SeedReader {
    /// Reader for `branch` of the package at `package_root`. Nothing is
    /// opened until a table is read.
    pub fn open(package_root: impl Into<PathBuf>, branch: &str) -> Self {
        Self {
            paths: SeedPaths::new(package_root, branch),
        }
    }

    pub fn paths(&self) -> &SeedPaths {
        &self.paths
    }

    pub fn package_root(&self) -> &Path {
        self.paths.package_root()
    }

    pub fn branch(&self) -> &str {
        self.paths.branch()
    }

    /// Whether this branch has ever been written
    pub fn exists(&self) -> bool {
        self.paths.meta_path().exists()
    }

    pub fn meta(&self) -> Result<Option<SeedMeta>> {
        SeedMeta::read(&self.paths.meta_path())
    }

    /// A reader for another branch of the same package
    pub fn for_branch(&self, branch: &str) -> Self {
        Self::open(self.paths.package_root(), branch)
    }

    /// File of `table` in the live generation, if the branch was written
    pub fn table_path(&self, table: SeedTable) -> Result<Option<PathBuf>> {
        Ok(self.meta()?.map(|meta| self.paths.table_path(meta.generation, table)))
    }

    /// Rows of this branch matching `filter`, whose parameters start at `?2`
    fn branch_rows<T: SeedRow>(&self, filter: &str, params: &[Value]) -> Result<Vec<T>> {
        let Some(path) = self.table_path(T::TABLE)? else {
            return Ok(Vec::new());
        };
        let clause = if filter.is_empty() {
            "WHERE branch = ?1".to_string()
        } else {
            format!("WHERE branch = ?1 AND {}", filter)
        };
        let mut all_params = vec![Value::Text(self.branch().to_string())];
        all_params.extend_from_slice(params);
        table::read_rows_where(&path, &clause, &all_params)
    }

    // ========== Live rows ==========

    pub fn nodes(&self) -> Result<Vec<Node>> {
        self.branch_rows("is_deleted = 0", &[])
    }

    pub fn edges(&self) -> Result<Vec<Edge>> {
        self.branch_rows("is_deleted = 0", &[])
    }

    pub fn external_refs(&self) -> Result<Vec<ExternalRef>> {
        self.branch_rows("is_deleted = 0", &[])
    }

    pub fn effects(&self) -> Result<Vec<Effect>> {
        self.branch_rows("is_deleted = 0", &[])
    }

    // ========== Including soft-deleted rows ==========

    pub fn nodes_including_deleted(&self) -> Result<Vec<Node>> {
        self.branch_rows("", &[])
    }

    pub fn edges_including_deleted(&self) -> Result<Vec<Edge>> {
        self.branch_rows("", &[])
    }

    pub fn external_refs_including_deleted(&self) -> Result<Vec<ExternalRef>> {
        self.branch_rows("", &[])
    }

    pub fn effects_including_deleted(&self) -> Result<Vec<Effect>> {
        self.branch_rows("", &[])
    }

    /// Look up a node by id, soft-deleted nodes included
    pub fn get_node(&self, entity_id: &str) -> Result<Option<Node>> {
        let mut rows: Vec<Node> = self.branch_rows("entity_id = ?2", &[Value::Text(entity_id.to_string())])?;
        Ok(rows.pop())
    }

    // ========== Unresolved work for the resolution pass ==========

    pub fn get_unresolved_refs(&self, branch: &str) -> Result<Vec<ExternalRef>> {
        self.for_branch(branch)
            .branch_rows("is_resolved = 0 AND is_deleted = 0", &[])
    }

    pub fn get_unresolved_call_edges(&self, branch: &str) -> Result<Vec<Edge>> {
        self.unresolved_edges(branch, EdgeType::Calls)
    }

    pub fn get_unresolved_extends_edges(&self, branch: &str) -> Result<Vec<Edge>> {
        self.unresolved_edges(branch, EdgeType::Extends)
    }

    fn unresolved_edges(&self, branch: &str, edge_type: EdgeType) -> Result<Vec<Edge>> {
        self.for_branch(branch).branch_rows(
            "edge_type = ?2 AND substr(target_entity_id, 1, ?3) = ?4 AND is_deleted = 0",
            &[
                Value::Text(edge_type.as_str().to_string()),
                Value::Integer(UNRESOLVED_PREFIX.len() as i64),
                Value::Text(UNRESOLVED_PREFIX.to_string()),
            ],
        )
    }

    // ========== Ad-hoc queries ==========

    /// Run a read-only SQL template against this package.
    ///
    /// `{nodes}`, `{edges}`, `{external_refs}` and `{effects}` in the
    /// template name the package's tables.
    pub fn query(&self, template: &str) -> Result<Vec<QueryRow>> {
        Self::query_multiple_packages(std::slice::from_ref(self), template)
    }

    /// Run a read-only SQL template over the union of several packages.
    ///
    /// Each placeholder becomes a `UNION ALL` over the matching table of every
    /// package, each table file attached in place to a query-only connection. When more files
    /// are needed than SQLite can attach at once, the tables are copied into
    /// an in-memory database first.
    pub fn query_multiple_packages(readers: &[SeedReader], template: &str) -> Result<Vec<QueryRow>> {
        let conn = Connection::open_in_memory()?;

        let mut sources: Vec<(SeedTable, Vec<PathBuf>)> = Vec::new();
        for seed_table in SeedTable::all() {
            if !template.contains(&seed_table.placeholder()) {
                continue;
            }
            let mut files = Vec::new();
            for reader in readers {
                let Some(path) = reader.table_path(*seed_table)? else {
                    continue;
                };
                if path.exists() {
                    // reject foreign or outdated files before they reach the query
                    table::open_validated(&path, *seed_table)?;
                    files.push(path);
                }
            }
            sources.push((*seed_table, files));
        }

        let attach_count: usize = sources.iter().map(|(_, files)| files.len()).sum();
        let materialize = attach_count > MAX_ATTACHED;
        if materialize {
            tracing::debug!(attach_count, "Materializing seed tables for ad-hoc query");
        }

        let mut sql = template.to_string();
        let mut alias = 0;
        for (table, files) in &sources {
            let replacement = if files.is_empty() {
                let name = format!("empty_{}", table.as_str());
                conn.execute_batch(&schema::create_table_sql(*table, &name))?;
                name
            } else if materialize {
                let name = format!("all_{}", table.as_str());
                conn.execute_batch(&schema::create_table_sql(*table, &name))?;
                let columns = table.column_names().join(", ");
                for file in files {
                    attach(&conn, file, "src")?;
                    conn.execute_batch(&format!(
                        "INSERT INTO {name} ({columns}) SELECT {columns} FROM src.{table}",
                        name = name,
                        columns = columns,
                        table = table.as_str()
                    ))?;
                    conn.execute_batch("DETACH DATABASE src")?;
                }
                name
            } else {
                let columns = table.column_names().join(", ");
                let mut selects = Vec::with_capacity(files.len());
                for file in files {
                    let schema_name = format!("s{}", alias);
                    alias += 1;
                    attach(&conn, file, &schema_name)?;
                    selects.push(format!("SELECT {} FROM {}.{}", columns, schema_name, table.as_str()));
                }
                format!("({})", selects.join(" UNION ALL "))
            };
            sql = sql.replace(&table.placeholder(), &replacement);
        }

        conn.execute_batch("PRAGMA query_only = ON")?;
        run_query(&conn, &sql)
    }
}

fn attach(conn: &Connection, file: &Path, schema_name: &str) -> Result<()> {
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {}", schema_name),
        [file.to_string_lossy().as_ref()],
    )?;
    Ok(())
}

fn run_query(conn: &Connection, sql: &str) -> Result<Vec<QueryRow>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut record = Map::new();
        for (idx, column) in columns.iter().enumerate() {
            record.insert(column.clone(), to_json(row.get_ref(idx)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn to_json(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(t) => JsonValue::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => JsonValue::String(b.iter().map(|byte| format!("{:02x}", byte)).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_entity_id;
    use crate::node::NodeKind;
    use crate::storage::{ParseResult, SeedWriter};
    use crate::{DEFAULT_BRANCH, Error};
    use tempfile::TempDir;

    fn node(file: &str, name: &str) -> Node {
        let id = generate_entity_id("acme", ".", NodeKind::Function, file, name);
        Node::new(id.to_string(), name, NodeKind::Function, file, 1, 5)
    }

    fn seed_package(root: &Path, names: &[&str]) {
        let nodes: Vec<Node> = names.iter().map(|n| node("src/a.ts", n)).collect();
        let mut edges = vec![Edge::new(&nodes[0].entity_id, "unresolved:helper", EdgeType::Calls, "src/a.ts")];
        edges.push(Edge::new(&nodes[0].entity_id, "unresolved:Base", EdgeType::Extends, "src/a.ts"));
        SeedWriter::new(root, DEFAULT_BRANCH)
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes(nodes).with_edges(edges))
            .unwrap();
    }

    #[test]
    fn test_missing_seed_reads_empty() {
        let dir = TempDir::new().unwrap();
        let reader = SeedReader::open(dir.path(), DEFAULT_BRANCH);
        assert!(!reader.exists());
        assert!(reader.nodes().unwrap().is_empty());
        assert!(reader.meta().unwrap().is_none());
        assert!(reader.get_node("acme:.:function:00").unwrap().is_none());
        assert!(reader.table_path(SeedTable::Nodes).unwrap().is_none());
    }

    #[test]
    fn test_rows_of_other_branches_are_filtered() {
        let dir = TempDir::new().unwrap();
        seed_package(dir.path(), &["main", "helper"]);
        let reader = SeedReader::open(dir.path(), DEFAULT_BRANCH);

        let path = reader.table_path(SeedTable::Nodes).unwrap().unwrap();
        let conn = Connection::open(&path).unwrap();
        conn.execute("UPDATE nodes SET branch = 'feature_x' WHERE name = 'helper'", []).unwrap();
        drop(conn);

        let names: Vec<String> = reader.nodes().unwrap().into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["main"]);
        assert!(reader.get_node(&node("src/a.ts", "helper").entity_id).unwrap().is_none());
        assert_eq!(reader.nodes_including_deleted().unwrap().len(), 1);
        assert!(reader.for_branch("feature_x").nodes().unwrap().is_empty());
    }

    #[test]
    fn test_unresolved_edges() {
        let dir = TempDir::new().unwrap();
        seed_package(dir.path(), &["main"]);
        let reader = SeedReader::open(dir.path(), DEFAULT_BRANCH);

        let calls = reader.get_unresolved_call_edges(DEFAULT_BRANCH).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].target_entity_id, "unresolved:helper");

        let extends = reader.get_unresolved_extends_edges(DEFAULT_BRANCH).unwrap();
        assert_eq!(extends.len(), 1);
        assert!(reader.get_unresolved_call_edges("other").unwrap().is_empty());
    }

    #[test]
    fn test_query_single_package() {
        let dir = TempDir::new().unwrap();
        seed_package(dir.path(), &["main", "helper"]);
        let reader = SeedReader::open(dir.path(), DEFAULT_BRANCH);

        let rows = reader
            .query("SELECT name FROM {nodes} WHERE kind = 'function' ORDER BY name")
            .unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["helper", "main"]);

        let counts = reader
            .query("SELECT COUNT(*) AS n FROM {edges} e JOIN {nodes} n ON n.entity_id = e.source_entity_id")
            .unwrap();
        assert_eq!(counts[0]["n"], 2);
    }

    #[test]
    fn test_query_multiple_packages() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        let empty = dir.path().join("c");
        seed_package(&a, &["one"]);
        seed_package(&b, &["two", "three"]);

        let readers = vec![
            SeedReader::open(&a, DEFAULT_BRANCH),
            SeedReader::open(&b, DEFAULT_BRANCH),
            SeedReader::open(&empty, DEFAULT_BRANCH),
        ];
        let rows = SeedReader::query_multiple_packages(&readers, "SELECT COUNT(*) AS n FROM {nodes}").unwrap();
        assert_eq!(rows[0]["n"], 3);

        let rows = SeedReader::query_multiple_packages(&readers, "SELECT COUNT(*) AS n FROM {effects}").unwrap();
        assert_eq!(rows[0]["n"], 0);
    }

    #[test]
    fn test_query_materializes_past_attach_limit() {
        let dir = TempDir::new().unwrap();
        let readers: Vec<SeedReader> = (0..12)
            .map(|i| {
                let root = dir.path().join(format!("pkg{}", i));
                seed_package(&root, &["f"]);
                SeedReader::open(&root, DEFAULT_BRANCH)
            })
            .collect();

        let rows = SeedReader::query_multiple_packages(
            &readers,
            "SELECT (SELECT COUNT(*) FROM {nodes}) AS nodes, (SELECT COUNT(*) FROM {edges}) AS edges",
        )
        .unwrap();
        assert_eq!(rows[0]["nodes"], 12);
        assert_eq!(rows[0]["edges"], 24);
    }

    #[test]
    fn test_query_is_read_only() {
        let dir = TempDir::new().unwrap();
        seed_package(dir.path(), &["main"]);
        let reader = SeedReader::open(dir.path(), DEFAULT_BRANCH);
        let err = reader
            .query("DELETE FROM s0.nodes WHERE entity_id IN (SELECT entity_id FROM {nodes})")
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert_eq!(reader.nodes().unwrap().len(), 1);
    }
}
