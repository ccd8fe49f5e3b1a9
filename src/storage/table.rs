//! Typed row I/O for seed table files

use super::schema::{self, SeedTable};
use crate::edge::Edge;
use crate::effect::Effect;
use crate::node::Node;
use crate::properties::PropertyBag;
use crate::reference::ExternalRef;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, OpenFlags, Row, params_from_iter};
use std::path::Path;
use std::str::FromStr;

/// A record type stored in one seed table.
pub trait SeedRow: Sized {
    const TABLE: SeedTable;

    /// Column values in `TABLE.columns()` order
    fn to_values(&self) -> Result<Vec<Value>>;

    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Open an existing table file read-only and check its layout
pub fn open_validated(path: &Path, table: SeedTable) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| Error::corrupt(path, format!("cannot open table file: {}", e)))?;
    schema::validate(&conn, table, path).map_err(|e| match e {
        // a file that is not a database at all fails on the first pragma
        Error::Storage(inner) => Error::corrupt(path, inner.to_string()),
        other => other,
    })?;
    Ok(conn)
}

/// Read every row. A missing file is an empty table.
pub fn read_rows<T: SeedRow>(path: &Path) -> Result<Vec<T>> {
    read_rows_where(path, "", &[])
}

/// Read the rows matching `filter` (a `WHERE ...` clause, may be empty)
pub fn read_rows_where<T: SeedRow>(path: &Path, filter: &str, params: &[Value]) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let conn = open_validated(path, T::TABLE)?;
    let sql = format!(
        "SELECT {} FROM {} {} ORDER BY rowid",
        T::TABLE.column_names().join(", "),
        T::TABLE.as_str(),
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| T::from_row(row))?
        .collect::<rusqlite::Result<Vec<T>>>()
        .map_err(|e| match e {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..)
            | rusqlite::Error::IntegralValueOutOfRange(..) => Error::corrupt(path, e.to_string()),
            other => Error::Storage(other),
        })?;
    Ok(rows)
}

/// Create a fresh table file at `path` holding `rows`.
///
/// `path` is expected to be a staged temp file; the connection is closed
/// before returning so the file can be renamed.
pub fn write_rows<T: SeedRow>(path: &Path, rows: &[T]) -> Result<()> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode = OFF; PRAGMA synchronous = OFF;")?;
    for stmt in schema::all_schema_statements(T::TABLE) {
        conn.execute_batch(&stmt)?;
    }

    let columns = T::TABLE.column_names();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        T::TABLE.as_str(),
        columns.join(", "),
        placeholders.join(", ")
    );

    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare(&sql)?;
        for row in rows {
            stmt.execute(params_from_iter(row.to_values()?))?;
        }
    }
    tx.commit()?;

    conn.close().map_err(|(_, e)| Error::Storage(e))?;
    Ok(())
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn timestamp(value: &DateTime<Utc>) -> Value {
    Value::Text(value.to_rfc3339())
}

fn parse_column<T: FromStr<Err = Error>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: Error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn properties_column(row: &Row, idx: usize) -> rusqlite::Result<PropertyBag> {
    let raw: String = row.get(idx)?;
    PropertyBag::from_json(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl SeedRow for Node {
    const TABLE: SeedTable = SeedTable::Nodes;

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            text(&self.entity_id),
            text(&self.name),
            text(&self.qualified_name),
            text(self.kind.as_str()),
            text(&self.file_path),
            self.start_line.into(),
            self.end_line.into(),
            self.start_column.into(),
            self.end_column.into(),
            self.is_exported.into(),
            self.is_default_export.into(),
            text(self.visibility.as_str()),
            Value::Text(self.properties.to_json()?),
            text(&self.source_file_hash),
            text(&self.branch),
            self.is_deleted.into(),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Node {
            entity_id: row.get(0)?,
            name: row.get(1)?,
            qualified_name: row.get(2)?,
            kind: parse_column(row, 3)?,
            file_path: row.get(4)?,
            start_line: row.get(5)?,
            end_line: row.get(6)?,
            start_column: row.get(7)?,
            end_column: row.get(8)?,
            is_exported: row.get(9)?,
            is_default_export: row.get(10)?,
            visibility: parse_column(row, 11)?,
            properties: properties_column(row, 12)?,
            source_file_hash: row.get(13)?,
            branch: row.get(14)?,
            is_deleted: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }
}

impl SeedRow for Edge {
    const TABLE: SeedTable = SeedTable::Edges;

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            text(&self.source_entity_id),
            text(&self.target_entity_id),
            text(self.edge_type.as_str()),
            text(&self.source_file_path),
            self.source_line.into(),
            self.source_column.into(),
            Value::Text(self.properties.to_json()?),
            text(&self.source_file_hash),
            text(&self.branch),
            self.is_deleted.into(),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Edge {
            source_entity_id: row.get(0)?,
            target_entity_id: row.get(1)?,
            edge_type: parse_column(row, 2)?,
            source_file_path: row.get(3)?,
            source_line: row.get(4)?,
            source_column: row.get(5)?,
            properties: properties_column(row, 6)?,
            source_file_hash: row.get(7)?,
            branch: row.get(8)?,
            is_deleted: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl SeedRow for ExternalRef {
    const TABLE: SeedTable = SeedTable::ExternalRefs;

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            text(&self.source_entity_id),
            text(&self.module_specifier),
            text(&self.imported_symbol),
            self.local_alias.clone().into(),
            text(self.import_style.as_str()),
            self.is_type_only.into(),
            text(&self.source_file_path),
            self.source_line.into(),
            self.source_column.into(),
            self.target_entity_id.clone().into(),
            self.is_resolved.into(),
            self.is_reexport.into(),
            text(&self.source_file_hash),
            text(&self.branch),
            self.is_deleted.into(),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ExternalRef {
            source_entity_id: row.get(0)?,
            module_specifier: row.get(1)?,
            imported_symbol: row.get(2)?,
            local_alias: row.get(3)?,
            import_style: parse_column(row, 4)?,
            is_type_only: row.get(5)?,
            source_file_path: row.get(6)?,
            source_line: row.get(7)?,
            source_column: row.get(8)?,
            target_entity_id: row.get(9)?,
            is_resolved: row.get(10)?,
            is_reexport: row.get(11)?,
            source_file_hash: row.get(12)?,
            branch: row.get(13)?,
            is_deleted: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }
}

impl SeedRow for Effect {
    const TABLE: SeedTable = SeedTable::Effects;

    fn to_values(&self) -> Result<Vec<Value>> {
        Ok(vec![
            text(&self.effect_id),
            text(self.effect_type.as_str()),
            text(&self.source_entity_id),
            text(&self.source_file_path),
            self.source_line.into(),
            self.source_column.into(),
            self.callee_name.clone().into(),
            self.target_entity_id.clone().into(),
            self.is_external.into(),
            self.external_module.clone().into(),
            Value::Text(self.properties.to_json()?),
            text(&self.source_file_hash),
            text(&self.branch),
            self.is_deleted.into(),
            timestamp(&self.updated_at),
        ])
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Effect {
            effect_id: row.get(0)?,
            effect_type: parse_column(row, 1)?,
            source_entity_id: row.get(2)?,
            source_file_path: row.get(3)?,
            source_line: row.get(4)?,
            source_column: row.get(5)?,
            callee_name: row.get(6)?,
            target_entity_id: row.get(7)?,
            is_external: row.get(8)?,
            external_module: row.get(9)?,
            properties: properties_column(row, 10)?,
            source_file_hash: row.get(11)?,
            branch: row.get(12)?,
            is_deleted: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}
