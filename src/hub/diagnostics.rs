//! Unified diagnostics
//!
//! Compiler errors, lint findings, failing tests, CI checks and review
//! comments pushed by external tools, normalised into one table.

use super::store::CentralHub;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Row, params, params_from_iter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $s),+
                }
            }

            pub fn all() -> &'static [$name] {
                &[$($name::$variant),+]
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($s => Ok($name::$variant),)+
                    _ => Err(Error::Validation(format!(
                        "Unknown {}: {}",
                        stringify!($name),
                        s
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(DiagnosticSource {
    Tsc => "tsc",
    Eslint => "eslint",
    Biome => "biome",
    Test => "test",
    Coverage => "coverage",
    CiCheck => "ci_check",
    GithubIssue => "github_issue",
    PrReview => "pr_review",
});

string_enum!(DiagnosticSeverity {
    Critical => "critical",
    Error => "error",
    Warning => "warning",
    Suggestion => "suggestion",
    Note => "note",
});

string_enum!(DiagnosticCategory {
    Compilation => "compilation",
    Linting => "linting",
    Testing => "testing",
    CiCheck => "ci_check",
    Task => "task",
    Feedback => "feedback",
    CodeReview => "code_review",
    Security => "security",
    Performance => "performance",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedDiagnostic {
    /// Stable id chosen by the producer; pushing the same id again updates
    pub diagnostic_id: String,
    pub repo_id: String,
    pub source: DiagnosticSource,
    pub severity: DiagnosticSeverity,
    pub category: DiagnosticCategory,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub column_number: Option<u32>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub code: Option<String>,
    pub suggestion: Option<String>,
    #[serde(default)]
    pub resolved: bool,
    #[serde(default = "default_actionable")]
    pub actionable: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_actionable() -> bool {
    true
}

impl UnifiedDiagnostic {
    pub fn new(
        diagnostic_id: impl Into<String>,
        repo_id: impl Into<String>,
        source: DiagnosticSource,
        severity: DiagnosticSeverity,
        category: DiagnosticCategory,
        title: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            diagnostic_id: diagnostic_id.into(),
            repo_id: repo_id.into(),
            source,
            severity,
            category,
            file_path: None,
            line_number: None,
            column_number: None,
            title: title.into(),
            description: String::new(),
            code: None,
            suggestion: None,
            resolved: false,
            actionable: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn at(mut self, file_path: impl Into<String>, line: u32, column: u32) -> Self {
        self.file_path = Some(file_path.into());
        self.line_number = Some(line);
        self.column_number = Some(column);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Selects diagnostics; unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsFilter {
    pub repo_id: Option<String>,
    pub source: Option<DiagnosticSource>,
    pub severity: Option<DiagnosticSeverity>,
    pub category: Option<DiagnosticCategory>,
    pub file_path: Option<String>,
    pub resolved: Option<bool>,
    pub limit: Option<usize>,
}

impl DiagnosticsFilter {
    pub fn for_repo(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: Some(repo_id.into()),
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source: DiagnosticSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn unresolved(mut self) -> Self {
        self.resolved = Some(false);
        self
    }

    fn where_clause(&self) -> (String, Vec<Value>) {
        let mut conditions = Vec::new();
        let mut values = Vec::new();
        let mut push = |column: &str, value: Value| {
            values.push(value);
            conditions.push(format!("{} = ?{}", column, values.len()));
        };

        if let Some(repo_id) = &self.repo_id {
            push("repo_id", Value::Text(repo_id.clone()));
        }
        if let Some(source) = self.source {
            push("source", Value::Text(source.as_str().to_string()));
        }
        if let Some(severity) = self.severity {
            push("severity", Value::Text(severity.as_str().to_string()));
        }
        if let Some(category) = self.category {
            push("category", Value::Text(category.as_str().to_string()));
        }
        if let Some(file_path) = &self.file_path {
            push("file_path", Value::Text(file_path.clone()));
        }
        if let Some(resolved) = self.resolved {
            push("resolved", Value::Integer(resolved as i64));
        }

        if conditions.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", conditions.join(" AND ")), values)
        }
    }
}

/// Open diagnostic counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsSummary {
    pub total: usize,
    pub unresolved: usize,
    pub by_source: BTreeMap<String, usize>,
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
}

const DIAGNOSTIC_COLUMNS: &str = "diagnostic_id, repo_id, source, severity, category, file_path, line_number, \
     column_number, title, description, code, suggestion, resolved, actionable, created_at, updated_at";

impl CentralHub {
    // ========== Diagnostics Operations ==========

    /// Upsert by diagnostic id. Pushing the same batch twice is a no-op.
    pub fn push_diagnostics(&self, diagnostics: &[UnifiedDiagnostic]) -> Result<usize> {
        self.ensure_writable()?;
        let tx = self.conn().unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                r#"
                INSERT INTO unified_diagnostics ({})
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                ON CONFLICT(diagnostic_id) DO UPDATE SET
                    repo_id = excluded.repo_id,
                    source = excluded.source,
                    severity = excluded.severity,
                    category = excluded.category,
                    file_path = excluded.file_path,
                    line_number = excluded.line_number,
                    column_number = excluded.column_number,
                    title = excluded.title,
                    description = excluded.description,
                    code = excluded.code,
                    suggestion = excluded.suggestion,
                    resolved = excluded.resolved,
                    actionable = excluded.actionable,
                    updated_at = excluded.updated_at
                "#,
                DIAGNOSTIC_COLUMNS
            ))?;
            for d in diagnostics {
                if d.diagnostic_id.is_empty() || d.repo_id.is_empty() {
                    return Err(Error::Validation("diagnostic needs an id and a repo".to_string()));
                }
                stmt.execute(params![
                    d.diagnostic_id,
                    d.repo_id,
                    d.source.as_str(),
                    d.severity.as_str(),
                    d.category.as_str(),
                    d.file_path,
                    d.line_number,
                    d.column_number,
                    d.title,
                    d.description,
                    d.code,
                    d.suggestion,
                    d.resolved,
                    d.actionable,
                    d.created_at.to_rfc3339(),
                    d.updated_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(count = diagnostics.len(), "Pushed diagnostics");
        Ok(diagnostics.len())
    }

    /// Delete matching diagnostics
    pub fn clear_diagnostics(&self, filter: &DiagnosticsFilter) -> Result<usize> {
        self.ensure_writable()?;
        let (clause, values) = filter.where_clause();
        let removed = self.conn().execute(
            &format!("DELETE FROM unified_diagnostics {}", clause),
            params_from_iter(values),
        )?;
        tracing::debug!(removed, "Cleared diagnostics");
        Ok(removed)
    }

    /// Mark diagnostics resolved; unknown ids are ignored
    pub fn resolve_diagnostics(&self, ids: &[String]) -> Result<usize> {
        self.ensure_writable()?;
        let now = Utc::now().to_rfc3339();
        let tx = self.conn().unchecked_transaction()?;
        let mut updated = 0;
        for id in ids {
            updated += tx.execute(
                "UPDATE unified_diagnostics SET resolved = 1, updated_at = ?1 WHERE diagnostic_id = ?2 AND resolved = 0",
                params![now, id],
            )?;
        }
        tx.commit()?;
        Ok(updated)
    }

    pub fn query_diagnostics(&self, filter: &DiagnosticsFilter) -> Result<Vec<UnifiedDiagnostic>> {
        let (clause, values) = filter.where_clause();
        let limit = filter.limit.map(|l| format!(" LIMIT {}", l)).unwrap_or_default();
        let sql = format!(
            "SELECT {} FROM unified_diagnostics {} \
             ORDER BY CASE severity WHEN 'critical' THEN 0 WHEN 'error' THEN 1 WHEN 'warning' THEN 2 \
             WHEN 'suggestion' THEN 3 ELSE 4 END, file_path, line_number, diagnostic_id{}",
            DIAGNOSTIC_COLUMNS, clause, limit
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), row_to_diagnostic)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Counts by source, severity and category of unresolved diagnostics
    pub fn diagnostics_summary(&self, repo_id: Option<&str>) -> Result<DiagnosticsSummary> {
        let filter = DiagnosticsFilter {
            repo_id: repo_id.map(str::to_string),
            ..DiagnosticsFilter::default()
        };
        let mut summary = DiagnosticsSummary::default();
        for d in self.query_diagnostics(&filter)? {
            summary.total += 1;
            if d.resolved {
                continue;
            }
            summary.unresolved += 1;
            *summary.by_source.entry(d.source.to_string()).or_default() += 1;
            *summary.by_severity.entry(d.severity.to_string()).or_default() += 1;
            *summary.by_category.entry(d.category.to_string()).or_default() += 1;
        }
        Ok(summary)
    }
}

fn parse_column<T: FromStr<Err = Error>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: Error| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_diagnostic(row: &Row) -> rusqlite::Result<UnifiedDiagnostic> {
    Ok(UnifiedDiagnostic {
        diagnostic_id: row.get(0)?,
        repo_id: row.get(1)?,
        source: parse_column(row, 2)?,
        severity: parse_column(row, 3)?,
        category: parse_column(row, 4)?,
        file_path: row.get(5)?,
        line_number: row.get(6)?,
        column_number: row.get(7)?,
        title: row.get(8)?,
        description: row.get(9)?,
        code: row.get(10)?,
        suggestion: row.get(11)?,
        resolved: row.get(12)?,
        actionable: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hub() -> (TempDir, CentralHub) {
        let dir = TempDir::new().unwrap();
        let hub = CentralHub::create(&dir.path().join("central.db")).unwrap();
        (dir, hub)
    }

    fn tsc_error(id: &str, repo: &str) -> UnifiedDiagnostic {
        UnifiedDiagnostic::new(
            id,
            repo,
            DiagnosticSource::Tsc,
            DiagnosticSeverity::Error,
            DiagnosticCategory::Compilation,
            "Type 'string' is not assignable to type 'number'",
        )
        .at("src/a.ts", 3, 7)
        .with_code("TS2322")
    }

    #[test]
    fn test_push_is_idempotent_upsert() {
        let (_dir, hub) = hub();
        let batch = vec![tsc_error("d1", "app"), tsc_error("d2", "app")];
        hub.push_diagnostics(&batch).unwrap();
        hub.push_diagnostics(&batch).unwrap();
        assert_eq!(hub.query_diagnostics(&DiagnosticsFilter::default()).unwrap().len(), 2);

        let mut changed = tsc_error("d1", "app");
        changed.severity = DiagnosticSeverity::Warning;
        hub.push_diagnostics(&[changed]).unwrap();
        let d1 = hub
            .query_diagnostics(&DiagnosticsFilter::default())
            .unwrap()
            .into_iter()
            .find(|d| d.diagnostic_id == "d1")
            .unwrap();
        assert_eq!(d1.severity, DiagnosticSeverity::Warning);
        assert_eq!(d1.code.as_deref(), Some("TS2322"));
        assert_eq!(d1.line_number, Some(3));
    }

    #[test]
    fn test_filter_resolve_and_summary() {
        let (_dir, hub) = hub();
        let lint = UnifiedDiagnostic::new(
            "l1",
            "web",
            DiagnosticSource::Eslint,
            DiagnosticSeverity::Warning,
            DiagnosticCategory::Linting,
            "no-unused-vars",
        );
        hub.push_diagnostics(&[tsc_error("d1", "app"), tsc_error("d2", "app"), lint]).unwrap();

        let app = hub.query_diagnostics(&DiagnosticsFilter::for_repo("app")).unwrap();
        assert_eq!(app.len(), 2);
        let eslint = DiagnosticsFilter::default().with_source(DiagnosticSource::Eslint);
        assert_eq!(hub.query_diagnostics(&eslint).unwrap().len(), 1);

        assert_eq!(hub.resolve_diagnostics(&["d1".to_string(), "nope".to_string()]).unwrap(), 1);
        let summary = hub.diagnostics_summary(None).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.unresolved, 2);
        assert_eq!(summary.by_source.get("tsc"), Some(&1));
        assert_eq!(summary.by_severity.get("warning"), Some(&1));

        let open_app = DiagnosticsFilter::for_repo("app").unresolved();
        assert_eq!(hub.query_diagnostics(&open_app).unwrap().len(), 1);

        assert_eq!(hub.clear_diagnostics(&DiagnosticsFilter::for_repo("app")).unwrap(), 2);
        assert_eq!(hub.diagnostics_summary(Some("app")).unwrap().total, 0);
        assert_eq!(hub.status().unwrap().total_diagnostics, 1);
    }

    #[test]
    fn test_push_rejects_missing_id() {
        let (_dir, hub) = hub();
        let bad = tsc_error("", "app");
        assert!(matches!(hub.push_diagnostics(&[bad]), Err(Error::Validation(_))));
        assert!(hub.query_diagnostics(&DiagnosticsFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!("ci_check".parse::<DiagnosticSource>().unwrap(), DiagnosticSource::CiCheck);
        assert_eq!(
            serde_json::to_value(DiagnosticCategory::CodeReview).unwrap(),
            serde_json::json!("code_review")
        );
        assert!("bogus".parse::<DiagnosticSeverity>().is_err());
        assert_eq!(DiagnosticSource::all().len(), 8);
    }
}
