use crate::hub::RepoInfo;
use crate::query::HitSummary;
use crate::storage::reader::QueryRow;
use crate::ui::output::repo_status;
use serde_json::Value;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct TableRow {
    #[tabled(rename = "Metric")]
    pub metric: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

#[derive(Default)]
pub struct TableBuilder {
    rows: Vec<TableRow>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_row(&mut self, label: &str, value: &str) {
        self.rows.push(TableRow {
            metric: label.to_string(),
            value: value.to_string(),
        });
    }

    pub fn build(&self) -> String {
        if self.rows.is_empty() {
            return String::new();
        }
        Table::new(&self.rows).with(Style::rounded()).to_string()
    }
}

pub fn stats_table(stats: &[(&str, &str)]) -> String {
    let mut builder = TableBuilder::new();
    for (label, value) in stats {
        builder.add_row(label, value);
    }
    builder.build()
}

#[derive(Tabled)]
struct RepoRow {
    #[tabled(rename = "Repo")]
    repo_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Packages")]
    packages: usize,
    #[tabled(rename = "Cross-repo edges")]
    cross_repo_edges: usize,
    #[tabled(rename = "Last refresh")]
    refreshed: String,
    #[tabled(rename = "Path")]
    path: String,
}

pub fn repos_table(repos: &[RepoInfo]) -> String {
    let rows: Vec<RepoRow> = repos
        .iter()
        .map(|r| RepoRow {
            repo_id: r.repo_id.clone(),
            status: repo_status(r.status),
            packages: r.package_count,
            cross_repo_edges: r.cross_repo_edges,
            refreshed: r
                .last_refreshed_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
            path: r.path.display().to_string(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

#[derive(Tabled)]
struct HitRow {
    #[tabled(rename = "Impact")]
    impact: &'static str,
    #[tabled(rename = "Depth")]
    depth: usize,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "File")]
    file: String,
}

pub fn hits_table(hits: &[HitSummary]) -> String {
    let rows: Vec<HitRow> = hits
        .iter()
        .map(|h| HitRow {
            impact: h.impact_level.as_str(),
            depth: h.depth,
            name: h.name.clone(),
            kind: h.kind.as_str(),
            file: h.file_path.clone(),
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

/// Ad-hoc query rows; columns in first-row order
pub fn rows_table(rows: &[QueryRow]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let columns: Vec<String> = first.keys().cloned().collect();

    let mut builder = Builder::default();
    builder.push_record(columns.clone());
    for row in rows {
        builder.push_record(columns.iter().map(|c| cell(row.get(c))));
    }
    builder.build().with(Style::rounded()).to_string()
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
