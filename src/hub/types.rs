//! Hub result types shared by the store, the router and the wire protocol

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoStatus {
    Active,
    /// Registered path no longer exists
    Stale,
    Unregistered,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Active => "active",
            RepoStatus::Stale => "stale",
            RepoStatus::Unregistered => "unregistered",
        }
    }
}

impl FromStr for RepoStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(RepoStatus::Active),
            "stale" => Ok(RepoStatus::Stale),
            "unregistered" => Ok(RepoStatus::Unregistered),
            _ => Err(Error::Validation(format!("Unknown repo status: {}", s))),
        }
    }
}

/// A registered repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub repo_id: String,
    pub path: PathBuf,
    pub name: String,
    pub status: RepoStatus,
    pub content_hash: Option<String>,
    pub package_count: usize,
    pub cross_repo_edges: usize,
    pub registered_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResult {
    pub repo_id: String,
    /// Repo-relative package paths
    pub packages: Vec<String>,
    pub cross_repo_edges: usize,
    /// Registration was already current; nothing was written
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    Refreshed,
    /// Seed content hash unchanged
    Skipped,
    /// Repo path is gone
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResult {
    pub repo_id: String,
    pub outcome: RefreshOutcome,
    pub packages: usize,
    pub cross_repo_edges: usize,
}

/// A per-repo failure inside a bulk operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoError {
    pub repo_id: String,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshAllResult {
    pub results: Vec<RefreshResult>,
    pub errors: Vec<RepoError>,
}

impl RefreshAllResult {
    pub fn count(&self, outcome: RefreshOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStatus {
    pub path: PathBuf,
    pub schema_version: u32,
    pub repos_active: usize,
    pub repos_stale: usize,
    pub repos_unregistered: usize,
    pub packages: usize,
    pub open_diagnostics: usize,
    pub total_diagnostics: usize,
}

impl HubStatus {
    pub fn repos_total(&self) -> usize {
        self.repos_active + self.repos_stale + self.repos_unregistered
    }
}
