//! Central hub store
//!
//! The only type able to write `central.db`. Its writable constructor is
//! visible to the `hub` module tree alone; everything else reaches the hub
//! through [`super::HubRouter`] or [`super::HubServer`].

use super::manifest::{self, RepoManifest};
use super::schema::{self, HUB_SCHEMA_VERSION};
use super::types::{
    HubStatus, RefreshAllResult, RefreshOutcome, RefreshResult, RegisterResult, RepoError, RepoInfo, RepoStatus,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};
use std::path::{Path, PathBuf};

/// Handle on `central.db`
pub struct CentralHub {
    conn: Connection,
    path: PathBuf,
    writable: bool,
}

impl CentralHub {
    /// Create the hub file if missing and open it for writing
    pub(in crate::hub) fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        schema::validate(&conn, path)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            writable: true,
        })
    }

    /// Open an existing hub for writing. Callers must hold the hub lock.
    pub(in crate::hub) fn open_writable(path: &Path) -> Result<Self> {
        Self::open(path, true)
    }

    pub(in crate::hub) fn open_read_only(path: &Path) -> Result<Self> {
        Self::open(path, false)
    }

    fn open(path: &Path, writable: bool) -> Result<Self> {
        if !path.exists() {
            return Err(Error::NotFound(format!(
                "hub {} (run `devac init` first)",
                path.display()
            )));
        }
        let flags = if writable {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = Connection::open_with_flags(path, flags).map_err(|e| match e {
            rusqlite::Error::SqliteFailure(_, _) => Error::corrupt(path, e.to_string()),
            other => other.into(),
        })?;
        schema::validate(&conn, path).map_err(|e| match e {
            Error::Storage(inner) => Error::corrupt(path, inner.to_string()),
            other => other,
        })?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            writable,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub(in crate::hub) fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(in crate::hub) fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(Error::Validation(format!(
                "hub {} is open read-only",
                self.path.display()
            )))
        }
    }

    // ========== Repository Operations ==========

    /// Register a repository, or re-register it when its seeds changed
    pub fn register_repo(&self, repo_path: &Path) -> Result<RegisterResult> {
        self.ensure_writable()?;
        let root = canonical_repo(repo_path)?;
        let repo_id = manifest::repo_id_for(&root);

        let existing = self.get_repo(&repo_id)?;
        if let Some(repo) = &existing {
            if repo.status == RepoStatus::Active && repo.path == root {
                let packages = manifest::discover_packages(&root);
                let hash = manifest::content_hash(&root, &packages)?;
                if repo.content_hash.as_deref() == Some(hash.as_str()) {
                    tracing::info!(repo = %repo_id, "Repository unchanged, skipping registration");
                    let cached = self.get_manifest(&repo_id)?;
                    return Ok(RegisterResult {
                        repo_id,
                        packages: cached.map(|m| m.package_paths()).unwrap_or_default(),
                        cross_repo_edges: repo.cross_repo_edges,
                        skipped: true,
                    });
                }
            }
        }

        let manifest = manifest::compute_manifest(&repo_id, &root)?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| repo_id.clone());
        let registered_at = existing.map(|r| r.registered_at).unwrap_or_else(Utc::now);
        self.store_manifest(&root, &name, registered_at, &manifest)?;

        tracing::info!(
            repo = %repo_id,
            packages = manifest.packages.len(),
            cross_repo_edges = manifest.cross_repo_edges,
            "Registered repository"
        );
        Ok(RegisterResult {
            repo_id,
            packages: manifest.package_paths(),
            cross_repo_edges: manifest.cross_repo_edges,
            skipped: false,
        })
    }

    /// Mark a repository unregistered; its cached manifest is kept
    pub fn unregister_repo(&self, repo_id: &str) -> Result<()> {
        self.ensure_writable()?;
        let changed = self.conn.execute(
            "UPDATE repos SET status = ?1 WHERE repo_id = ?2",
            params![RepoStatus::Unregistered.as_str(), repo_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("repo {}", repo_id)));
        }
        tracing::info!(repo = %repo_id, "Unregistered repository");
        Ok(())
    }

    /// Recompute a manifest if the repo's seed content changed
    pub fn refresh_repo(&self, repo_id: &str) -> Result<RefreshResult> {
        self.ensure_writable()?;
        let repo = self
            .get_repo(repo_id)?
            .ok_or_else(|| Error::NotFound(format!("repo {}", repo_id)))?;
        if repo.status == RepoStatus::Unregistered {
            return Err(Error::Validation(format!("repo {} is unregistered", repo_id)));
        }

        if !repo.path.is_dir() {
            if repo.status != RepoStatus::Stale {
                self.conn.execute(
                    "UPDATE repos SET status = ?1 WHERE repo_id = ?2",
                    params![RepoStatus::Stale.as_str(), repo_id],
                )?;
            }
            tracing::warn!(repo = %repo_id, path = %repo.path.display(), "Repository path is gone, marked stale");
            return Ok(RefreshResult {
                repo_id: repo_id.to_string(),
                outcome: RefreshOutcome::Stale,
                packages: repo.package_count,
                cross_repo_edges: repo.cross_repo_edges,
            });
        }

        let packages = manifest::discover_packages(&repo.path);
        let hash = manifest::content_hash(&repo.path, &packages)?;
        if repo.status == RepoStatus::Active && repo.content_hash.as_deref() == Some(hash.as_str()) {
            tracing::info!(repo = %repo_id, "Seeds unchanged, skipping refresh");
            return Ok(RefreshResult {
                repo_id: repo_id.to_string(),
                outcome: RefreshOutcome::Skipped,
                packages: repo.package_count,
                cross_repo_edges: repo.cross_repo_edges,
            });
        }

        let manifest = manifest::compute_manifest(repo_id, &repo.path)?;
        self.store_manifest(&repo.path, &repo.name, repo.registered_at, &manifest)?;
        tracing::info!(repo = %repo_id, packages = manifest.packages.len(), "Refreshed repository manifest");

        Ok(RefreshResult {
            repo_id: repo_id.to_string(),
            outcome: RefreshOutcome::Refreshed,
            packages: manifest.packages.len(),
            cross_repo_edges: manifest.cross_repo_edges,
        })
    }

    /// Refresh every registered repository; one failure does not stop the rest
    pub fn refresh_all(&self) -> Result<RefreshAllResult> {
        self.ensure_writable()?;
        let mut result = RefreshAllResult::default();
        for repo in self.list_repos(false)? {
            match self.refresh_repo(&repo.repo_id) {
                Ok(refreshed) => result.results.push(refreshed),
                Err(e) => {
                    tracing::warn!(repo = %repo.repo_id, "Refresh failed: {}", e);
                    result.errors.push(RepoError {
                        repo_id: repo.repo_id,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    pub fn get_repo(&self, repo_id: &str) -> Result<Option<RepoInfo>> {
        self.conn
            .query_row(
                "SELECT repo_id, path, name, status, content_hash, package_count, cross_repo_edges,
                        registered_at, last_refreshed_at
                 FROM repos WHERE repo_id = ?1",
                [repo_id],
                row_to_repo,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn list_repos(&self, include_unregistered: bool) -> Result<Vec<RepoInfo>> {
        let sql = if include_unregistered {
            "SELECT repo_id, path, name, status, content_hash, package_count, cross_repo_edges,
                    registered_at, last_refreshed_at
             FROM repos ORDER BY repo_id"
        } else {
            "SELECT repo_id, path, name, status, content_hash, package_count, cross_repo_edges,
                    registered_at, last_refreshed_at
             FROM repos WHERE status != 'unregistered' ORDER BY repo_id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let repos = stmt.query_map([], row_to_repo)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(repos)
    }

    /// Cached manifest of a repository
    pub fn get_manifest(&self, repo_id: &str) -> Result<Option<RepoManifest>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT manifest FROM repo_manifests WHERE repo_id = ?1",
                [repo_id],
                |row| row.get(0),
            )
            .optional()?;
        raw.map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| Error::corrupt(&self.path, format!("manifest of {}: {}", repo_id, e)))
        })
        .transpose()
    }

    fn store_manifest(
        &self,
        root: &Path,
        name: &str,
        registered_at: DateTime<Utc>,
        manifest: &RepoManifest,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            r#"
            INSERT INTO repos (repo_id, path, name, status, content_hash, package_count, cross_repo_edges,
                               registered_at, last_refreshed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(repo_id) DO UPDATE SET
                path = excluded.path,
                name = excluded.name,
                status = excluded.status,
                content_hash = excluded.content_hash,
                package_count = excluded.package_count,
                cross_repo_edges = excluded.cross_repo_edges,
                last_refreshed_at = excluded.last_refreshed_at
            "#,
            params![
                manifest.repo_id,
                root.to_string_lossy(),
                name,
                RepoStatus::Active.as_str(),
                manifest.content_hash,
                manifest.packages.len() as i64,
                manifest.cross_repo_edges as i64,
                registered_at.to_rfc3339(),
                now,
            ],
        )?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO repo_manifests (repo_id, content_hash, manifest, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![
                manifest.repo_id,
                manifest.content_hash,
                serde_json::to_string(manifest)?,
                now,
            ],
        )?;
        tx.commit()?;

        manifest.write_to(root)?;
        Ok(())
    }

    // ========== Status ==========

    pub fn status(&self) -> Result<HubStatus> {
        let count_status = |status: RepoStatus| -> Result<usize> {
            let n: i64 = self.conn.query_row(
                "SELECT COUNT(*) FROM repos WHERE status = ?1",
                [status.as_str()],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        };
        let packages: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(package_count), 0) FROM repos WHERE status != 'unregistered'",
            [],
            |row| row.get(0),
        )?;
        let (total, open): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN resolved = 0 THEN 1 ELSE 0 END), 0) FROM unified_diagnostics",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(HubStatus {
            path: self.path.clone(),
            schema_version: HUB_SCHEMA_VERSION,
            repos_active: count_status(RepoStatus::Active)?,
            repos_stale: count_status(RepoStatus::Stale)?,
            repos_unregistered: count_status(RepoStatus::Unregistered)?,
            packages: packages as usize,
            open_diagnostics: open as usize,
            total_diagnostics: total as usize,
        })
    }
}

fn canonical_repo(path: &Path) -> Result<PathBuf> {
    let root = path
        .canonicalize()
        .map_err(|_| Error::NotFound(format!("repository {}", path.display())))?;
    if !root.is_dir() {
        return Err(Error::Validation(format!("{} is not a directory", root.display())));
    }
    Ok(root)
}

fn row_to_repo(row: &Row) -> rusqlite::Result<RepoInfo> {
    let status: String = row.get(3)?;
    let path: String = row.get(1)?;
    Ok(RepoInfo {
        repo_id: row.get(0)?,
        path: PathBuf::from(path),
        name: row.get(2)?,
        status: status.parse().map_err(|e: Error| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?,
        content_hash: row.get(4)?,
        package_count: row.get::<_, i64>(5)? as usize,
        cross_repo_edges: row.get::<_, i64>(6)? as usize,
        registered_at: row.get(7)?,
        last_refreshed_at: row.get(8)?,
    })
}
