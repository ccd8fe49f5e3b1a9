//! Repository manifests
//!
//! A manifest summarises the seeds of one repository: which packages carry a
//! seed, their branches and row counts, and how many edges leave the package
//! or the repository. It is derived data, recomputed only when the content
//! hash over the repo's seed files changes.

use crate::edge::Edge;
use crate::identity::{EntityId, normalize_package};
use crate::storage::atomic::write_atomic;
use crate::storage::paths::{DEVAC_DIR, SEED_DIR, list_branches, live_seed_files};
use crate::storage::{RowCounts, SeedReader};
use crate::{DEFAULT_BRANCH, Result};
use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Directories never searched for packages
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", "dist", "build", ".venv"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    /// Repo-relative path, `.` for the root package
    pub path: String,
    pub branches: Vec<String>,
    /// Live rows on the base branch
    pub row_counts: RowCounts,
    pub unresolved_refs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoManifest {
    pub repo_id: String,
    pub content_hash: String,
    pub packages: Vec<PackageManifest>,
    /// Edges whose target lives in another repository
    pub cross_repo_edges: usize,
    /// Edges whose target lives in another package of this repository
    pub cross_package_edges: usize,
    pub generated_at: DateTime<Utc>,
}

impl RepoManifest {
    pub fn package_paths(&self) -> Vec<String> {
        self.packages.iter().map(|p| p.path.clone()).collect()
    }

    /// Write to `<repo>/.devac/manifest.json`
    pub fn write_to(&self, repo_root: &Path) -> Result<PathBuf> {
        let path = repo_root.join(DEVAC_DIR).join(MANIFEST_FILE);
        write_atomic(&path, &serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

/// Stable repo id: the normalised `origin` remote, else the directory name
pub fn repo_id_for(repo_root: &Path) -> String {
    if let Some(url) = origin_url(repo_root) {
        let id = normalize_remote(&url);
        if !id.is_empty() {
            return id;
        }
    }
    repo_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "repo".to_string())
}

fn origin_url(repo_root: &Path) -> Option<String> {
    let config = fs::read_to_string(repo_root.join(".git").join("config")).ok()?;
    let mut in_origin = false;
    for line in config.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_origin = line == r#"[remote "origin"]"#;
            continue;
        }
        if in_origin {
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "url" {
                    return Some(value.trim().to_string());
                }
            }
        }
    }
    None
}

/// `git@github.com:acme/app.git` and `https://github.com/acme/app` both
/// become `github.com/acme/app`.
pub fn normalize_remote(url: &str) -> String {
    let mut rest = url.trim();
    if let Some((_, after)) = rest.split_once("://") {
        rest = after;
    }
    if let Some((user, after)) = rest.split_once('@') {
        if !user.contains('/') {
            rest = after;
        }
    }
    let rest = rest.trim_end_matches('/');
    let rest = rest.strip_suffix(".git").unwrap_or(rest);

    // scp-like `host:org/repo`
    let joined = match rest.split_once(':') {
        Some((host, path)) if !path.starts_with(|c: char| c.is_ascii_digit()) => {
            format!("{}/{}", host, path)
        }
        Some((host, path)) => {
            // `host:port/org/repo`
            let path = path.split_once('/').map(|(_, p)| p).unwrap_or("");
            format!("{}/{}", host, path)
        }
        None => rest.to_string(),
    };
    joined.trim_matches('/').to_string()
}

/// Package roots under `repo_root` that hold a seed
pub fn discover_packages(repo_root: &Path) -> Vec<PathBuf> {
    let mut builder = WalkBuilder::new(repo_root);
    // seeds are usually gitignored and always hidden
    builder
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !SKIP_DIRS.contains(&name.as_ref())
        });

    let mut packages: Vec<PathBuf> = builder
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_dir()))
        .filter(|entry| {
            entry.file_name() == SEED_DIR
                && entry.path().parent().and_then(|p| p.file_name()).is_some_and(|n| n == DEVAC_DIR)
        })
        .filter_map(|entry| entry.path().parent()?.parent().map(Path::to_path_buf))
        .collect();

    packages.sort();
    packages.dedup();
    packages
}

/// blake3 over the live seed files of every package.
///
/// Only `meta.json` and the generations it names count, so lock files,
/// superseded generations and leftovers of an interrupted write never change
/// the hash.
pub fn content_hash(repo_root: &Path, packages: &[PathBuf]) -> Result<String> {
    let mut files = Vec::new();
    for package in packages {
        files.extend(live_seed_files(package)?);
    }
    files.sort();

    let mut hasher = blake3::Hasher::new();
    for file in &files {
        let relative = file.strip_prefix(repo_root).unwrap_or(file);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update(&[0]);
        hasher.update(&fs::read(file)?);
        hasher.update(&[0]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute the manifest of a repository from its seeds
pub fn compute_manifest(repo_id: &str, repo_root: &Path) -> Result<RepoManifest> {
    let package_roots = discover_packages(repo_root);
    let content_hash = content_hash(repo_root, &package_roots)?;

    let mut packages = Vec::with_capacity(package_roots.len());
    let mut cross_repo_edges = 0;
    let mut cross_package_edges = 0;

    for root in &package_roots {
        let relative = root.strip_prefix(repo_root).unwrap_or(root);
        let reader = SeedReader::open(root, DEFAULT_BRANCH);

        let mut row_counts = RowCounts::default();
        let mut unresolved_refs = 0;
        if reader.exists() {
            let edges = reader.edges()?;
            row_counts = RowCounts {
                nodes: reader.nodes()?.len(),
                edges: edges.len(),
                external_refs: reader.external_refs()?.len(),
                effects: reader.effects()?.len(),
            };
            unresolved_refs = reader.get_unresolved_refs(DEFAULT_BRANCH)?.len();

            for edge in &edges {
                match edge_scope(edge) {
                    EdgeScope::CrossRepo => cross_repo_edges += 1,
                    EdgeScope::CrossPackage => cross_package_edges += 1,
                    EdgeScope::Local => {}
                }
            }
        }

        packages.push(PackageManifest {
            path: normalize_package(&relative.to_string_lossy()),
            branches: list_branches(root)?,
            row_counts,
            unresolved_refs,
        });
    }

    Ok(RepoManifest {
        repo_id: repo_id.to_string(),
        content_hash,
        packages,
        cross_repo_edges,
        cross_package_edges,
        generated_at: Utc::now(),
    })
}

enum EdgeScope {
    Local,
    CrossPackage,
    CrossRepo,
}

fn edge_scope(edge: &Edge) -> EdgeScope {
    if edge.is_unresolved() {
        return EdgeScope::Local;
    }
    match (EntityId::parse(&edge.source_entity_id), EntityId::parse(&edge.target_entity_id)) {
        (Ok(source), Ok(target)) if target.is_cross_repo(&source.repo) => EdgeScope::CrossRepo,
        (Ok(source), Ok(target)) if source.package != target.package => EdgeScope::CrossPackage,
        _ => EdgeScope::Local,
    }
}
