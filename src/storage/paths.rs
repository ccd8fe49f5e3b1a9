//! On-disk layout of a seed
//!
//! ```text
//! <package>/.devac/seed/<branch-dir>/meta.json
//!                                   /gen-000007/nodes.db
//!                                              /edges.db
//!                                              /external_refs.db
//!                                              /effects.db
//! <package>/.devac/seed/<branch-dir>.lock
//! ```
//!
//! `meta.json` names the live generation. Generations are never modified
//! once `meta.json` points at them.

use super::meta::SeedMeta;
use super::schema::SeedTable;
use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEVAC_DIR: &str = ".devac";
pub const SEED_DIR: &str = "seed";
pub const META_FILE: &str = "meta.json";
pub const GENERATION_PREFIX: &str = "gen-";

/// Hex characters of the branch-name digest in a branch directory name
const BRANCH_HASH_LEN: usize = 16;

/// Paths of one (package, branch) seed partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPaths {
    package_root: PathBuf,
    branch: String,
}

impl SeedPaths {
    pub fn new(package_root: impl Into<PathBuf>, branch: &str) -> Self {
        Self {
            package_root: package_root.into(),
            branch: branch.to_string(),
        }
    }

    pub fn package_root(&self) -> &Path {
        &self.package_root
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// `<package>/.devac/seed`
    pub fn seed_root(&self) -> PathBuf {
        seed_root(&self.package_root)
    }

    /// Directory holding the branch's generations; also the lock target
    pub fn branch_dir(&self) -> PathBuf {
        self.seed_root().join(branch_dir_name(&self.branch))
    }

    pub fn generation_dir(&self, generation: u64) -> PathBuf {
        self.branch_dir().join(generation_name(generation))
    }

    pub fn table_path(&self, generation: u64, table: SeedTable) -> PathBuf {
        self.generation_dir(generation).join(table.file_name())
    }

    pub fn meta_path(&self) -> PathBuf {
        self.branch_dir().join(META_FILE)
    }
}

pub fn seed_root(package_root: &Path) -> PathBuf {
    package_root.join(DEVAC_DIR).join(SEED_DIR)
}

/// Whether `package_root` carries any seed
pub fn has_seed(package_root: &Path) -> bool {
    seed_root(package_root).is_dir()
}

pub fn generation_name(generation: u64) -> String {
    format!("{}{:06}", GENERATION_PREFIX, generation)
}

/// Generation number of a `gen-NNNNNN` directory name
pub fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(GENERATION_PREFIX)?.parse().ok()
}

/// Directory name of a branch.
///
/// Names made only of `[a-z0-9._-]` are used as is. Any other name is
/// reduced to that alphabet and suffixed with `~` and a blake3 digest of the
/// raw name, so two branches never share a directory. `~` never occurs in an
/// unsuffixed name.
pub fn branch_dir_name(branch: &str) -> String {
    let readable: String = branch
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '_',
        })
        .collect();
    if readable == branch && !matches!(branch, "" | "." | "..") {
        return readable;
    }

    let digest = blake3::hash(branch.as_bytes()).to_hex();
    format!("{}~{}", readable, &digest.as_str()[..BRANCH_HASH_LEN])
}

/// Branches committed under a package's seed root, by their real names
pub fn list_branches(package_root: &Path) -> Result<Vec<String>> {
    let root = seed_root(package_root);
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut branches = Vec::new();
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(meta) = SeedMeta::read(&entry.path().join(META_FILE))? {
            branches.push(meta.branch);
        }
    }
    branches.sort();
    Ok(branches)
}

/// `meta.json` and the live generation's tables of every branch.
///
/// Superseded generations and unreferenced leftovers of interrupted writes
/// are not included.
pub fn live_seed_files(package_root: &Path) -> Result<Vec<PathBuf>> {
    let root = seed_root(package_root);
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(&root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let meta_path = entry.path().join(META_FILE);
        let Some(meta) = SeedMeta::read(&meta_path)? else {
            continue;
        };
        files.push(meta_path);
        let generation = entry.path().join(generation_name(meta.generation));
        for table in SeedTable::all() {
            let path = generation.join(table.file_name());
            if path.is_file() {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::meta::RowCounts;
    use tempfile::TempDir;

    fn commit_meta(package: &Path, branch: &str, generation: u64) {
        let paths = SeedPaths::new(package, branch);
        fs::create_dir_all(paths.generation_dir(generation)).unwrap();
        fs::write(paths.table_path(generation, SeedTable::Nodes), b"rows").unwrap();
        SeedMeta::new(branch, RowCounts::default(), generation)
            .stage(&paths.meta_path())
            .unwrap()
            .commit()
            .unwrap();
    }

    #[test]
    fn test_layout() {
        let paths = SeedPaths::new("/repo/pkg", "base");
        assert_eq!(paths.branch_dir(), PathBuf::from("/repo/pkg/.devac/seed/base"));
        assert_eq!(
            paths.table_path(7, SeedTable::ExternalRefs),
            PathBuf::from("/repo/pkg/.devac/seed/base/gen-000007/external_refs.db")
        );
        assert_eq!(paths.meta_path(), PathBuf::from("/repo/pkg/.devac/seed/base/meta.json"));
        assert_eq!(parse_generation("gen-000007"), Some(7));
        assert_eq!(parse_generation("gen-x"), None);
        assert_eq!(parse_generation("meta.json"), None);
    }

    #[test]
    fn test_branch_dir_names_never_collide() {
        assert_eq!(branch_dir_name("release-1.2"), "release-1.2");
        assert_eq!(branch_dir_name("feature_x"), "feature_x");

        let slash = branch_dir_name("feature/x");
        assert!(slash.starts_with("feature_x~"));
        assert_ne!(slash, branch_dir_name("feature_x"));
        assert_ne!(slash, branch_dir_name("feature:x"));
        assert_ne!(branch_dir_name("Main"), branch_dir_name("main"));

        for odd in ["", ".", ".."] {
            let name = branch_dir_name(odd);
            assert!(name.contains('~'));
            assert!(!matches!(name.as_str(), "" | "." | ".."));
        }
    }

    #[test]
    fn test_list_branches_reports_real_names() {
        let dir = TempDir::new().unwrap();
        assert!(list_branches(dir.path()).unwrap().is_empty());

        commit_meta(dir.path(), "base", 1);
        commit_meta(dir.path(), "feat/x", 3);
        // never committed
        fs::create_dir_all(SeedPaths::new(dir.path(), "draft").branch_dir()).unwrap();
        fs::write(seed_root(dir.path()).join("base.lock"), b"{}").unwrap();

        assert_eq!(list_branches(dir.path()).unwrap(), vec!["base", "feat/x"]);
        assert!(has_seed(dir.path()));
    }

    #[test]
    fn test_live_seed_files_skip_old_generations() {
        let dir = TempDir::new().unwrap();
        commit_meta(dir.path(), "base", 1);
        commit_meta(dir.path(), "base", 2);

        let paths = SeedPaths::new(dir.path(), "base");
        assert_eq!(
            live_seed_files(dir.path()).unwrap(),
            vec![paths.table_path(2, SeedTable::Nodes), paths.meta_path()]
        );
    }
}
