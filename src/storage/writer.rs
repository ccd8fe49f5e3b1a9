//! Seed writer - merge-and-replace under the branch lock
//!
//! Every write follows the same sequence:
//! 1. acquire the branch lock (`Locked` if busy)
//! 2. read the live generation (`Corrupt` aborts with nothing changed)
//! 3. drop the rows originating from the target files
//! 4. append the new rows
//! 5. build the next generation: changed tables are written, unchanged ones
//!    are linked from the live generation
//! 6. rename a new `meta.json` into place, publishing the generation
//! 7. release the lock and prune old generations
//!
//! Step 6 is the only rename readers can observe. A failure at or before it
//! leaves the live generation and `meta.json` exactly as they were.

use super::atomic::StagedDir;
use super::meta::{RowCounts, SeedMeta};
use super::paths::{SeedPaths, parse_generation};
use super::schema::SeedTable;
use super::table;
use super::{ParseResult, TableCounts, WriteResult};
use crate::edge::Edge;
use crate::effect::Effect;
use crate::identity::{EntityId, normalize_path};
use crate::lock::{LockManager, LockOptions};
use crate::node::Node;
use crate::reference::{ExternalRef, RefKey, RefResolution};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Called once the next generation and `meta.json` are staged, before the
/// publishing rename. Returning an error aborts the write.
pub type PreCommitHook = Box<dyn Fn(&Path) -> Result<()> + Send + Sync>;

/// Rows of the live generation of one seed branch.
#[derive(Debug, Default)]
struct SeedTables {
    /// `None` before the first write
    generation: Option<u64>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    external_refs: Vec<ExternalRef>,
    effects: Vec<Effect>,
}

impl SeedTables {
    fn load(paths: &SeedPaths) -> Result<Self> {
        let Some(meta) = SeedMeta::read(&paths.meta_path())? else {
            return Ok(Self::default());
        };
        let generation = meta.generation;
        Ok(Self {
            generation: Some(generation),
            nodes: table::read_rows(&paths.table_path(generation, SeedTable::Nodes))?,
            edges: table::read_rows(&paths.table_path(generation, SeedTable::Edges))?,
            external_refs: table::read_rows(&paths.table_path(generation, SeedTable::ExternalRefs))?,
            effects: table::read_rows(&paths.table_path(generation, SeedTable::Effects))?,
        })
    }

    fn row_counts(&self) -> RowCounts {
        RowCounts {
            nodes: self.nodes.len(),
            edges: self.edges.len(),
            external_refs: self.external_refs.len(),
            effects: self.effects.len(),
        }
    }
}

/// Writes one (package, branch) seed.
pub struct SeedWriter {
    paths: SeedPaths,
    lock_options: LockOptions,
    pre_commit: Option<PreCommitHook>,
}

impl SeedWriter {
    pub fn new(package_root: impl Into<PathBuf>, branch: &str) -> Self {
        Self {
            paths: SeedPaths::new(package_root, branch),
            lock_options: LockOptions::default().with_holder("seed-writer"),
            pre_commit: None,
        }
    }

    pub fn with_lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    pub fn with_pre_commit_hook(
        mut self,
        hook: impl Fn(&Path) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.pre_commit = Some(Box::new(hook));
        self
    }

    pub fn paths(&self) -> &SeedPaths {
        &self.paths
    }

    /// Replace everything the seed knows about `file_paths` with `parse`.
    ///
    /// Every row in `parse` must originate from one of `file_paths`. Nodes
    /// and effects whose key is re-supplied are replaced even when they were
    /// previously recorded under another file.
    pub fn update_file<S: AsRef<str>>(&self, file_paths: &[S], parse: &ParseResult) -> Result<WriteResult> {
        let files = target_files(file_paths)?;
        let now = Utc::now();
        let incoming = self.prepare(parse, &files, now)?;

        let lock = LockManager::acquire(&self.paths.branch_dir(), &self.lock_options)?;
        let mut tables = SeedTables::load(&self.paths)?;
        let branch = self.paths.branch();

        let node_ids: HashSet<String> = incoming.nodes.iter().map(|n| n.entity_id.clone()).collect();
        let effect_ids: HashSet<String> = incoming.effects.iter().map(|e| e.effect_id.clone()).collect();

        let mut result = WriteResult {
            branch: branch.to_string(),
            files: files.iter().cloned().collect(),
            ..Default::default()
        };
        result.nodes = merge(&mut tables.nodes, incoming.nodes, |n| {
            n.branch == branch && (files.contains(&n.file_path) || node_ids.contains(&n.entity_id))
        });
        result.edges = merge(&mut tables.edges, incoming.edges, |e| {
            e.branch == branch && files.contains(&e.source_file_path)
        });
        result.external_refs = merge(&mut tables.external_refs, incoming.external_refs, |r| {
            r.branch == branch && files.contains(&r.source_file_path)
        });
        result.effects = merge(&mut tables.effects, incoming.effects, |e| {
            e.branch == branch && (files.contains(&e.source_file_path) || effect_ids.contains(&e.effect_id))
        });

        self.commit(&tables, &dirty_tables(&result))?;
        lock.release()?;

        tracing::info!(
            branch = %branch,
            files = result.files.len(),
            nodes = result.nodes.inserted,
            edges = result.edges.inserted,
            refs = result.external_refs.inserted,
            effects = result.effects.inserted,
            "Updated seed {}",
            self.paths.package_root().display()
        );
        Ok(result)
    }

    /// Forget `file_paths`.
    ///
    /// Edge, ref and effect rows originating from the files are removed.
    /// Nodes from the files that surviving edges or refs still point at are
    /// kept with `is_deleted = true`; the rest are removed.
    pub fn delete_file<S: AsRef<str>>(&self, file_paths: &[S]) -> Result<WriteResult> {
        let files = target_files(file_paths)?;
        let now = Utc::now();

        let lock = LockManager::acquire(&self.paths.branch_dir(), &self.lock_options)?;
        let mut tables = SeedTables::load(&self.paths)?;
        let branch = self.paths.branch();

        let mut result = WriteResult {
            branch: branch.to_string(),
            files: files.iter().cloned().collect(),
            ..Default::default()
        };
        result.edges = merge(&mut tables.edges, Vec::new(), |e| {
            e.branch == branch && files.contains(&e.source_file_path)
        });
        result.external_refs = merge(&mut tables.external_refs, Vec::new(), |r| {
            r.branch == branch && files.contains(&r.source_file_path)
        });
        result.effects = merge(&mut tables.effects, Vec::new(), |e| {
            e.branch == branch && files.contains(&e.source_file_path)
        });

        let referenced: HashSet<&str> = tables
            .edges
            .iter()
            .filter(|e| !e.is_deleted)
            .flat_map(|e| [e.source_entity_id.as_str(), e.target_entity_id.as_str()])
            .chain(
                tables
                    .external_refs
                    .iter()
                    .filter(|r| !r.is_deleted)
                    .filter_map(|r| r.target_entity_id.as_deref()),
            )
            .collect();

        let before = tables.nodes.len();
        let mut soft_deleted = 0;
        tables.nodes.retain_mut(|n| {
            if n.branch != branch || !files.contains(&n.file_path) {
                return true;
            }
            if !referenced.contains(n.entity_id.as_str()) {
                return false;
            }
            if !n.is_deleted {
                n.is_deleted = true;
                n.updated_at = now;
                soft_deleted += 1;
            }
            true
        });
        result.nodes = TableCounts {
            inserted: 0,
            removed: before - tables.nodes.len(),
            soft_deleted,
            total: tables.nodes.len(),
        };

        self.commit(&tables, &dirty_tables(&result))?;
        lock.release()?;

        tracing::info!(
            branch = %branch,
            files = result.files.len(),
            removed_nodes = result.nodes.removed,
            soft_deleted,
            "Deleted files from seed {}",
            self.paths.package_root().display()
        );
        Ok(result)
    }

    /// Write back targets found by the external resolution pass.
    ///
    /// Returns the number of refs that changed. Unknown keys are ignored.
    pub fn update_resolved_refs(&self, resolutions: &[RefResolution]) -> Result<usize> {
        if resolutions.is_empty() {
            return Ok(0);
        }
        for resolution in resolutions {
            EntityId::parse(&resolution.target_entity_id)?;
        }

        let lock = LockManager::acquire(&self.paths.branch_dir(), &self.lock_options)?;
        let mut tables = SeedTables::load(&self.paths)?;
        let branch = self.paths.branch();
        let now = Utc::now();

        let targets: HashMap<&RefKey, &str> = resolutions
            .iter()
            .map(|r| (&r.key, r.target_entity_id.as_str()))
            .collect();

        let mut updated = 0;
        for r in tables.external_refs.iter_mut().filter(|r| r.branch == branch) {
            let Some(target) = targets.get(&r.ref_key()) else {
                continue;
            };
            if r.is_resolved && r.target_entity_id.as_deref() == Some(*target) {
                continue;
            }
            r.target_entity_id = Some(target.to_string());
            r.is_resolved = true;
            r.updated_at = now;
            updated += 1;
        }

        if updated > 0 {
            self.commit(&tables, &BTreeSet::from([SeedTable::ExternalRefs]))?;
        }
        lock.release()?;

        tracing::debug!(updated, "Resolved refs in seed {}", self.paths.package_root().display());
        Ok(updated)
    }

    /// Validate and stamp incoming rows.
    fn prepare(&self, parse: &ParseResult, files: &BTreeSet<String>, now: DateTime<Utc>) -> Result<ParseResult> {
        let branch = self.paths.branch();
        let owned_file = |kind: &str, file: &str| -> Result<String> {
            let file = normalize_path(file);
            if files.contains(&file) {
                Ok(file)
            } else {
                Err(Error::Validation(format!(
                    "{} row originates from '{}', which is not a target file",
                    kind, file
                )))
            }
        };

        let mut nodes = Vec::with_capacity(parse.nodes.len());
        for node in &parse.nodes {
            EntityId::parse(&node.entity_id)?;
            node.properties.validate()?;
            nodes.push(Node {
                file_path: owned_file("node", &node.file_path)?,
                branch: branch.to_string(),
                is_deleted: false,
                updated_at: now,
                ..node.clone()
            });
        }

        let mut edges = Vec::with_capacity(parse.edges.len());
        for edge in &parse.edges {
            edge.properties.validate()?;
            edges.push(Edge {
                source_file_path: owned_file("edge", &edge.source_file_path)?,
                branch: branch.to_string(),
                is_deleted: false,
                updated_at: now,
                ..edge.clone()
            });
        }

        let mut external_refs = Vec::with_capacity(parse.external_refs.len());
        for r in &parse.external_refs {
            external_refs.push(ExternalRef {
                source_file_path: owned_file("external ref", &r.source_file_path)?,
                is_resolved: r.target_entity_id.is_some(),
                branch: branch.to_string(),
                is_deleted: false,
                updated_at: now,
                ..r.clone()
            });
        }

        let mut effects = Vec::with_capacity(parse.effects.len());
        for effect in &parse.effects {
            if effect.effect_id.is_empty() {
                return Err(Error::Validation("effect without effect_id".to_string()));
            }
            effect.properties.validate()?;
            effects.push(Effect {
                source_file_path: owned_file("effect", &effect.source_file_path)?,
                branch: branch.to_string(),
                is_deleted: false,
                updated_at: now,
                ..effect.clone()
            });
        }

        Ok(ParseResult {
            nodes: dedup_last(nodes, |n| n.entity_id.clone()),
            edges,
            external_refs,
            effects: dedup_last(effects, |e| e.effect_id.clone()),
        })
    }

    fn commit(&self, tables: &SeedTables, dirty: &BTreeSet<SeedTable>) -> Result<()> {
        if dirty.is_empty() {
            return Ok(());
        }

        let generation = tables.generation.map_or(1, |live| live + 1);
        let staged = StagedDir::create(&self.paths.generation_dir(generation))?;
        for seed_table in SeedTable::all() {
            let target = staged.path().join(seed_table.file_name());
            if dirty.contains(seed_table) {
                match seed_table {
                    SeedTable::Nodes => table::write_rows(&target, &tables.nodes)?,
                    SeedTable::Edges => table::write_rows(&target, &tables.edges)?,
                    SeedTable::ExternalRefs => table::write_rows(&target, &tables.external_refs)?,
                    SeedTable::Effects => table::write_rows(&target, &tables.effects)?,
                }
            } else if let Some(live) = tables.generation {
                carry_over(&self.paths.table_path(live, *seed_table), &target)?;
            }
        }
        staged.sync()?;

        let meta = SeedMeta::new(self.paths.branch(), tables.row_counts(), generation)
            .stage(&self.paths.meta_path())?;

        if let Some(hook) = &self.pre_commit {
            hook(&self.paths.branch_dir())?;
        }

        meta.commit()?;
        staged.keep();
        self.prune_generations(generation);
        Ok(())
    }

    /// Remove every generation but `live` and the one before it, which a
    /// reader may have resolved just before the commit.
    fn prune_generations(&self, live: u64) {
        let Ok(entries) = fs::read_dir(self.paths.branch_dir()) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(generation) = name.to_str().and_then(parse_generation) else {
                continue;
            };
            if generation == live || generation + 1 == live {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                tracing::debug!(generation, "Failed to prune seed generation: {}", e);
            }
        }
    }
}

/// Generations are immutable, so an unchanged table is shared by hard link
fn carry_over(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        return Ok(());
    }
    if fs::hard_link(from, to).is_err() {
        fs::copy(from, to)?;
    }
    Ok(())
}

fn target_files<S: AsRef<str>>(file_paths: &[S]) -> Result<BTreeSet<String>> {
    let files: BTreeSet<String> = file_paths
        .iter()
        .map(|f| normalize_path(f.as_ref()))
        .filter(|f| !f.is_empty())
        .collect();
    if files.is_empty() {
        return Err(Error::Validation("no target files given".to_string()));
    }
    Ok(files)
}

/// Drop rows matching `remove`, then append `incoming`.
fn merge<T>(existing: &mut Vec<T>, incoming: Vec<T>, remove: impl Fn(&T) -> bool) -> TableCounts {
    let before = existing.len();
    existing.retain(|row| !remove(row));
    let removed = before - existing.len();
    let inserted = incoming.len();
    existing.extend(incoming);
    TableCounts {
        inserted,
        removed,
        soft_deleted: 0,
        total: existing.len(),
    }
}

/// Keep the last row for every key, preserving order.
fn dedup_last<T>(rows: Vec<T>, key: impl Fn(&T) -> String) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut kept: Vec<T> = rows.into_iter().rev().filter(|row| seen.insert(key(row))).collect();
    kept.reverse();
    kept
}

fn dirty_tables(result: &WriteResult) -> BTreeSet<SeedTable> {
    [
        (SeedTable::Nodes, result.nodes),
        (SeedTable::Edges, result.edges),
        (SeedTable::ExternalRefs, result.external_refs),
        (SeedTable::Effects, result.effects),
    ]
    .into_iter()
    .filter(|(_, counts)| counts.changed())
    .map(|(table, _)| table)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::EdgeType;
    use crate::effect::Effect;
    use crate::identity::generate_entity_id;
    use crate::node::NodeKind;
    use crate::properties::PropertyBag;
    use crate::storage::atomic::TEMP_SUFFIX;
    use crate::storage::paths::list_branches;
    use crate::storage::reader::SeedReader;
    use crate::DEFAULT_BRANCH;
    use tempfile::TempDir;

    fn node(file: &str, name: &str) -> Node {
        let id = generate_entity_id("acme", ".", NodeKind::Function, file, name);
        Node::new(id.to_string(), name, NodeKind::Function, file, 1, 5)
    }

    fn calls(from: &Node, to: &Node) -> Edge {
        Edge::new(&from.entity_id, &to.entity_id, EdgeType::Calls, &from.file_path)
    }

    /// Every file under `dir` with its content
    fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
        fn walk(dir: &Path, out: &mut Vec<(PathBuf, Vec<u8>)>) {
            for entry in fs::read_dir(dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    walk(&path, out);
                } else {
                    out.push((path.clone(), fs::read(&path).unwrap()));
                }
            }
        }
        let mut files = Vec::new();
        walk(dir, &mut files);
        files.sort();
        files
    }

    fn node_names(dir: &Path, branch: &str) -> Vec<String> {
        SeedReader::open(dir, branch).nodes().unwrap().into_iter().map(|n| n.name).collect()
    }

    #[test]
    fn test_update_then_read() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let f1 = node("src/a.ts", "f1");
        let f2 = node("src/a.ts", "f2");

        let result = writer
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([f1.clone(), f2.clone()]).with_edges([calls(&f1, &f2)]))
            .unwrap();
        assert_eq!(result.nodes.inserted, 2);
        assert_eq!(result.edges.total, 1);

        let reader = SeedReader::open(dir.path(), DEFAULT_BRANCH);
        assert_eq!(reader.nodes().unwrap().len(), 2);
        assert_eq!(reader.meta().unwrap().unwrap().row_counts.edges, 1);
        assert!(!LockManager::lock_path(&writer.paths().branch_dir()).exists());
    }

    #[test]
    fn test_update_replaces_only_target_files() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        writer.update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "old")])).unwrap();
        writer.update_file(&["src/b.ts"], &ParseResult::new().with_nodes([node("src/b.ts", "keep")])).unwrap();

        let result = writer
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "new")]))
            .unwrap();
        assert_eq!(result.nodes.removed, 1);
        assert_eq!(result.nodes.inserted, 1);

        let names: BTreeSet<String> = SeedReader::open(dir.path(), DEFAULT_BRANCH)
            .nodes()
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, BTreeSet::from(["keep".to_string(), "new".to_string()]));
    }

    #[test]
    fn test_resupplied_entity_moves_file() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let original = node("src/a.ts", "f");
        writer.update_file(&["src/a.ts"], &ParseResult::new().with_nodes([original.clone()])).unwrap();

        let mut moved = original.clone();
        moved.file_path = "src/b.ts".to_string();
        writer.update_file(&["src/b.ts"], &ParseResult::new().with_nodes([moved])).unwrap();

        let nodes = SeedReader::open(dir.path(), DEFAULT_BRANCH).nodes().unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].file_path, "src/b.ts");
    }

    #[test]
    fn test_rows_must_come_from_target_files() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let err = writer
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/other.ts", "f")]))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!SeedReader::open(dir.path(), DEFAULT_BRANCH).exists());
    }

    #[test]
    fn test_properties_validated_at_write() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let bad = node("src/a.ts", "f").with_properties(PropertyBag::new().with("colour", "red"));
        let err = writer.update_file(&["src/a.ts"], &ParseResult::new().with_nodes([bad])).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_failed_commit_leaves_seed_untouched() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let f1 = node("src/a.ts", "f1");
        writer.update_file(&["src/a.ts"], &ParseResult::new().with_nodes([f1.clone()])).unwrap();

        let branch_dir = writer.paths().branch_dir();
        let before = snapshot(&branch_dir);

        let failing = SeedWriter::new(dir.path(), DEFAULT_BRANCH).with_pre_commit_hook(|branch_dir| {
            // the next generation and the new meta.json are staged at this point
            assert!(branch_dir.join("gen-000002/nodes.db").exists());
            let staged_meta = fs::read_dir(branch_dir)
                .unwrap()
                .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
                .count();
            assert_eq!(staged_meta, 1);
            Err(Error::Io(std::io::Error::other("simulated crash")))
        });
        let f2 = node("src/a.ts", "f2");
        let err = failing
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([f2.clone()]).with_edges([calls(&f2, &f1)]))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        assert_eq!(snapshot(&branch_dir), before);
        assert!(!LockManager::lock_path(&branch_dir).exists());
    }

    #[test]
    fn test_failed_publish_keeps_live_generation() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let f1 = node("src/a.ts", "f1");
        writer.update_file(&["src/a.ts"], &ParseResult::new().with_nodes([f1.clone()])).unwrap();

        let branch_dir = writer.paths().branch_dir();
        let meta_path = writer.paths().meta_path();
        let parked = dir.path().join("meta.parked");
        let before = snapshot(&branch_dir);

        // a directory in place of meta.json makes the publishing rename fail
        let (meta_in_hook, parked_in_hook) = (meta_path.clone(), parked.clone());
        let failing = SeedWriter::new(dir.path(), DEFAULT_BRANCH).with_pre_commit_hook(move |_| {
            fs::rename(&meta_in_hook, &parked_in_hook)?;
            fs::create_dir_all(meta_in_hook.join("occupied"))?;
            Ok(())
        });
        let f2 = node("src/a.ts", "f2");
        let err = failing
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([f2.clone()]).with_edges([calls(&f2, &f1)]))
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        fs::remove_dir_all(&meta_path).unwrap();
        fs::rename(&parked, &meta_path).unwrap();
        assert_eq!(snapshot(&branch_dir), before);
        assert_eq!(node_names(dir.path(), DEFAULT_BRANCH), vec!["f1"]);
        assert!(SeedReader::open(dir.path(), DEFAULT_BRANCH).edges().unwrap().is_empty());
        assert!(!LockManager::lock_path(&branch_dir).exists());
    }

    #[test]
    fn test_generations_are_pruned() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        for name in ["a", "b", "c", "d"] {
            writer.update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", name)])).unwrap();
        }

        let mut generations: Vec<String> = fs::read_dir(writer.paths().branch_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("gen-"))
            .collect();
        generations.sort();
        assert_eq!(generations, vec!["gen-000003", "gen-000004"]);
        assert_eq!(node_names(dir.path(), DEFAULT_BRANCH), vec!["d"]);
    }

    #[test]
    fn test_unchanged_tables_carry_over() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let module = node("src/app.ts", "app");
        writer
            .update_file(
                &["src/app.ts"],
                &ParseResult::new()
                    .with_nodes([module.clone()])
                    .with_external_refs([ExternalRef::new(&module.entity_id, "./auth", "login", "src/app.ts")]),
            )
            .unwrap();

        // only the effects table changes
        let result = writer
            .update_file(
                &["src/other.ts"],
                &ParseResult::new().with_effects([Effect::call("e1", &module.entity_id, "src/other.ts", "fetch")]),
            )
            .unwrap();
        assert_eq!(dirty_tables(&result), BTreeSet::from([SeedTable::Effects]));

        let reader = SeedReader::open(dir.path(), DEFAULT_BRANCH);
        assert_eq!(reader.meta().unwrap().unwrap().generation, 2);
        assert_eq!(reader.nodes().unwrap().len(), 1);
        assert_eq!(reader.external_refs().unwrap().len(), 1);
        assert_eq!(reader.effects().unwrap().len(), 1);
    }

    #[test]
    fn test_busy_lock_is_reported() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        writer.update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "f1")])).unwrap();

        let held = LockManager::acquire(&writer.paths().branch_dir(), &LockOptions::default()).unwrap();
        let err = writer
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "f2")]))
            .unwrap_err();
        assert!(matches!(err, Error::Locked { .. }));
        drop(held);

        let names: Vec<String> = SeedReader::open(dir.path(), DEFAULT_BRANCH)
            .nodes()
            .unwrap()
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["f1"]);
    }

    #[test]
    fn test_sequential_writers_see_each_other() {
        let dir = TempDir::new().unwrap();
        let first = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let second = SeedWriter::new(dir.path(), DEFAULT_BRANCH);

        first.update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "a")])).unwrap();
        let result = second
            .update_file(&["src/b.ts"], &ParseResult::new().with_nodes([node("src/b.ts", "b")]))
            .unwrap();
        assert_eq!(result.nodes.total, 2);

        let result = first
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "a2")]))
            .unwrap();
        assert_eq!(result.nodes.total, 2);
    }

    #[test]
    fn test_delete_soft_deletes_referenced_nodes() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let caller = node("src/a.ts", "caller");
        let callee = node("src/b.ts", "callee");
        let lonely = node("src/b.ts", "lonely");

        writer.update_file(&["src/a.ts"], &ParseResult::new().with_nodes([caller.clone()]).with_edges([calls(&caller, &callee)])).unwrap();
        writer
            .update_file(
                &["src/b.ts"],
                &ParseResult::new()
                    .with_nodes([callee.clone(), lonely.clone()])
                    .with_effects([Effect::call("e1", &callee.entity_id, "src/b.ts", "fetch")]),
            )
            .unwrap();

        let result = writer.delete_file(&["src/b.ts"]).unwrap();
        assert_eq!(result.nodes.soft_deleted, 1);
        assert_eq!(result.nodes.removed, 1);
        assert_eq!(result.effects.removed, 1);

        let reader = SeedReader::open(dir.path(), DEFAULT_BRANCH);
        let live: Vec<String> = reader.nodes().unwrap().into_iter().map(|n| n.name).collect();
        assert_eq!(live, vec!["caller"]);
        let kept = reader.get_node(&callee.entity_id).unwrap().unwrap();
        assert!(kept.is_deleted);
        assert_eq!(reader.nodes_including_deleted().unwrap().len(), 2);
    }

    #[test]
    fn test_branches_are_isolated() {
        let dir = TempDir::new().unwrap();
        SeedWriter::new(dir.path(), DEFAULT_BRANCH)
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "base_fn")]))
            .unwrap();
        SeedWriter::new(dir.path(), "feature/x")
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "feature_fn")]))
            .unwrap();

        let base = SeedReader::open(dir.path(), DEFAULT_BRANCH).nodes().unwrap();
        let feature = SeedReader::open(dir.path(), "feature/x").nodes().unwrap();
        assert_eq!(base[0].name, "base_fn");
        assert_eq!(feature[0].name, "feature_fn");
        assert_eq!(feature[0].branch, "feature/x");
    }

    #[test]
    fn test_similar_branch_names_stay_apart() {
        let dir = TempDir::new().unwrap();
        SeedWriter::new(dir.path(), "feature/x")
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "slash_fn")]))
            .unwrap();
        SeedWriter::new(dir.path(), "feature_x")
            .update_file(&["src/a.ts"], &ParseResult::new().with_nodes([node("src/a.ts", "underscore_fn")]))
            .unwrap();

        assert_eq!(node_names(dir.path(), "feature/x"), vec!["slash_fn"]);
        assert_eq!(node_names(dir.path(), "feature_x"), vec!["underscore_fn"]);
        assert_eq!(list_branches(dir.path()).unwrap(), vec!["feature/x", "feature_x"]);
        assert_ne!(
            SeedWriter::new(dir.path(), "feature/x").paths().branch_dir(),
            SeedWriter::new(dir.path(), "feature_x").paths().branch_dir()
        );
    }

    #[test]
    fn test_update_resolved_refs() {
        let dir = TempDir::new().unwrap();
        let writer = SeedWriter::new(dir.path(), DEFAULT_BRANCH);
        let module = node("src/app.ts", "app");
        let import = ExternalRef::new(&module.entity_id, "./auth", "login", "src/app.ts");
        writer
            .update_file(&["src/app.ts"], &ParseResult::new().with_nodes([module.clone()]).with_external_refs([import.clone()]))
            .unwrap();

        let reader = SeedReader::open(dir.path(), DEFAULT_BRANCH);
        assert_eq!(reader.get_unresolved_refs(DEFAULT_BRANCH).unwrap().len(), 1);

        let target = node("src/auth.ts", "login").entity_id;
        let resolution = RefResolution { key: import.ref_key(), target_entity_id: target.clone() };
        assert_eq!(writer.update_resolved_refs(std::slice::from_ref(&resolution)).unwrap(), 1);
        assert_eq!(writer.update_resolved_refs(&[resolution]).unwrap(), 0);

        assert!(reader.get_unresolved_refs(DEFAULT_BRANCH).unwrap().is_empty());
        let refs = reader.external_refs().unwrap();
        assert_eq!(refs[0].target_entity_id.as_deref(), Some(target.as_str()));
    }

    #[test]
    fn test_dedup_last() {
        let rows = vec![("a", 1), ("b", 2), ("a", 3)];
        let kept = dedup_last(rows, |r| r.0.to_string());
        assert_eq!(kept, vec![("b", 2), ("a", 3)]);
    }
}
