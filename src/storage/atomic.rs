//! Write-to-temp-then-rename
//!
//! Every file a reader may open concurrently (seed tables, `meta.json`,
//! manifests, the hub server marker) is replaced through [`StagedFile`]:
//! content goes to a temp file in the target's directory, is fsynced, and is
//! renamed over the target. A staged file that is dropped without being
//! committed deletes its temp file, so an aborted write leaves the target
//! untouched and no debris behind.
//!
//! Seed generations are built in a [`StagedDir`], which is removed on drop
//! unless the write that filled it was published.

use crate::Result;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Suffix of staged temp files, used to recognise debris
pub const TEMP_SUFFIX: &str = ".tmp";

/// A temp file that will replace `target` on commit.
#[derive(Debug)]
pub struct StagedFile {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Reserve a temp path next to `target`. Nothing is created yet.
    pub fn new(target: &Path) -> Result<Self> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = dir.join(format!(
            ".{}.{}.{}{}",
            name,
            std::process::id(),
            STAGE_COUNTER.fetch_add(1, Ordering::Relaxed),
            TEMP_SUFFIX
        ));

        Ok(Self {
            temp,
            target: target.to_path_buf(),
            committed: false,
        })
    }

    /// Temp file to write into
    pub fn path(&self) -> &Path {
        &self.temp
    }

    /// Write `bytes` into the temp file
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        fs::write(&self.temp, bytes)?;
        Ok(())
    }

    /// Flush the temp file and rename it over the target
    pub fn commit(mut self) -> Result<()> {
        File::open(&self.temp)?.sync_all()?;
        atomic_rename(&self.temp, &self.target)?;
        self.committed = true;
        sync_dir(&self.target);
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
            // SQLite side files, should a connection have been left open
            for side in ["-journal", "-wal", "-shm"] {
                let mut name = self.temp.clone().into_os_string();
                name.push(side);
                let _ = fs::remove_file(PathBuf::from(name));
            }
        }
    }
}

/// A freshly created directory, removed on drop unless kept.
#[derive(Debug)]
pub struct StagedDir {
    path: PathBuf,
    kept: bool,
}

impl StagedDir {
    /// Create `path` empty, clearing whatever an interrupted write left there
    pub fn create(path: &Path) -> Result<Self> {
        match fs::remove_dir_all(path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            kept: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush every file in the directory, then the directory itself
    pub fn sync(&self) -> Result<()> {
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                File::open(entry.path())?.sync_all()?;
            }
        }
        sync_dir_entries(&self.path);
        Ok(())
    }

    pub fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for StagedDir {
    fn drop(&mut self) {
        if !self.kept {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

/// Replace `target` with `bytes` atomically
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    let staged = StagedFile::new(target)?;
    staged.write(bytes)?;
    staged.commit()
}

/// Rename `src` over `dst`.
///
/// `std::fs::rename` replaces an existing target atomically on Unix and on
/// Windows (`MOVEFILE_REPLACE_EXISTING`).
pub fn atomic_rename(src: &Path, dst: &Path) -> io::Result<()> {
    fs::rename(src, dst)
}

/// Persist the directory entry after a rename. Best effort.
fn sync_dir(target: &Path) {
    if let Some(dir) = target.parent() {
        sync_dir_entries(dir);
    }
}

fn sync_dir_entries(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}
