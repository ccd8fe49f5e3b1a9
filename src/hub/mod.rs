//! Central hub - repository registry, cached manifests and diagnostics
//!
//! The hub is one SQLite file per workspace (`.devac/central.db`). SQLite
//! does not tolerate two processes writing the same file, so at most one
//! writable handle may exist at a time:
//!
//! - [`HubServer`] holds the hub lock and the only writable handle for as long
//!   as it runs, and advertises itself through `.devac/hub-server.json`.
//! - [`HubRouter`] forwards requests to a running server, or opens the hub
//!   itself for the duration of one call (under the hub lock when writing).
//!
//! The writable store type is private to this module. [`init`] is the single
//! public way to create a hub.

pub mod diagnostics;
pub mod manifest;
pub mod protocol;
pub mod router;
pub mod server;
mod schema;
mod store;
pub mod types;

pub use diagnostics::{
    DiagnosticCategory, DiagnosticSeverity, DiagnosticSource, DiagnosticsFilter, DiagnosticsSummary,
    UnifiedDiagnostic,
};
pub use manifest::{PackageManifest, RepoManifest};
pub use protocol::HubRequest;
pub use router::{HubRouter, Route, RouterOptions};
pub use schema::HUB_SCHEMA_VERSION;
pub use server::{HubServer, HubServerOptions, ServerMarker};
pub use types::{
    HubStatus, RefreshAllResult, RefreshOutcome, RefreshResult, RegisterResult, RepoError, RepoInfo, RepoStatus,
};

use crate::lock::{LockManager, LockOptions};
use crate::storage::paths::DEVAC_DIR;
use crate::Result;
use std::path::{Path, PathBuf};
use store::CentralHub;

pub const HUB_FILE: &str = "central.db";
pub const MARKER_FILE: &str = "hub-server.json";
/// Lock target; the lock file itself is `hub.lock`
const LOCK_TARGET: &str = "hub";

/// Well-known hub locations inside a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubPaths {
    workspace: PathBuf,
}

impl HubPaths {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn devac_dir(&self) -> PathBuf {
        self.workspace.join(DEVAC_DIR)
    }

    pub fn hub_db(&self) -> PathBuf {
        self.devac_dir().join(HUB_FILE)
    }

    /// Target passed to [`LockManager`]
    pub fn lock_target(&self) -> PathBuf {
        self.devac_dir().join(LOCK_TARGET)
    }

    pub fn lock_file(&self) -> PathBuf {
        LockManager::lock_path(&self.lock_target())
    }

    pub fn marker(&self) -> PathBuf {
        self.devac_dir().join(MARKER_FILE)
    }
}

/// Create the hub of `workspace` if it does not exist yet. Idempotent.
///
/// Runs before any router or server can exist, so it is the one place
/// outside this module's internals that constructs the store.
pub fn init(workspace: &Path) -> Result<PathBuf> {
    let paths = HubPaths::new(workspace);
    let db = paths.hub_db();
    if db.exists() {
        CentralHub::open_read_only(&db)?;
        tracing::debug!(path = %db.display(), "Hub already initialized");
        return Ok(db);
    }

    let lock = LockManager::acquire(&paths.lock_target(), &LockOptions::default().with_holder("hub-init"))?;
    CentralHub::create(&db)?;
    lock.release()?;

    tracing::info!(path = %db.display(), "Initialized hub");
    Ok(db)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let paths = HubPaths::new("/ws");
        assert_eq!(paths.hub_db(), PathBuf::from("/ws/.devac/central.db"));
        assert_eq!(paths.lock_file(), PathBuf::from("/ws/.devac/hub.lock"));
        assert_eq!(paths.marker(), PathBuf::from("/ws/.devac/hub-server.json"));
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db = init(dir.path()).unwrap();
        assert!(db.exists());
        assert!(!HubPaths::new(dir.path()).lock_file().exists());
        assert_eq!(init(dir.path()).unwrap(), db);
    }

    #[test]
    fn test_init_rejects_foreign_file() {
        let dir = TempDir::new().unwrap();
        let paths = HubPaths::new(dir.path());
        std::fs::create_dir_all(paths.devac_dir()).unwrap();
        std::fs::write(paths.hub_db(), vec![b'x'; 4096]).unwrap();
        assert!(matches!(init(dir.path()), Err(Error::Corrupt { .. })));
    }
}
