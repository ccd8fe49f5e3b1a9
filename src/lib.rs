//! # devac - Federated code graph store
//!
//! Persisted, incrementally updated code graphs ("seeds") per package,
//! federated into one queryable view across a multi-repository workspace.
//!
//! devac provides:
//! - Content-addressed entity identity and a canonical `devac://` URI scheme
//! - Per-package seed tables (nodes, edges, external refs, effects) with
//!   merge-and-atomically-replace writes guarded by advisory file locks
//! - Recursive graph queries (deps, dependents, call graph, imports) over one
//!   or many packages
//! - A central hub that registers repositories, caches manifests and stores
//!   unified diagnostics, reachable only through a single-writer router

pub mod identity;
pub mod uri;
pub mod properties;
pub mod node;
pub mod edge;
pub mod reference;
pub mod effect;
pub mod lock;
pub mod storage;
pub mod query;
pub mod hub;
pub mod commands;
pub mod server;
pub mod watcher;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use identity::{EntityId, generate_entity_id};
pub use uri::EntityUri;
pub use node::{Node, NodeKind};
pub use edge::{Edge, EdgeType};
pub use reference::ExternalRef;
pub use effect::Effect;
pub use lock::{LockManager, LockOptions, SeedLock};
pub use storage::{ParseResult, SeedReader, SeedWriter, WriteResult};
pub use query::{CodeGraph, QueryEngine, QueryScope};
pub use hub::{HubRouter, HubServer};

use std::path::PathBuf;

/// Result type alias for devac operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for devac operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Locked: {path} is held by pid {holder_pid}")]
    Locked { path: PathBuf, holder_pid: u32 },

    #[error("Stale lock: {path} was held by dead pid {holder_pid}")]
    Stale { path: PathBuf, holder_pid: u32 },

    #[error("Corrupt store at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Hub IPC error: {0}")]
    Ipc(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URI: {0}")]
    InvalidUri(String),

    /// Hub failure of a kind this build cannot rebuild
    #[error("Hub error ({kind}): {message}")]
    Remote { kind: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether re-issuing the same operation later can succeed without
    /// operator intervention.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Locked { .. } | Error::Stale { .. } | Error::Timeout(_) | Error::Ipc(_)
        )
    }

    /// Stable machine-readable name, used on the hub wire protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Locked { .. } => "locked",
            Error::Stale { .. } => "stale",
            Error::Corrupt { .. } => "corrupt",
            Error::Timeout(_) => "timeout",
            Error::NotFound(_) => "not_found",
            Error::Ipc(_) => "ipc",
            Error::Validation(_) => "validation",
            Error::InvalidUri(_) => "invalid_uri",
            Error::Remote { .. } => "remote",
            Error::Storage(_) => "storage",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
        }
    }
}

/// Branch name used when the caller does not pick one.
pub const DEFAULT_BRANCH: &str = "base";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_taxonomy() {
        let locked = Error::Locked { path: PathBuf::from("x.lock"), holder_pid: 1 };
        assert!(locked.is_retryable());
        assert!(Error::Timeout("ipc".into()).is_retryable());
        assert!(!Error::corrupt("nodes.db", "bad header").is_retryable());
        assert!(!Error::NotFound("hub".into()).is_retryable());
        assert_eq!(locked.kind(), "locked");
    }
}
