//! Hub access router
//!
//! Every hub call from outside this module goes through [`HubRouter`]. When a
//! live [`super::HubServer`] advertises itself the request is forwarded to it;
//! otherwise the router opens the hub for one call, taking the hub lock for
//! mutating requests so it never races a server that is starting up.

use super::diagnostics::{DiagnosticsFilter, DiagnosticsSummary, UnifiedDiagnostic};
use super::protocol::{HubReply, HubRequest, dispatch};
use super::server::ServerMarker;
use super::store::CentralHub;
use super::types::{HubStatus, RefreshAllResult, RefreshResult, RegisterResult, RepoInfo};
use super::HubPaths;
use crate::lock::{LockManager, LockOptions, SeedLock, is_process_alive};
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Slice of the lock budget after which a direct writer looks for a server again
const SERVER_CHECK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Budget for one forwarded request, connect included
    pub ipc_timeout: Duration,
    /// Used when the router writes the hub itself
    pub lock: LockOptions,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            ipc_timeout: Duration::from_secs(5),
            lock: LockOptions::default()
                .with_timeout(Duration::from_secs(10))
                .with_holder("hub-router"),
        }
    }
}

/// Where a call goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "route", rename_all = "snake_case")]
pub enum Route {
    Server { pid: u32, port: u16 },
    Direct,
}

pub struct HubRouter {
    paths: HubPaths,
    options: RouterOptions,
}

impl HubRouter {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            paths: HubPaths::new(workspace),
            options: RouterOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RouterOptions) -> Self {
        self.options = options;
        self
    }

    pub fn paths(&self) -> &HubPaths {
        &self.paths
    }

    /// Decide where the next call goes. A marker left by a dead server is
    /// removed.
    pub fn route(&self) -> Result<Route> {
        route_for(&self.paths)
    }

    /// Execute one request, forwarded or direct
    pub async fn call(&self, request: HubRequest) -> Result<Value> {
        match self.route()? {
            Route::Server { pid, port } => {
                tracing::debug!(op = request.op(), pid, port, "Forwarding hub request to server");
                self.forward(port, &request).await
            }
            Route::Direct => {
                tracing::debug!(op = request.op(), "No hub server, accessing hub directly");
                let paths = self.paths.clone();
                let lock = self.options.lock.clone();
                let direct = request.clone();
                let outcome = tokio::task::spawn_blocking(move || call_direct(&paths, &lock, direct))
                    .await
                    .unwrap_or_else(|e| Err(Error::Ipc(format!("direct hub call failed: {}", e))))?;
                match outcome {
                    Direct::Done(value) => Ok(value),
                    Direct::ServerStarted { pid, port } => {
                        tracing::debug!(op = request.op(), pid, port, "Hub server started meanwhile, forwarding");
                        self.forward(port, &request).await
                    }
                }
            }
        }
    }

    async fn call_typed<T: DeserializeOwned>(&self, request: HubRequest) -> Result<T> {
        let value = self.call(request).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send one line, read one line. A timeout never reports success.
    async fn forward(&self, port: u16, request: &HubRequest) -> Result<Value> {
        let exchange = async {
            let ipc = |e: std::io::Error| Error::Ipc(format!("hub server on port {}: {}", port, e));

            let stream = TcpStream::connect(("127.0.0.1", port)).await.map_err(ipc)?;
            let (read, mut write) = stream.into_split();
            let mut line = serde_json::to_vec(request)?;
            line.push(b'\n');
            write.write_all(&line).await.map_err(ipc)?;

            let mut reply = String::new();
            let n = BufReader::new(read).read_line(&mut reply).await.map_err(ipc)?;
            if n == 0 {
                return Err(Error::Ipc(format!(
                    "hub server on port {} closed the connection without replying",
                    port
                )));
            }
            let reply: HubReply = serde_json::from_str(&reply)
                .map_err(|e| Error::Ipc(format!("malformed reply from hub server: {}", e)))?;
            reply.into_result()
        };

        match tokio::time::timeout(self.options.ipc_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "hub request {} got no reply within {:?}",
                request.op(),
                self.options.ipc_timeout
            ))),
        }
    }

    // ========== Typed operations ==========

    pub async fn register_repo(&self, path: &Path) -> Result<RegisterResult> {
        // the server may run from another directory
        let path = std::path::absolute(path)?;
        self.call_typed(HubRequest::RegisterRepo { path }).await
    }

    pub async fn unregister_repo(&self, repo_id: &str) -> Result<()> {
        self.call(HubRequest::UnregisterRepo {
            repo_id: repo_id.to_string(),
        })
        .await?;
        Ok(())
    }

    pub async fn refresh_repo(&self, repo_id: &str) -> Result<RefreshResult> {
        self.call_typed(HubRequest::RefreshRepo {
            repo_id: repo_id.to_string(),
        })
        .await
    }

    pub async fn refresh_all(&self) -> Result<RefreshAllResult> {
        self.call_typed(HubRequest::RefreshAll).await
    }

    pub async fn list_repos(&self, include_unregistered: bool) -> Result<Vec<RepoInfo>> {
        self.call_typed(HubRequest::ListRepos { include_unregistered }).await
    }

    pub async fn get_repo(&self, repo_id: &str) -> Result<RepoInfo> {
        self.call_typed(HubRequest::GetRepo {
            repo_id: repo_id.to_string(),
        })
        .await
    }

    pub async fn status(&self) -> Result<HubStatus> {
        self.call_typed(HubRequest::Status).await
    }

    pub async fn push_diagnostics(&self, diagnostics: Vec<UnifiedDiagnostic>) -> Result<usize> {
        self.call_typed(HubRequest::PushDiagnostics { diagnostics }).await
    }

    pub async fn clear_diagnostics(&self, filter: DiagnosticsFilter) -> Result<usize> {
        self.call_typed(HubRequest::ClearDiagnostics { filter }).await
    }

    pub async fn resolve_diagnostics(&self, ids: Vec<String>) -> Result<usize> {
        self.call_typed(HubRequest::ResolveDiagnostics { ids }).await
    }

    pub async fn query_diagnostics(&self, filter: DiagnosticsFilter) -> Result<Vec<UnifiedDiagnostic>> {
        self.call_typed(HubRequest::QueryDiagnostics { filter }).await
    }

    pub async fn diagnostics_summary(&self, repo_id: Option<&str>) -> Result<DiagnosticsSummary> {
        self.call_typed(HubRequest::DiagnosticsSummary {
            repo_id: repo_id.map(str::to_string),
        })
        .await
    }
}

/// Where a call on the hub at `paths` goes. A marker left by a dead server
/// is removed.
fn route_for(paths: &HubPaths) -> Result<Route> {
    let path = paths.marker();
    let marker = match ServerMarker::read(&path) {
        Ok(marker) => marker,
        Err(Error::Corrupt { reason, .. }) => {
            tracing::warn!(path = %path.display(), "Removing unreadable hub server marker: {}", reason);
            remove_marker(&path);
            None
        }
        Err(e) => return Err(e),
    };

    match marker {
        Some(marker) if is_process_alive(marker.pid) => Ok(Route::Server {
            pid: marker.pid,
            port: marker.port,
        }),
        Some(marker) => {
            tracing::warn!(pid = marker.pid, "Hub server is gone, removing its marker");
            remove_marker(&path);
            Ok(Route::Direct)
        }
        None => Ok(Route::Direct),
    }
}

/// Result of a direct call
enum Direct {
    Done(Value),
    /// A server took the hub over after routing; the request was not run
    ServerStarted { pid: u32, port: u16 },
}

/// Open the hub for exactly one request
fn call_direct(paths: &HubPaths, lock: &LockOptions, request: HubRequest) -> Result<Direct> {
    let db = paths.hub_db();
    if !request.is_mutating() {
        let hub = CentralHub::open_read_only(&db)?;
        return dispatch(&hub, request).map(Direct::Done);
    }

    let guard = match lock_or_find_server(paths, lock)? {
        HubAccess::Locked(guard) => guard,
        HubAccess::Server { pid, port } => return Ok(Direct::ServerStarted { pid, port }),
    };
    let result = CentralHub::open_writable(&db).and_then(|hub| dispatch(&hub, request));
    if let Err(e) = guard.release() {
        tracing::warn!("Failed to release hub lock: {}", e);
    }
    result.map(Direct::Done)
}

enum HubAccess {
    Locked(SeedLock),
    Server { pid: u32, port: u16 },
}

/// Take the hub lock within `options.timeout`.
///
/// A starting server holds the lock before it writes its marker, so the
/// marker is checked again after every slice of the budget.
fn lock_or_find_server(paths: &HubPaths, options: &LockOptions) -> Result<HubAccess> {
    let started = Instant::now();
    loop {
        let attempt = LockOptions {
            timeout: options
                .timeout
                .map(|total| total.saturating_sub(started.elapsed()).min(SERVER_CHECK_INTERVAL)),
            ..options.clone()
        };
        let busy = match LockManager::acquire(&paths.lock_target(), &attempt) {
            Ok(guard) => return Ok(HubAccess::Locked(guard)),
            Err(err @ (Error::Locked { .. } | Error::Timeout(_))) => err,
            Err(err) => return Err(err),
        };

        if let Route::Server { pid, port } = route_for(paths)? {
            return Ok(HubAccess::Server { pid, port });
        }
        match options.timeout {
            Some(total) if started.elapsed() < total => continue,
            Some(total) => {
                return Err(Error::Timeout(format!(
                    "hub lock {} not acquired within {:?}",
                    paths.lock_file().display(),
                    total
                )));
            }
            None => return Err(busy),
        }
    }
}

fn remove_marker(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove hub server marker {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::server::{HubServer, HubServerOptions};
    use crate::hub::{RefreshOutcome, init};
    use crate::node::{Node, NodeKind};
    use crate::storage::{ParseResult, SeedWriter};
    use crate::{DEFAULT_BRANCH, generate_entity_id};
    use chrono::Utc;
    use tempfile::TempDir;

    const DEAD_PID: u32 = 999_999_999;

    fn workspace_with_repo() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        init(dir.path()).unwrap();
        let repo = dir.path().join("app");
        let id = generate_entity_id("app", ".", NodeKind::Function, "src/main.ts", "main").to_string();
        SeedWriter::new(&repo, DEFAULT_BRANCH)
            .update_file(
                &["src/main.ts"],
                &ParseResult::new().with_nodes([Node::new(id, "main", NodeKind::Function, "src/main.ts", 1, 4)]),
            )
            .unwrap();
        (dir, repo)
    }

    fn fake_marker(pid: u32, port: u16) -> ServerMarker {
        ServerMarker {
            pid,
            port,
            started_at: Utc::now(),
            version: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_direct_route_without_server() {
        let (dir, repo) = workspace_with_repo();
        let router = HubRouter::new(dir.path());
        assert_eq!(router.route().unwrap(), Route::Direct);

        let registered = router.register_repo(&repo).await.unwrap();
        assert_eq!(registered.packages, vec!["."]);
        assert!(router.register_repo(&repo).await.unwrap().skipped);
        assert_eq!(router.list_repos(false).await.unwrap().len(), 1);
        assert!(!router.paths().lock_file().exists());
    }

    #[tokio::test]
    async fn test_forwards_to_running_server() {
        let (dir, repo) = workspace_with_repo();
        let server = HubServer::start(dir.path(), HubServerOptions::default()).await.unwrap();
        let router = HubRouter::new(dir.path());

        assert_eq!(
            router.route().unwrap(),
            Route::Server {
                pid: std::process::id(),
                port: server.local_addr().port()
            }
        );
        let registered = router.register_repo(&repo).await.unwrap();
        let refreshed = router.refresh_repo(&registered.repo_id).await.unwrap();
        assert_eq!(refreshed.outcome, RefreshOutcome::Skipped);
        assert!(matches!(router.get_repo("missing").await, Err(Error::NotFound(_))));

        server.shutdown().await.unwrap();
        assert_eq!(router.route().unwrap(), Route::Direct);
        assert_eq!(router.status().await.unwrap().repos_active, 1);
    }

    #[tokio::test]
    async fn test_dead_marker_is_removed() {
        let (dir, _repo) = workspace_with_repo();
        let router = HubRouter::new(dir.path());
        fake_marker(DEAD_PID, 1).write(&router.paths().marker()).unwrap();

        assert_eq!(router.route().unwrap(), Route::Direct);
        assert!(!router.paths().marker().exists());
        assert_eq!(router.status().await.unwrap().repos_total(), 0);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (dir, _repo) = workspace_with_repo();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // accepts connections but never answers
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let options = RouterOptions {
            ipc_timeout: Duration::from_millis(200),
            ..RouterOptions::default()
        };
        let router = HubRouter::new(dir.path()).with_options(options);
        fake_marker(std::process::id(), port).write(&router.paths().marker()).unwrap();

        let result = router.refresh_all().await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        silent.abort();
    }

    #[tokio::test]
    async fn test_unreachable_server_is_ipc_error() {
        let (dir, _repo) = workspace_with_repo();
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let router = HubRouter::new(dir.path());
        fake_marker(std::process::id(), port).write(&router.paths().marker()).unwrap();

        let err = router.status().await.unwrap_err();
        assert!(matches!(err, Error::Ipc(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_direct_write_waits_for_hub_lock() {
        let (dir, repo) = workspace_with_repo();
        let paths = HubPaths::new(dir.path());
        let held = LockManager::acquire(&paths.lock_target(), &LockOptions::default()).unwrap();

        let options = RouterOptions {
            lock: LockOptions::default().with_timeout(Duration::from_millis(100)),
            ..RouterOptions::default()
        };
        let router = HubRouter::new(dir.path()).with_options(options);
        assert!(matches!(router.register_repo(&repo).await, Err(Error::Timeout(_))));
        // reads do not need the lock
        assert_eq!(router.list_repos(true).await.unwrap().len(), 0);

        held.release().unwrap();
        assert!(!router.register_repo(&repo).await.unwrap().skipped);
    }

    #[tokio::test]
    async fn test_direct_write_forwards_to_server_started_meanwhile() {
        let (dir, repo) = workspace_with_repo();
        let paths = HubPaths::new(dir.path());
        // a starting server holds the hub lock before its marker appears
        let held = LockManager::acquire(&paths.lock_target(), &LockOptions::default()).unwrap();

        let other = TempDir::new().unwrap();
        init(other.path()).unwrap();
        let server = HubServer::start(other.path(), HubServerOptions::default()).await.unwrap();
        let port = server.local_addr().port();
        let marker = paths.marker();
        let publish = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            fake_marker(std::process::id(), port).write(&marker).unwrap();
        });

        let router = HubRouter::new(dir.path());
        assert_eq!(router.route().unwrap(), Route::Direct);
        let started = Instant::now();
        let registered = router.register_repo(&repo).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        publish.await.unwrap();

        let served = HubRouter::new(other.path());
        assert_eq!(served.list_repos(false).await.unwrap()[0].repo_id, registered.repo_id);

        held.release().unwrap();
        server.shutdown().await.unwrap();
    }
}
