//! Seed watcher - keeps hub manifests current while repos are re-analyzed
//!
//! Watches every active registered repo. A seed write always ends by
//! replacing `meta.json` of the branch it touched, so that file alone
//! signals "this repo's seeds changed". Bursts are collapsed per repo and
//! refreshed through the [`HubRouter`] once the repo has been quiet for the
//! debounce interval.

use crate::hub::{HubRouter, RefreshResult, RepoStatus};
use crate::storage::paths::{DEVAC_DIR, META_FILE, SEED_DIR};
use crate::Result;
use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
struct WatchedRepo {
    repo_id: String,
    path: PathBuf,
}

pub struct SeedWatcher {
    router: HubRouter,
    repos: Vec<WatchedRepo>,
    debounce: Duration,
}

impl SeedWatcher {
    /// Watch every active repo currently registered in the hub
    pub async fn from_hub(router: HubRouter) -> Result<Self> {
        let repos = router
            .list_repos(false)
            .await?
            .into_iter()
            .filter(|r| r.status == RepoStatus::Active)
            .map(|r| WatchedRepo {
                repo_id: r.repo_id,
                path: r.path,
            })
            .collect();
        Ok(Self {
            router,
            repos,
            debounce: DEFAULT_DEBOUNCE,
        })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn repo_count(&self) -> usize {
        self.repos.len()
    }

    /// Repo whose seeds `path` belongs to, if it is a seed meta file
    fn repo_for_path(&self, path: &Path) -> Option<&str> {
        if !is_seed_meta(path) {
            return None;
        }
        self.repos
            .iter()
            .filter(|r| path.starts_with(&r.path))
            // nested repos: the deepest root wins
            .max_by_key(|r| r.path.components().count())
            .map(|r| r.repo_id.as_str())
    }

    /// Watch until `signal` resolves
    pub async fn run_until<F: Future<Output = ()>>(self, signal: F) -> anyhow::Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Result<notify::Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<notify::Event>| {
                let _ = tx.send(res);
            },
            Config::default(),
        )?;
        for repo in &self.repos {
            watcher.watch(&repo.path, RecursiveMode::Recursive)?;
        }

        println!("👀 Watching seeds of {} repositories...", self.repos.len());
        tracing::info!(repos = self.repos.len(), "Seed watcher started");

        tokio::pin!(signal);
        let mut pending: BTreeSet<String> = BTreeSet::new();
        let mut deadline: Option<Instant> = None;

        loop {
            let flush_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                _ = &mut signal => break,
                event = rx.recv() => match event {
                    Some(Ok(event)) => {
                        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                            continue;
                        }
                        for path in &event.paths {
                            if let Some(repo_id) = self.repo_for_path(path) {
                                tracing::debug!(repo_id, path = %path.display(), "Seed changed");
                                pending.insert(repo_id.to_string());
                                deadline = Some(Instant::now() + self.debounce);
                            }
                        }
                    }
                    Some(Err(e)) => tracing::warn!("Watch error: {}", e),
                    None => break,
                },
                _ = tokio::time::sleep_until(flush_at), if deadline.is_some() => {
                    deadline = None;
                    self.flush(std::mem::take(&mut pending)).await;
                }
            }
        }

        if !pending.is_empty() {
            self.flush(pending).await;
        }
        tracing::info!("Seed watcher stopped");
        Ok(())
    }

    /// Refresh each pending repo; failures are logged and do not stop the others
    async fn flush(&self, pending: BTreeSet<String>) -> Vec<RefreshResult> {
        let mut results = Vec::new();
        for repo_id in pending {
            match self.router.refresh_repo(&repo_id).await {
                Ok(result) => {
                    tracing::info!(repo_id = %result.repo_id, outcome = ?result.outcome, "Refreshed after seed change");
                    results.push(result);
                }
                Err(e) => tracing::warn!(repo_id = %repo_id, "Refresh after seed change failed: {}", e),
            }
        }
        results
    }
}

/// `.../.devac/seed/<branch>/meta.json`
fn is_seed_meta(path: &Path) -> bool {
    if path.file_name().and_then(|n| n.to_str()) != Some(META_FILE) {
        return false;
    }
    let names: Vec<&str> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .collect();
    names.windows(2).any(|w| w[0] == DEVAC_DIR && w[1] == SEED_DIR)
}
