//! Advisory file locks
//!
//! One lock guards one target (a seed branch directory, or the hub store).
//! The lock lives next to the target as `<target>.lock` and holds JSON:
//!
//! ```json
//! {"pid": 4242, "holder": "devac-cli", "acquiredAt": "2026-01-01T00:00:00Z", "token": "..."}
//! ```
//!
//! Creation is atomic: the content is written to a private temp file which is
//! then hard-linked to the lock path. The link fails if a lock already exists,
//! so readers never see a half-written lock.
//!
//! A lock whose holder process is dead is reclaimed by the next acquirer.
//! Locks are not re-entrant: a live holder blocks everyone, itself included.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const LOCK_SUFFIX: &str = ".lock";

/// Reclaim attempts before giving up with `Stale`.
const MAX_RECLAIM_ATTEMPTS: u32 = 3;

static TOKEN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How to acquire a lock.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Poll until this budget is spent. `None` fails fast.
    pub timeout: Option<Duration>,
    /// First retry delay, doubled after each attempt
    pub retry_interval: Duration,
    pub max_retry_interval: Duration,
    /// Age after which a lock held by a live process is reported stale
    pub stale_after: Duration,
    /// Free-form holder name written into the lock
    pub holder: String,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            retry_interval: Duration::from_millis(50),
            max_retry_interval: Duration::from_secs(1),
            stale_after: Duration::from_secs(10 * 60),
            holder: "devac".to_string(),
        }
    }
}

impl LockOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

/// Content of a lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub pid: u32,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    /// Unique per acquisition, so a holder can tell its lock from a newer one
    #[serde(default)]
    pub token: String,
}

impl LockInfo {
    fn new(holder: &str) -> Self {
        let pid = std::process::id();
        let now = Utc::now();
        let token = format!(
            "{}-{}-{}",
            pid,
            now.timestamp_nanos_opt().unwrap_or_default(),
            TOKEN_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        Self {
            pid,
            holder: holder.to_string(),
            acquired_at: now,
            token,
        }
    }

    /// Time since acquisition
    pub fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }
}

/// What a lock path currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockStatus {
    Free,
    Held { info: LockInfo },
    /// Holder is dead or the lock outlived `stale_after`
    Stale { info: LockInfo, holder_alive: bool },
}

/// A held lock. Released on drop.
#[derive(Debug)]
pub struct SeedLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl SeedLock {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Release explicitly, surfacing I/O errors that `Drop` would swallow
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        release_path(&self.path, &self.info)
    }
}

impl Drop for SeedLock {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = release_path(&self.path, &self.info) {
                tracing::warn!("Failed to release lock {}: {}", self.path.display(), e);
            }
        }
    }
}

/// File-based advisory lock operations.
pub struct LockManager;

impl LockManager {
    /// Lock file guarding `target`
    pub fn lock_path(target: &Path) -> PathBuf {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "root".to_string());
        target.with_file_name(format!("{}{}", name, LOCK_SUFFIX))
    }

    /// Acquire the lock on `target`.
    ///
    /// Fails with `Locked` when a live process holds it, unless
    /// `opts.timeout` is set, in which case it polls with exponential backoff
    /// and returns `Timeout` once the budget is spent.
    pub fn acquire(target: &Path, opts: &LockOptions) -> Result<SeedLock> {
        let started = Instant::now();
        let mut interval = opts.retry_interval;

        loop {
            let err = match Self::try_acquire(target, opts) {
                Ok(lock) => return Ok(lock),
                Err(err @ Error::Locked { .. }) => err,
                Err(err) => return Err(err),
            };

            let Some(timeout) = opts.timeout else {
                return Err(err);
            };
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(Error::Timeout(format!(
                    "lock {} not acquired within {:?}: {}",
                    Self::lock_path(target).display(),
                    timeout,
                    err
                )));
            }

            std::thread::sleep(interval.min(timeout - elapsed));
            interval = (interval * 2).min(opts.max_retry_interval);
        }
    }

    /// Single acquisition attempt, reclaiming a lock left by a dead process.
    pub fn try_acquire(target: &Path, opts: &LockOptions) -> Result<SeedLock> {
        let path = Self::lock_path(target);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let info = LockInfo::new(&opts.holder);
        let mut last_dead_pid = 0;

        for _ in 0..MAX_RECLAIM_ATTEMPTS {
            match create_lock_file(&path, &info) {
                Ok(()) => {
                    tracing::debug!(pid = info.pid, "Acquired lock {}", path.display());
                    return Ok(SeedLock {
                        path,
                        info,
                        released: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            let Some(existing) = read_lock(&path)? else {
                // released between our link attempt and the read
                continue;
            };

            if is_process_alive(existing.pid) {
                return Err(Error::Locked {
                    path,
                    holder_pid: existing.pid,
                });
            }

            last_dead_pid = existing.pid;
            reclaim(&path, &existing, &info.token)?;
        }

        Err(Error::Stale {
            path,
            holder_pid: last_dead_pid,
        })
    }

    /// Release a held lock
    pub fn release(lock: SeedLock) -> Result<()> {
        lock.release()
    }

    /// Current lock content, if any
    pub fn read_info(target: &Path) -> Result<Option<LockInfo>> {
        read_lock(&Self::lock_path(target))
    }

    /// Whether the holder is dead or the lock is older than `max_age`.
    ///
    /// Only dead holders are reclaimed automatically. An old lock with a live
    /// holder is left for the operator.
    pub fn is_stale(info: &LockInfo, max_age: Duration) -> bool {
        !is_process_alive(info.pid) || info.age() > max_age
    }

    pub fn inspect(target: &Path, max_age: Duration) -> Result<LockStatus> {
        let Some(info) = Self::read_info(target)? else {
            return Ok(LockStatus::Free);
        };
        let holder_alive = is_process_alive(info.pid);
        if !holder_alive || info.age() > max_age {
            Ok(LockStatus::Stale { info, holder_alive })
        } else {
            Ok(LockStatus::Held { info })
        }
    }

    /// Remove the lock regardless of its holder.
    ///
    /// Operator escape hatch. Removing a lock whose holder is still writing
    /// allows a second writer in.
    pub fn force_release(target: &Path) -> Result<Option<LockInfo>> {
        let path = Self::lock_path(target);
        let info = read_lock(&path).ok().flatten();
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::warn!(
                    pid = info.as_ref().map(|i| i.pid),
                    "Force-released lock {}",
                    path.display()
                );
                Ok(info)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn create_lock_file(path: &Path, info: &LockInfo) -> std::io::Result<()> {
    let tmp = sibling(path, &format!("{}.tmp", info.token));
    let result = write_and_link(&tmp, path, info);
    let _ = fs::remove_file(&tmp);
    result
}

fn write_and_link(tmp: &Path, path: &Path, info: &LockInfo) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(tmp)?;
    let body = serde_json::to_vec(info).map_err(std::io::Error::other)?;
    file.write_all(&body)?;
    file.sync_all()?;
    drop(file);
    fs::hard_link(tmp, path)
}

fn read_lock(path: &Path) -> Result<Option<LockInfo>> {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| Error::corrupt(path, format!("unreadable lock file: {}", e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Move a dead holder's lock out of the way.
///
/// The lock is renamed to a private tombstone first, then checked: if it is
/// not the lock that was judged dead, a new holder slipped in and its lock is
/// put back.
fn reclaim(path: &Path, dead: &LockInfo, token: &str) -> Result<()> {
    let tombstone = sibling(path, &format!("{}.stale", token));
    match fs::rename(path, &tombstone) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let moved = read_lock(&tombstone).ok().flatten();
    if moved.as_ref() == Some(dead) {
        fs::remove_file(&tombstone)?;
        tracing::warn!(
            pid = dead.pid,
            holder = %dead.holder,
            "Reclaimed lock {} from dead process",
            path.display()
        );
        return Ok(());
    }

    let holder_pid = moved.as_ref().map(|i| i.pid).unwrap_or_default();
    match fs::hard_link(&tombstone, path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            tracing::warn!("Lock {} changed hands during reclaim", path.display());
        }
        Err(e) => return Err(e.into()),
    }
    let _ = fs::remove_file(&tombstone);
    Err(Error::Locked {
        path: path.to_path_buf(),
        holder_pid,
    })
}

fn release_path(path: &Path, info: &LockInfo) -> Result<()> {
    match read_lock(path) {
        Ok(Some(current)) if current.token == info.token => {
            fs::remove_file(path)?;
            tracing::debug!("Released lock {}", path.display());
            Ok(())
        }
        Ok(Some(current)) => {
            tracing::warn!(
                pid = current.pid,
                "Lock {} is no longer ours, leaving it",
                path.display()
            );
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => Err(e),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}", name, suffix))
}

/// Check whether a process with the given pid is still alive.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // signal 0 checks existence and permissions without delivering anything
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Without a liveness probe every holder is assumed alive, so dead locks
/// need `force_release`.
#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Never a valid pid on Linux (pid_max tops out at 2^22)
    const DEAD_PID: u32 = 999_999_999;

    fn plant_lock(target: &Path, pid: u32, acquired_at: DateTime<Utc>) {
        let info = LockInfo {
            pid,
            holder: "test".to_string(),
            acquired_at,
            token: "planted".to_string(),
        };
        fs::write(LockManager::lock_path(target), serde_json::to_vec(&info).unwrap()).unwrap();
    }

    #[test]
    fn test_lock_path() {
        assert_eq!(
            LockManager::lock_path(Path::new("/p/.devac/seed/base")),
            PathBuf::from("/p/.devac/seed/base.lock")
        );
        assert_eq!(
            LockManager::lock_path(Path::new("/p/.devac/seed/feature.x")),
            PathBuf::from("/p/.devac/seed/feature.x.lock")
        );
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("base");

        let lock = LockManager::acquire(&target, &LockOptions::default()).unwrap();
        assert!(lock.path().exists());
        assert_eq!(lock.info().pid, std::process::id());

        LockManager::release(lock).unwrap();
        assert!(!LockManager::lock_path(&target).exists());
    }

    #[test]
    fn test_second_acquire_is_locked() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("base");

        let _held = LockManager::acquire(&target, &LockOptions::default()).unwrap();
        let err = LockManager::acquire(&target, &LockOptions::default()).unwrap_err();
        match err {
            Error::Locked { holder_pid, .. } => assert_eq!(holder_pid, std::process::id()),
            other => panic!("expected Locked, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_releases() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("base");
        {
            let _lock = LockManager::acquire(&target, &LockOptions::default()).unwrap();
        }
        assert!(LockManager::acquire(&target, &LockOptions::default()).is_ok());
    }

    #[test]
    fn test_dead_holder_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("base");
        plant_lock(&target, DEAD_PID, Utc::now());

        let lock = LockManager::acquire(&target, &LockOptions::default()).unwrap();
        assert_eq!(lock.info().pid, std::process::id());
        let on_disk = LockManager::read_info(&target).unwrap().unwrap();
        assert_eq!(on_disk.token, lock.info().token);
    }

    #[test]
    fn test_timeout_while_held() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("base");
        let _held = LockManager::acquire(&target, &LockOptions::default()).unwrap();

        let opts = LockOptions::default().with_timeout(Duration::from_millis(120));
        let started = Instant::now();
        let err = LockManager::acquire(&target, &opts).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_staleness() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("base");

        let lock = LockManager::acquire(&target, &LockOptions::default()).unwrap();
        assert!(!LockManager::is_stale(lock.info(), Duration::from_secs(60)));
        assert!(matches!(
            LockManager::inspect(&target, Duration::from_secs(60)).unwrap(),
            LockStatus::Held { .. }
        ));
        drop(lock);

        // alive but old: stale, yet still blocks acquisition
        plant_lock(&target, std::process::id(), Utc::now() - chrono::Duration::hours(2));
        let info = LockManager::read_info(&target).unwrap().unwrap();
        assert!(LockManager::is_stale(&info, Duration::from_secs(60)));
        assert!(matches!(
            LockManager::acquire(&target, &LockOptions::default()),
            Err(Error::Locked { .. })
        ));

        let dead = LockInfo { pid: DEAD_PID, ..info };
        assert!(LockManager::is_stale(&dead, Duration::from_secs(3600)));
    }

    #[test]
    fn test_force_release() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("base");
        assert_eq!(LockManager::inspect(&target, Duration::from_secs(1)).unwrap(), LockStatus::Free);

        plant_lock(&target, std::process::id(), Utc::now());
        let removed = LockManager::force_release(&target).unwrap().unwrap();
        assert_eq!(removed.token, "planted");
        assert!(LockManager::force_release(&target).unwrap().is_none());
        assert!(LockManager::acquire(&target, &LockOptions::default()).is_ok());
    }

    #[test]
    fn test_release_leaves_foreign_lock() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("base");
        let lock = LockManager::acquire(&target, &LockOptions::default()).unwrap();

        LockManager::force_release(&target).unwrap();
        plant_lock(&target, std::process::id(), Utc::now());

        lock.release().unwrap();
        let still_there = LockManager::read_info(&target).unwrap().unwrap();
        assert_eq!(still_there.token, "planted");
    }

    #[test]
    fn test_garbage_lock_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("base");
        fs::write(LockManager::lock_path(&target), b"not json").unwrap();
        assert!(matches!(
            LockManager::acquire(&target, &LockOptions::default()),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn test_liveness() {
        assert!(is_process_alive(std::process::id()));
        assert!(!is_process_alive(0));
    }
}
