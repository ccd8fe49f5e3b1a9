use crate::hub::{HubServerOptions, RouterOptions};
use crate::lock::LockOptions;
use crate::storage::paths::DEVAC_DIR;
use crate::DEFAULT_BRANCH;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "devac.toml";

/// `devac.toml`. Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DevacConfig {
    pub seed: SeedConfig,
    pub lock: LockConfig,
    pub hub: HubConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedConfig {
    pub default_branch: String,
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            default_branch: DEFAULT_BRANCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub stale_after_ms: u64,
    /// 0 fails fast
    pub acquire_timeout_ms: u64,
    pub retry_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            stale_after_ms: 10 * 60 * 1000,
            acquire_timeout_ms: 5_000,
            retry_interval_ms: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub ipc_timeout_ms: u64,
    pub lock_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            ipc_timeout_ms: 5_000,
            lock_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_port: u16,
    /// 0 picks a free port
    pub ipc_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            ipc_port: 0,
        }
    }
}

impl DevacConfig {
    /// Lock options for seed writes
    pub fn lock_options(&self) -> LockOptions {
        let mut options = LockOptions::default()
            .with_stale_after(Duration::from_millis(self.lock.stale_after_ms))
            .with_holder("devac-cli");
        if self.lock.acquire_timeout_ms > 0 {
            options = options.with_timeout(Duration::from_millis(self.lock.acquire_timeout_ms));
        }
        options.retry_interval = Duration::from_millis(self.lock.retry_interval_ms.max(1));
        options
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            ipc_timeout: Duration::from_millis(self.hub.ipc_timeout_ms),
            lock: self
                .lock_options()
                .with_timeout(Duration::from_millis(self.hub.lock_timeout_ms))
                .with_holder("hub-router"),
        }
    }

    pub fn hub_server_options(&self) -> HubServerOptions {
        let mut options = HubServerOptions::default().with_port(self.server.ipc_port);
        options.lock.stale_after = Duration::from_millis(self.lock.stale_after_ms);
        options
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from(CONFIG_FILE)
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<DevacConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: DevacConfig = toml::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("invalid config {}: {}", path.display(), e))?;
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &DevacConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_gitignore(project_root: &Path) -> anyhow::Result<()> {
    let gitignore_path = project_root.join(".gitignore");
    let entry = format!("{}/", DEVAC_DIR);

    let mut content = String::new();
    if gitignore_path.exists() {
        content = std::fs::read_to_string(&gitignore_path)?;
        if content.lines().any(|line| line.trim() == entry) {
            return Ok(());
        }
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
    }
    content.push_str(&entry);
    content.push('\n');
    std::fs::write(&gitignore_path, content)?;
    Ok(())
}
