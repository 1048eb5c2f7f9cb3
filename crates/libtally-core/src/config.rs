use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TallyError;
use crate::types::repo_id::RepoId;

/// Default minimum gap between scheduled export cycles
pub const DEFAULT_EXPORT_INTERVAL_SECS: u64 = 3600;

pub const CONFIG_FILE: &str = "config.toml";
pub const STATE_FILE: &str = "state.toml";
pub const DB_FILE: &str = "events.db";
pub const LOCK_FILE: &str = "export.lock";

/// User configuration stored in `<data_dir>/config.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Working tree of the repository the ledger is committed to
    pub export_repo: PathBuf,
    /// Remote URL wired to `origin` on init
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default = "default_interval")]
    pub export_interval_secs: u64,
    /// Salt mixed into author ids
    #[serde(default)]
    pub author_salt: String,
    /// Name recorded as `device` on exported rows
    #[serde(default = "default_device")]
    pub device: String,
    /// Repositories whose events are exported
    #[serde(default)]
    pub tracked: Vec<RepoId>,
}

fn default_interval() -> u64 {
    DEFAULT_EXPORT_INTERVAL_SECS
}

fn default_device() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

impl Config {
    pub fn new(export_repo: PathBuf, author_salt: String) -> Self {
        Self {
            export_repo,
            remote: None,
            export_interval_secs: DEFAULT_EXPORT_INTERVAL_SECS,
            author_salt,
            device: default_device(),
            tracked: Vec::new(),
        }
    }

    /// Start tracking a repository. Returns false if already tracked.
    pub fn track(&mut self, repo_id: RepoId) -> bool {
        if self.tracked.contains(&repo_id) {
            return false;
        }
        self.tracked.push(repo_id);
        self.tracked.sort();
        true
    }

    /// Stop tracking a repository. Returns false if it was not tracked.
    pub fn untrack(&mut self, repo_id: &RepoId) -> bool {
        let before = self.tracked.len();
        self.tracked.retain(|id| id != repo_id);
        self.tracked.len() != before
    }
}

/// Which repositories are exported
pub trait TrackingRegistry {
    fn is_tracked(&self, repo_id: &RepoId) -> bool;
    fn list_tracked(&self) -> Vec<RepoId>;
}

impl TrackingRegistry for Config {
    fn is_tracked(&self, repo_id: &RepoId) -> bool {
        self.tracked.contains(repo_id)
    }

    fn list_tracked(&self) -> Vec<RepoId> {
        self.tracked.clone()
    }
}

/// Scheduler state stored in `<data_dir>/state.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Completion time of the last successful export cycle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_export_unix: Option<i64>,
}

/// Resolve the data directory: `TALLY_HOME`, else `~/.tally`
pub fn default_data_dir() -> Result<PathBuf, TallyError> {
    if let Some(home) = std::env::var_os("TALLY_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            TallyError::NotFound("home directory; set TALLY_HOME or pass --data-dir".to_string())
        })?;
    Ok(PathBuf::from(home).join(".tally"))
}

/// Load config from `<data_dir>/config.toml`, `None` if not initialized
pub fn load_config(data_dir: &Path) -> Result<Option<Config>, TallyError> {
    let config_path = data_dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(Some(config))
}

/// Like [`load_config`] but a missing config is an error
pub fn require_config(data_dir: &Path) -> Result<Config, TallyError> {
    load_config(data_dir)?.ok_or_else(|| {
        TallyError::NotFound(format!(
            "config at {}",
            data_dir.join(CONFIG_FILE).display()
        ))
    })
}

pub fn save_config(data_dir: &Path, config: &Config) -> Result<(), TallyError> {
    fs::create_dir_all(data_dir)?;
    let content = toml::to_string_pretty(config)?;
    fs::write(data_dir.join(CONFIG_FILE), content)?;
    Ok(())
}

/// Load scheduler state; missing file yields the default
pub fn load_state(data_dir: &Path) -> Result<SyncState, TallyError> {
    let state_path = data_dir.join(STATE_FILE);
    if !state_path.exists() {
        return Ok(SyncState::default());
    }
    let content = fs::read_to_string(&state_path)?;
    Ok(toml::from_str(&content)?)
}

pub fn save_state(data_dir: &Path, state: &SyncState) -> Result<(), TallyError> {
    fs::create_dir_all(data_dir)?;
    let content = toml::to_string_pretty(state)?;
    fs::write(data_dir.join(STATE_FILE), content)?;
    Ok(())
}
