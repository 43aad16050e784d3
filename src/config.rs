// src/config.rs

//! Engine configuration
//!
//! Loaded from TOML by the caller (file discovery belongs to the front end).
//! Every field has a default so partial documents are accepted.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "var/lib/strata/strata.db";
const DEFAULT_CACHE_DIR: &str = "var/cache/strata/packages";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Target root filesystem
    pub root: PathBuf,
    /// Local package database
    pub db_path: PathBuf,
    /// Downloaded artifacts
    pub cache_dir: PathBuf,
    /// Root lock file; next to the database when unset
    pub lock_path: Option<PathBuf>,
    /// Directories searched for artifacts before downloading
    pub local_repos: Vec<PathBuf>,
    /// Base URL artifacts are fetched from
    pub mirror: Option<String>,
    pub scriptlet_timeout_secs: u64,
    /// Time between SIGTERM and SIGKILL for a timed out scriptlet
    pub kill_grace_millis: u64,
    /// Output polling interval while a scriptlet runs
    pub poll_interval_millis: u64,
    pub download_workers: usize,
    pub run_scriptlets: bool,
    /// Credentials embedded scriptlets drop to after entering the root
    pub scriptlet_user: Option<u32>,
    pub scriptlet_group: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_root("/")
    }
}

impl EngineConfig {
    /// Configuration with database, cache and lock placed under `root`
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            root: root.to_path_buf(),
            db_path: root.join(DEFAULT_DB_PATH),
            cache_dir: root.join(DEFAULT_CACHE_DIR),
            lock_path: None,
            local_repos: Vec::new(),
            mirror: None,
            scriptlet_timeout_secs: 60,
            kill_grace_millis: 3000,
            poll_interval_millis: 50,
            download_workers: 4,
            run_scriptlets: true,
            scriptlet_user: None,
            scriptlet_group: None,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(s).map_err(|e| Error::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    fn validate(&self) -> Result<()> {
        if !self.root.is_absolute() {
            return Err(Error::Config(format!(
                "root must be absolute: {}",
                self.root.display()
            )));
        }
        if self.download_workers == 0 {
            return Err(Error::Config("download_workers must be at least 1".to_string()));
        }
        if self.poll_interval_millis == 0 {
            return Err(Error::Config("poll_interval_millis must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn lock_path(&self) -> PathBuf {
        match &self.lock_path {
            Some(path) => path.clone(),
            None => self
                .db_path
                .parent()
                .unwrap_or_else(|| Path::new("/"))
                .join("strata.lock"),
        }
    }

    pub fn scriptlet_timeout(&self) -> Duration {
        Duration::from_secs(self.scriptlet_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_millis)
    }
}
