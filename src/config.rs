//! Sync configuration persistence
//!
//! Stores the device address and transfer settings in
//! ~/.config/podsync/config.json. Every key has a default so a partial or
//! missing file still yields a usable configuration.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

const APP_DIR: &str = "podsync";

/// Persistent sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Device host running MPD and sshd
    pub host: String,
    /// MPD port
    pub port: u16,
    /// ssh user rsync logs in as
    pub rsync_user: String,
    /// Absolute podcast directory on the device
    pub rsync_root_folder: String,
    /// MPD-relative path of the podcast directory
    pub mpd_prefix: String,
    pub connect_timeout_secs: u64,
    /// Upper bound on waiting for the device to index copied files
    pub rescan_wait_secs: u64,
    /// Local directory holding one folder per show
    pub downloads_dir: PathBuf,
    pub catalog_path: PathBuf,
    pub rsync_program: String,
    pub ssh_add_program: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self {
            host: "192.168.1.15".to_string(),
            port: 6600,
            rsync_user: "pi".to_string(),
            rsync_root_folder: "/var/lib/mpd/music/Podcasts/".to_string(),
            mpd_prefix: "Podcasts".to_string(),
            connect_timeout_secs: 10,
            rescan_wait_secs: 30,
            downloads_dir: data_dir.join("downloads"),
            catalog_path: data_dir.join("catalog.json"),
            rsync_program: "rsync".to_string(),
            ssh_add_program: "ssh-add".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load the config from its default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load and validate a config file, falling back to defaults when absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        config.normalize();
        config.validate()?;

        debug!("Loaded config for {}:{}", config.host, config.port);
        Ok(config)
    }

    /// Save the config to its default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {}", parent.display()))?;
        }

        let contents =
            serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        debug!("Saved config to {}", path.display());
        Ok(())
    }

    /// Get the config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join(APP_DIR).join("config.json"))
    }

    /// Path of the playback action log, next to the catalog
    pub fn action_log_path(&self) -> PathBuf {
        self.catalog_path
            .parent()
            .map(|dir| dir.join("episode_actions.jsonl"))
            .unwrap_or_else(|| PathBuf::from("episode_actions.jsonl"))
    }

    /// Apply one-off host/port overrides from flags or the environment
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Result<Self> {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self.validate()?;
        Ok(self)
    }

    /// Trim slashes off the MPD prefix
    pub fn normalize(&mut self) {
        self.mpd_prefix = self.mpd_prefix.trim_matches('/').to_string();
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.port == 0 {
            bail!("port must be non-zero");
        }
        if !self.rsync_root_folder.starts_with('/') {
            bail!(
                "rsync_root_folder must be an absolute path, got '{}'",
                self.rsync_root_folder
            );
        }
        if self.mpd_prefix.trim_matches('/').is_empty() {
            bail!("mpd_prefix must not be empty");
        }
        Ok(())
    }

    /// rsync destination `user@host:/root/`, always with a trailing slash
    pub fn rsync_destination(&self) -> String {
        let root = if self.rsync_root_folder.ends_with('/') {
            self.rsync_root_folder.clone()
        } else {
            format!("{}/", self.rsync_root_folder)
        };
        format!("{}@{}:{}", self.rsync_user, self.host, root)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn rescan_wait(&self) -> Duration {
        Duration::from_secs(self.rescan_wait_secs)
    }
}
