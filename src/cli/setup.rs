//! Interactive configuration of the device connection

use anyhow::{Context, Result};
use dialoguer::{Confirm, Input};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SyncConfig;
use crate::mpd::{MpdConnector, RemoteStateClient};

/// Walks the user through the settings and saves them
pub struct SetupWizard;

impl SetupWizard {
    /// Prompt for each setting, using the current value as default
    ///
    /// Values given on the command line are taken as-is.
    pub async fn run(host: Option<String>, port: Option<u16>, force: bool) -> Result<SyncConfig> {
        let path = SyncConfig::config_path()?;
        let current = SyncConfig::load()?;
        if !force && path.exists() && host.is_none() && port.is_none() {
            let reconfigure = Confirm::new()
                .with_prompt(format!("{} exists. Reconfigure?", path.display()))
                .default(false)
                .interact()
                .context("Failed to read answer")?;
            if !reconfigure {
                info!("Keeping existing configuration");
                return Ok(current);
            }
        } else {
            debug!("Writing configuration to {}", path.display());
        }

        let host = match host {
            Some(host) => host,
            None => Input::new()
                .with_prompt("Device host")
                .default(current.host.clone())
                .interact_text()
                .context("Failed to read host")?,
        };
        let port = match port {
            Some(port) => port,
            None => Input::new()
                .with_prompt("MPD port")
                .default(current.port)
                .interact_text()
                .context("Failed to read port")?,
        };
        let rsync_user: String = Input::new()
            .with_prompt("ssh user on the device")
            .default(current.rsync_user.clone())
            .interact_text()
            .context("Failed to read user")?;
        let rsync_root_folder: String = Input::new()
            .with_prompt("Podcast folder on the device")
            .default(current.rsync_root_folder.clone())
            .interact_text()
            .context("Failed to read folder")?;
        let mpd_prefix: String = Input::new()
            .with_prompt("Same folder as seen by MPD")
            .default(current.mpd_prefix.clone())
            .interact_text()
            .context("Failed to read prefix")?;
        let downloads_dir: String = Input::new()
            .with_prompt("Local downloads folder")
            .default(current.downloads_dir.display().to_string())
            .interact_text()
            .context("Failed to read downloads folder")?;

        let mut config = SyncConfig {
            host,
            port,
            rsync_user,
            rsync_root_folder,
            mpd_prefix,
            downloads_dir: PathBuf::from(downloads_dir),
            ..current
        };
        config.normalize();
        config.validate()?;

        Self::verify(&config).await?;

        config.save()?;
        info!("Configuration saved to {}", path.display());
        Ok(config)
    }

    /// Check that MPD answers at the configured address
    async fn verify(config: &SyncConfig) -> Result<()> {
        let connector = MpdConnector::new(&config.host, config.port, config.connect_timeout());
        let client = RemoteStateClient::connect(Arc::new(connector))
            .await
            .context("Could not reach MPD with these settings")?;
        info!("Connected to MPD {} at {}", client.server_version(), client.address());
        Ok(())
    }
}
