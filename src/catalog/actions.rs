//! Episode action log
//!
//! Playback progress is appended as one JSON object per line, in the shape
//! podcast sync services use for "play" episode actions.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use super::ProgressSink;
use super::models::PlaybackEvent;

#[derive(Debug, Serialize)]
struct EpisodeAction<'a> {
    podcast: &'a str,
    episode: &'a str,
    action: &'static str,
    timestamp: String,
    started: u64,
    position: u64,
    total: u64,
}

/// Append-only JSONL file of playback actions
pub struct EpisodeActionLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl EpisodeActionLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProgressSink for EpisodeActionLog {
    fn report_progress(&self, event: &PlaybackEvent) -> Result<()> {
        let action = EpisodeAction {
            podcast: &event.show_folder,
            episode: &event.filename,
            action: "play",
            timestamp: event.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
            started: event.started,
            position: event.position,
            total: event.total,
        };
        let mut line = serde_json::to_string(&action).context("Failed to encode episode action")?;
        line.push('\n');

        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("Episode action log lock poisoned"))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;

        debug!(
            "Logged play action for {}/{}: {} -> {}",
            event.show_folder, event.filename, event.started, event.position
        );
        Ok(())
    }
}
