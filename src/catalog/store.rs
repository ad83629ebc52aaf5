//! JSON-file catalog
//!
//! Shows and episodes live in a single versioned JSON document. Playback
//! fields are rewritten in place whenever an episode is saved; file presence
//! is never stored, it is checked against the downloads directory every time
//! a snapshot is taken.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::models::{Episode, Show};
use super::Catalog;
use crate::utils::media::{is_audio_file, probe_duration};

const CATALOG_VERSION: u32 = 1;

/// On-disk catalog document
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    #[serde(default)]
    shows: Vec<Show>,
}

impl Default for CatalogFile {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            shows: Vec::new(),
        }
    }
}

/// Result of importing the downloads tree
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub shows_added: usize,
    pub episodes_added: usize,
}

/// Catalog stored as JSON next to the downloads directory
pub struct JsonCatalog {
    path: PathBuf,
    downloads_dir: PathBuf,
    data: CatalogFile,
}

impl JsonCatalog {
    /// Load the catalog at `path`, or start an empty one if it does not exist
    pub fn open(path: &Path, downloads_dir: &Path) -> Result<Self> {
        let data = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read catalog from {}", path.display()))?;
            let data: CatalogFile = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse catalog {}", path.display()))?;
            debug!("Loaded catalog with {} shows", data.shows.len());
            data
        } else {
            debug!("No catalog at {}, starting empty", path.display());
            CatalogFile::default()
        };

        let mut catalog = Self {
            path: path.to_path_buf(),
            downloads_dir: downloads_dir.to_path_buf(),
            data,
        };
        catalog.fill_durations();
        Ok(catalog)
    }

    /// Downloads directory the catalog's files live in
    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    /// Write the catalog back to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create catalog directory {}", parent.display()))?;
        }

        let content =
            serde_json::to_string_pretty(&self.data).context("Failed to serialize catalog")?;

        // Write-then-rename so a crash never leaves a truncated catalog
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .with_context(|| format!("Failed to write catalog to {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace catalog {}", self.path.display()))?;

        debug!("Saved catalog to {}", self.path.display());
        Ok(())
    }

    /// Import the downloads tree: one folder per show, audio files as episodes
    ///
    /// Existing shows and episodes keep their playback state.
    pub fn scan_downloads(&mut self) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut next_show_id = self.data.shows.iter().map(|s| s.id).max().unwrap_or(0) + 1;
        let mut next_episode_id = self
            .data
            .shows
            .iter()
            .flat_map(|s| s.episodes.iter().map(|e| e.id))
            .max()
            .unwrap_or(0)
            + 1;

        let mut folders = sorted_entries(&self.downloads_dir)?;
        folders.retain(|path| path.is_dir());

        for folder in folders {
            let Some(folder_name) = folder.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let show_idx = match self
                .data
                .shows
                .iter()
                .position(|s| s.download_folder == folder_name)
            {
                Some(idx) => idx,
                None => {
                    info!("New show: {}", folder_name);
                    self.data
                        .shows
                        .push(Show::new(next_show_id, folder_name, folder_name));
                    next_show_id += 1;
                    summary.shows_added += 1;
                    self.data.shows.len() - 1
                }
            };

            for file in sorted_entries(&folder)? {
                if !file.is_file() || !is_audio_file(&file) {
                    continue;
                }
                let Some(filename) = file.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };

                let show = &mut self.data.shows[show_idx];
                if show.episodes.iter().any(|e| e.download_filename == filename) {
                    continue;
                }

                let title = file
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or(filename);
                let mut episode = Episode::new(next_episode_id, title, filename);
                episode.total_time = probe_duration(&file).unwrap_or(0);
                debug!("New episode {}: {}/{}", episode.id, folder_name, filename);

                show.episodes.push(episode);
                next_episode_id += 1;
                summary.episodes_added += 1;
            }
        }

        self.save()?;
        Ok(summary)
    }

    /// Probe durations the catalog does not know yet
    fn fill_durations(&mut self) {
        for show in &mut self.data.shows {
            let folder = self.downloads_dir.join(&show.download_folder);
            for episode in show.episodes.iter_mut().filter(|e| e.total_time == 0) {
                let path = folder.join(&episode.download_filename);
                if !path.is_file() {
                    continue;
                }
                if let Some(seconds) = probe_duration(&path) {
                    episode.total_time = seconds;
                }
            }
        }
    }
}

impl Catalog for JsonCatalog {
    fn shows(&self) -> Result<Vec<Show>> {
        let mut shows = self.data.shows.clone();
        for show in &mut shows {
            let folder = self.downloads_dir.join(&show.download_folder);
            for episode in &mut show.episodes {
                episode.is_downloaded_and_present = folder.join(&episode.download_filename).is_file();
            }
        }
        Ok(shows)
    }

    fn save_episode(&mut self, show: &Show, episode: &Episode) -> Result<()> {
        let stored = self
            .data
            .shows
            .iter_mut()
            .find(|s| s.id == show.id)
            .and_then(|s| s.episodes.iter_mut().find(|e| e.id == episode.id))
            .with_context(|| format!("Episode {} is not in the catalog", episode.id))?;

        stored.current_position = episode.current_position;
        stored.current_position_updated = episode.current_position_updated;
        stored.is_finished = episode.is_finished;

        self.save()
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to list {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to list {}", dir.display()))?;
    entries.sort();
    Ok(entries)
}
