//! Shows and episodes tracked in the local catalog

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Catalog-wide episode identifier
pub type EpisodeId = u64;

/// A podcast with its downloaded episodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    pub id: u64,
    pub title: String,
    /// Folder below the downloads directory, unique per show
    pub download_folder: String,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

/// A single episode and its local playback state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: EpisodeId,
    pub title: String,
    pub download_filename: String,
    /// Playback position in seconds
    #[serde(default)]
    pub current_position: u64,
    #[serde(default)]
    pub current_position_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_finished: bool,
    /// Duration in seconds, 0 when unknown
    #[serde(default)]
    pub total_time: u64,
    /// Whether the file exists in the downloads directory (computed on load)
    #[serde(skip)]
    pub is_downloaded_and_present: bool,
}

impl Show {
    pub fn new(id: u64, title: &str, download_folder: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            download_folder: download_folder.to_string(),
            episodes: Vec::new(),
        }
    }

    /// Local path of one of this show's episodes
    pub fn episode_path(&self, downloads_dir: &Path, episode: &Episode) -> PathBuf {
        downloads_dir
            .join(&self.download_folder)
            .join(&episode.download_filename)
    }
}

impl Episode {
    pub fn new(id: EpisodeId, title: &str, download_filename: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            download_filename: download_filename.to_string(),
            current_position: 0,
            current_position_updated: None,
            is_finished: false,
            total_time: 0,
            is_downloaded_and_present: false,
        }
    }

    /// Started locally but not finished: its position is worth pushing
    pub fn is_played_here(&self) -> bool {
        self.is_downloaded_and_present && !self.is_finished && self.current_position > 0
    }
}

/// A playback position change, reported to the listening statistics sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackEvent {
    pub episode_id: EpisodeId,
    pub show_folder: String,
    pub filename: String,
    /// Position before the change
    pub started: u64,
    /// Position after the change
    pub position: u64,
    pub total: u64,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn episode(present: bool, finished: bool, position: u64) -> Episode {
        Episode {
            current_position: position,
            is_finished: finished,
            is_downloaded_and_present: present,
            ..Episode::new(1, "Episode", "ep.mp3")
        }
    }

    #[test]
    fn test_played_here_predicate() {
        assert!(episode(true, false, 42).is_played_here());
        assert!(!episode(true, true, 42).is_played_here());
        assert!(!episode(false, false, 42).is_played_here());
        assert!(!episode(true, false, 0).is_played_here());
    }

    #[test]
    fn test_episode_path() {
        let show = Show::new(1, "Show A", "ShowA");
        let ep = Episode::new(1, "One", "ep1.mp3");
        assert_eq!(
            show.episode_path(Path::new("/data/downloads"), &ep),
            PathBuf::from("/data/downloads/ShowA/ep1.mp3")
        );
    }
}
