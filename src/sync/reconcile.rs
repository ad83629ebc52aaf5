//! Playback state reconciliation
//!
//! Positions only ever move forward: a device marker that is ahead of the
//! local position wins, one that is behind or equal is ignored.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::outcome::{IssueKind, SyncIssue};
use super::paths::RemotePathMapping;
use super::reporter::SyncReporter;
use crate::catalog::{Catalog, Episode, EpisodeId, PlaybackEvent, ProgressSink, Show};
use crate::mpd::Sticker;

/// Sticker name MPD clients use for the played position
pub const PLAYED_STICKER: &str = "played";

/// A device song carrying a played position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedMarker {
    pub remote_path: String,
    pub played_seconds: u64,
}

impl PlayedMarker {
    /// Parse `played=<seconds>` or a bare number of seconds
    pub fn parse(remote_path: &str, value: &str) -> Option<Self> {
        let raw = value
            .trim()
            .strip_prefix(PLAYED_STICKER)
            .and_then(|rest| rest.strip_prefix('='))
            .unwrap_or(value.trim());
        let played_seconds = raw
            .parse::<u64>()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().filter(|s| *s >= 0.0).map(|s| s as u64))?;
        Some(Self {
            remote_path: remote_path.to_string(),
            played_seconds,
        })
    }

    pub fn from_sticker(sticker: &Sticker) -> Option<Self> {
        if sticker.name != PLAYED_STICKER {
            return None;
        }
        Self::parse(&sticker.uri, &sticker.value)
    }
}

/// An episode selected for copying and marking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncItem {
    pub episode_id: EpisodeId,
    pub title: String,
    pub show_folder: String,
    pub filename: String,
    pub local_path: PathBuf,
    pub remote_path: String,
    pub position: u64,
    pub present: bool,
}

/// What pulling device markers changed
#[derive(Debug, Default)]
pub struct PullSummary {
    pub positions_pulled: usize,
    pub unmatched_markers: usize,
    pub issues: Vec<SyncIssue>,
}

/// Lookup from `(folder, filename)` to indices into a show list
struct EpisodeIndex {
    by_path: HashMap<String, HashMap<String, (usize, usize)>>,
}

impl EpisodeIndex {
    fn build(shows: &[Show]) -> Self {
        let mut by_path: HashMap<String, HashMap<String, (usize, usize)>> = HashMap::new();
        for (show_idx, show) in shows.iter().enumerate() {
            let files = by_path.entry(show.download_folder.clone()).or_default();
            for (episode_idx, episode) in show.episodes.iter().enumerate() {
                files.insert(episode.download_filename.clone(), (show_idx, episode_idx));
            }
        }
        Self { by_path }
    }

    fn get(&self, folder: &str, filename: &str) -> Option<(usize, usize)> {
        self.by_path.get(folder)?.get(filename).copied()
    }
}

/// Apply a marker to an episode; returns the previous position when it moved
pub fn apply_marker(episode: &mut Episode, played_seconds: u64, now: DateTime<Utc>) -> Option<u64> {
    if played_seconds <= episode.current_position {
        return None;
    }
    let previous = episode.current_position;
    episode.current_position = played_seconds;
    episode.current_position_updated = Some(now);
    episode.is_finished = true;
    Some(previous)
}

/// Merges device markers into the catalog and picks episodes to push back
#[derive(Debug, Clone)]
pub struct PlaybackReconciler {
    mapping: RemotePathMapping,
    downloads_dir: PathBuf,
}

impl PlaybackReconciler {
    pub fn new(mapping: RemotePathMapping, downloads_dir: &Path) -> Self {
        Self {
            mapping,
            downloads_dir: downloads_dir.to_path_buf(),
        }
    }

    pub fn mapping(&self) -> &RemotePathMapping {
        &self.mapping
    }

    /// Pull device markers into `shows`, persisting every changed episode
    ///
    /// Save and report failures are recorded and processing moves on to the
    /// next marker.
    pub fn pull_remote(
        &self,
        shows: &mut [Show],
        markers: &[PlayedMarker],
        catalog: &mut dyn Catalog,
        sink: &dyn ProgressSink,
        reporter: &SyncReporter,
        now: DateTime<Utc>,
    ) -> PullSummary {
        let index = EpisodeIndex::build(shows);
        let mut summary = PullSummary::default();

        for marker in markers {
            let Some((show_idx, episode_idx)) = self
                .mapping
                .resolve(&marker.remote_path)
                .and_then(|(folder, filename)| index.get(folder, filename))
            else {
                debug!("No local episode for device file {}", marker.remote_path);
                summary.unmatched_markers += 1;
                summary.issues.push(SyncIssue::new(
                    IssueKind::MarkerResolutionMiss,
                    marker.remote_path.clone(),
                ));
                continue;
            };

            let show = &mut shows[show_idx];
            let episode = &mut show.episodes[episode_idx];
            let Some(previous) = apply_marker(episode, marker.played_seconds, now) else {
                debug!(
                    "Keeping local position {}s for {} (device has {}s)",
                    episode.current_position, episode.title, marker.played_seconds
                );
                continue;
            };

            summary.positions_pulled += 1;
            reporter.info(format!(
                "{}: played on device up to {}s (was {}s)",
                episode.title, marker.played_seconds, previous
            ));

            let show = &shows[show_idx];
            let episode = &show.episodes[episode_idx];

            if let Err(e) = catalog.save_episode(show, episode) {
                reporter.warn(format!("Could not save {}: {:#}", episode.title, e));
                summary
                    .issues
                    .push(SyncIssue::new(IssueKind::PersistFailure, format!("{}: {:#}", episode.title, e)));
            }

            let event = PlaybackEvent {
                episode_id: episode.id,
                show_folder: show.download_folder.clone(),
                filename: episode.download_filename.clone(),
                started: previous,
                position: episode.current_position,
                total: episode.total_time,
                timestamp: now,
            };
            if let Err(e) = sink.report_progress(&event) {
                reporter.warn(format!("Could not report progress of {}: {:#}", episode.title, e));
                summary.issues.push(SyncIssue::new(
                    IssueKind::ProgressReportFailure,
                    format!("{}: {:#}", episode.title, e),
                ));
            }
        }

        if summary.unmatched_markers > 0 {
            info!(
                "{} device markers do not match any local episode",
                summary.unmatched_markers
            );
        }
        summary
    }

    /// Episodes played here, from the whole catalog or from `subset`
    pub fn played_here(&self, shows: &[Show], subset: Option<&[EpisodeId]>) -> Vec<SyncItem> {
        let wanted: Option<HashSet<EpisodeId>> = subset.map(|ids| ids.iter().copied().collect());
        shows
            .iter()
            .flat_map(|show| show.episodes.iter().map(move |episode| (show, episode)))
            .filter(|(_, episode)| wanted.as_ref().is_none_or(|ids| ids.contains(&episode.id)))
            .filter(|(_, episode)| episode.is_played_here())
            .map(|(show, episode)| self.item(show, episode))
            .collect()
    }

    /// Look up explicit episodes, warning about unknown ids
    pub fn select(&self, shows: &[Show], ids: &[EpisodeId], reporter: &SyncReporter) -> Vec<SyncItem> {
        let mut items = Vec::new();
        for id in ids {
            let found = shows.iter().find_map(|show| {
                show.episodes
                    .iter()
                    .find(|e| e.id == *id)
                    .map(|episode| (show, episode))
            });
            match found {
                Some((show, episode)) => items.push(self.item(show, episode)),
                None => reporter.warn(format!("Episode {} is not in the catalog", id)),
            }
        }
        items
    }

    fn item(&self, show: &Show, episode: &Episode) -> SyncItem {
        SyncItem {
            episode_id: episode.id,
            title: episode.title.clone(),
            show_folder: show.download_folder.clone(),
            filename: episode.download_filename.clone(),
            local_path: show.episode_path(&self.downloads_dir, episode),
            remote_path: self
                .mapping
                .remote_path(&show.download_folder, &episode.download_filename),
            position: episode.current_position,
            present: episode.is_downloaded_and_present,
        }
    }
}
