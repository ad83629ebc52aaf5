//! Local podcast catalog

pub mod actions;
pub mod models;
pub mod store;

use anyhow::Result;

pub use actions::EpisodeActionLog;
pub use models::{Episode, EpisodeId, PlaybackEvent, Show};
pub use store::JsonCatalog;

/// Storage for shows and their episodes' playback state
pub trait Catalog: Send {
    /// Snapshot of every show, with file presence freshly computed
    fn shows(&self) -> Result<Vec<Show>>;

    /// Persist the playback fields of one episode
    fn save_episode(&mut self, show: &Show, episode: &Episode) -> Result<()>;
}

/// Receives playback progress for listening statistics
pub trait ProgressSink: Send + Sync {
    fn report_progress(&self, event: &PlaybackEvent) -> Result<()>;
}
