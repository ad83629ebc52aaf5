//! Audio file inspection

use lofty::prelude::*;
use lofty::probe::Probe;
use std::path::Path;
use tracing::debug;

/// Audio file extensions treated as episodes
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "m4b", "aac", "ogg", "oga", "opus", "flac", "wav"];

/// Whether the path looks like an audio file
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(ext)))
}

/// Duration of an audio file in whole seconds, if it can be read
pub fn probe_duration(path: &Path) -> Option<u64> {
    match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(tagged) => {
            let seconds = tagged.properties().duration().as_secs();
            (seconds > 0).then_some(seconds)
        }
        Err(e) => {
            debug!("Could not read duration of {}: {}", path.display(), e);
            None
        }
    }
}
