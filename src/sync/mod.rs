//! Sync engine module

mod orchestrator;
mod outcome;
mod paths;
mod reconcile;
mod reporter;

pub use orchestrator::{
    RunControl, SyncOrchestrator, SyncPhase, SyncRequest, SyncServices, SyncSettings,
};
pub use outcome::{IssueKind, RunStatus, SyncOutcome};
pub use paths::RemotePathMapping;
pub use reconcile::{PLAYED_STICKER, PlaybackReconciler, PlayedMarker};
pub use reporter::{Notice, Severity, StatusIcon, SyncEvent, SyncReporter};
