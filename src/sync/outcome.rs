//! Result of a sync run

use std::fmt;

use super::orchestrator::SyncPhase;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Played state pushed and files mirrored
    FullySynced,
    /// Played state reached the device but a later file transfer failed
    PartiallySynced { reason: String },
    Aborted { phase: SyncPhase, reason: String },
}

/// Non-fatal problems recorded during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// A device marker that maps to no local episode
    MarkerResolutionMiss,
    MarkerWriteFailure,
    PersistFailure,
    ProgressReportFailure,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueKind::MarkerResolutionMiss => "unmatched marker",
            IssueKind::MarkerWriteFailure => "marker write failed",
            IssueKind::PersistFailure => "catalog save failed",
            IssueKind::ProgressReportFailure => "progress report failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncIssue {
    pub kind: IssueKind,
    pub detail: String,
}

impl SyncIssue {
    pub fn new(kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Everything a run did, reported once it ends
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub status: RunStatus,
    /// Local positions advanced from device markers
    pub positions_pulled: usize,
    pub unmatched_markers: usize,
    pub episodes_copied: usize,
    /// Episodes skipped because the device already had them
    pub already_present: usize,
    pub markers_written: usize,
    pub files_sent: usize,
    pub files_deleted: usize,
    /// Transfer command lines, in the order they ran
    pub commands: Vec<String>,
    pub issues: Vec<SyncIssue>,
}

impl Default for SyncOutcome {
    fn default() -> Self {
        Self {
            status: RunStatus::FullySynced,
            positions_pulled: 0,
            unmatched_markers: 0,
            episodes_copied: 0,
            already_present: 0,
            markers_written: 0,
            files_sent: 0,
            files_deleted: 0,
            commands: Vec::new(),
            issues: Vec::new(),
        }
    }
}

impl SyncOutcome {
    pub fn issues_of(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }
}
