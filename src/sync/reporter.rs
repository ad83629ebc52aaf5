//! Progress reporting for a sync run
//!
//! Every message a run produces goes both to `tracing` and, when a front end
//! is attached, over an unbounded channel as a [`SyncEvent`].

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::orchestrator::SyncPhase;
use super::outcome::SyncOutcome;

/// Icon hint for the status indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusIcon {
    Network,
    Authentication,
    Download,
    Upload,
    Error,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

/// User-facing notifications raised during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// Played state is on the device; the mirror pass may still be running
    ResumePlayback,
    FullySynced,
}

impl Notice {
    pub fn title(&self) -> &'static str {
        match self {
            Notice::ResumePlayback => "Playback state synced",
            Notice::FullySynced => "Sync complete",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Notice::ResumePlayback => "You may resume playback on the device",
            Notice::FullySynced => "Podcasts are fully synced",
        }
    }
}

/// Events sent to the console or window front end
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Run entered a new phase
    Status {
        phase: SyncPhase,
        icon: StatusIcon,
        message: String,
    },
    Log {
        severity: Severity,
        message: String,
    },
    /// One line of transfer tool output
    Output { line: String },
    Notification(Notice),
    Finished(SyncOutcome),
}

/// Reporter handed to every step of a run
#[derive(Debug, Clone)]
pub struct SyncReporter {
    tx: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl SyncReporter {
    pub fn new(tx: mpsc::UnboundedSender<SyncEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Reporter that only logs
    #[cfg(test)]
    pub fn detached() -> Self {
        Self { tx: None }
    }

    fn send(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            // Front end may have been closed; the run keeps going
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, phase: SyncPhase, icon: StatusIcon, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", phase, message);
        self.send(SyncEvent::Status {
            phase,
            icon,
            message,
        });
    }

    pub fn debug(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("{}", message);
        self.log(Severity::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.log(Severity::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.log(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.log(Severity::Error, message);
    }

    fn log(&self, severity: Severity, message: String) {
        self.send(SyncEvent::Log { severity, message });
    }

    /// Forward a line of transfer output
    pub fn output(&self, line: &str) {
        debug!("rsync: {}", line);
        self.send(SyncEvent::Output {
            line: line.to_string(),
        });
    }

    pub fn notify(&self, notice: Notice) {
        info!("{}: {}", notice.title(), notice.message());
        self.send(SyncEvent::Notification(notice));
    }

    pub fn finish(&self, outcome: SyncOutcome) {
        self.send(SyncEvent::Finished(outcome));
    }
}
