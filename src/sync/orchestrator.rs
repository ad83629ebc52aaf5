//! Sync run orchestration
//!
//! A run moves through `Initializing -> Gating -> Reconciling ->
//! Transferring -> Marking -> Done`, or ends `Aborted` from any of them.
//! Only one run may be active per orchestrator. Runs execute on their own
//! tokio task and talk to the front end through [`SyncEvent`]s.

use chrono::Utc;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::debug;

use super::outcome::{IssueKind, RunStatus, SyncIssue, SyncOutcome};
use super::paths::RemotePathMapping;
use super::reconcile::{PLAYED_STICKER, PlaybackReconciler, PlayedMarker, SyncItem};
use super::reporter::{Notice, StatusIcon, SyncEvent, SyncReporter};
use crate::catalog::{Catalog, EpisodeId, ProgressSink};
use crate::mpd::{Connector, RemoteError, RemoteStateClient};
use crate::transfer::{CredentialGate, Transfer, TransferError, TransferJob, TransferReport};

/// Run state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Initializing,
    Gating,
    Reconciling,
    Transferring,
    Marking,
    Done,
    Aborted,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Initializing => "initializing",
            SyncPhase::Gating => "gating",
            SyncPhase::Reconciling => "reconciling",
            SyncPhase::Transferring => "transferring",
            SyncPhase::Marking => "marking",
            SyncPhase::Done => "done",
            SyncPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Errors that end a run
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Connection(#[from] RemoteError),

    #[error("no ssh key loaded: run ssh-add first")]
    CredentialUnavailable,

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("could not load the catalog: {0:#}")]
    Catalog(anyhow::Error),

    #[error("cancelled")]
    Cancelled,
}

/// What to sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncRequest {
    /// Explicit episodes; `None` syncs everything
    pub episodes: Option<Vec<EpisodeId>>,
}

impl SyncRequest {
    pub fn full() -> Self {
        Self::default()
    }

    pub fn subset(episodes: Vec<EpisodeId>) -> Self {
        Self {
            episodes: Some(episodes),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub mapping: RemotePathMapping,
    pub downloads_dir: PathBuf,
    /// Upper bound on waiting for the device database rescan
    pub rescan_wait: Duration,
}

/// Collaborators a run talks to
#[derive(Clone)]
pub struct SyncServices {
    pub connector: Arc<dyn Connector>,
    pub gate: Arc<dyn CredentialGate>,
    pub transfer: Arc<dyn Transfer>,
    pub catalog: Arc<Mutex<dyn Catalog>>,
    pub progress: Arc<dyn ProgressSink>,
}

/// Starts sync runs, at most one at a time
pub struct SyncOrchestrator {
    services: SyncServices,
    settings: SyncSettings,
    running: Arc<AtomicBool>,
}

/// Clears the in-progress flag when a run task ends, however it ends
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Handle to a started run
pub struct SyncHandle {
    pub events: mpsc::UnboundedReceiver<SyncEvent>,
    pub control: RunControl,
}

impl SyncHandle {
    pub fn into_parts(self) -> (mpsc::UnboundedReceiver<SyncEvent>, RunControl) {
        (self.events, self.control)
    }
}

/// Cancellation and completion of a started run
pub struct RunControl {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<SyncOutcome>,
}

impl RunControl {
    /// Request cancellation; honored at the next step boundary
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Wait for the run to end
    pub async fn wait(self) -> SyncOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => SyncOutcome {
                status: RunStatus::Aborted {
                    phase: SyncPhase::Idle,
                    reason: format!("sync task failed: {}", e),
                },
                ..SyncOutcome::default()
            },
        }
    }
}

impl SyncOrchestrator {
    pub fn new(services: SyncServices, settings: SyncSettings) -> Self {
        Self {
            services,
            settings,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start a run in the background
    pub fn start(&self, request: SyncRequest) -> Result<SyncHandle, SyncError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::AlreadyRunning);
        }
        let guard = RunGuard(self.running.clone());

        let (tx, events) = mpsc::unbounded_channel();
        let cancel = Arc::new(AtomicBool::new(false));
        let run = SyncRun {
            services: self.services.clone(),
            reconciler: PlaybackReconciler::new(
                self.settings.mapping.clone(),
                &self.settings.downloads_dir,
            ),
            settings: self.settings.clone(),
            reporter: SyncReporter::new(tx),
            cancel: cancel.clone(),
            phase: SyncPhase::Idle,
            state_pushed: false,
            outcome: SyncOutcome::default(),
        };

        let task = tokio::spawn(async move {
            let _guard = guard;
            run.execute(request).await
        });

        Ok(SyncHandle {
            events,
            control: RunControl { cancel, task },
        })
    }
}

/// State of one run
struct SyncRun {
    services: SyncServices,
    settings: SyncSettings,
    reconciler: PlaybackReconciler,
    reporter: SyncReporter,
    cancel: Arc<AtomicBool>,
    phase: SyncPhase,
    /// Played markers have been written to the device
    state_pushed: bool,
    outcome: SyncOutcome,
}

impl SyncRun {
    async fn execute(mut self, request: SyncRequest) -> SyncOutcome {
        let result = self.steps(&request).await;
        if let Err(SyncError::Transfer(e)) = &result {
            self.outcome.commands.push(e.command().to_string());
        }

        self.outcome.status = match result {
            Ok(()) => {
                self.enter(SyncPhase::Done, StatusIcon::Done, "Fully synced");
                self.reporter.notify(Notice::FullySynced);
                RunStatus::FullySynced
            }
            Err(SyncError::Transfer(e)) if self.state_pushed => {
                let reason = e.to_string();
                self.reporter.error(format!("Mirror failed: {}", reason));
                self.enter(
                    SyncPhase::Done,
                    StatusIcon::Error,
                    "Played state synced, file transfer failed",
                );
                RunStatus::PartiallySynced { reason }
            }
            Err(e) => {
                let phase = self.phase;
                let reason = e.to_string();
                self.reporter.error(format!("Sync aborted while {}: {}", phase, reason));
                self.enter(SyncPhase::Aborted, StatusIcon::Error, reason.clone());
                RunStatus::Aborted { phase, reason }
            }
        };

        self.reporter.finish(self.outcome.clone());
        self.outcome
    }

    fn enter(&mut self, phase: SyncPhase, icon: StatusIcon, message: impl Into<String>) {
        self.phase = phase;
        self.reporter.status(phase, icon, message);
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn steps(&mut self, request: &SyncRequest) -> Result<(), SyncError> {
        self.enter(SyncPhase::Initializing, StatusIcon::Network, "Loading catalog");
        let mut shows = self
            .services
            .catalog
            .lock()
            .await
            .shows()
            .map_err(SyncError::Catalog)?;
        debug!("Catalog snapshot: {} shows", shows.len());
        self.check_cancelled()?;

        self.enter(
            SyncPhase::Initializing,
            StatusIcon::Network,
            format!("Connecting to {}", self.services.connector.address()),
        );
        let mut client = RemoteStateClient::connect(self.services.connector.clone()).await?;
        self.reporter
            .debug(format!("Connected to MPD {}", client.server_version()));

        self.enter(
            SyncPhase::Gating,
            StatusIcon::Authentication,
            format!("Checking {}", self.services.gate.describe()),
        );
        if !self.services.gate.check().await {
            return Err(SyncError::CredentialUnavailable);
        }
        self.check_cancelled()?;

        self.enter(SyncPhase::Reconciling, StatusIcon::Download, "Reading played state from device");
        let stickers = client.find_stickers("", PLAYED_STICKER).await?;
        let mut markers = Vec::with_capacity(stickers.len());
        for sticker in &stickers {
            match PlayedMarker::from_sticker(sticker) {
                Some(marker) => markers.push(marker),
                None => {
                    self.reporter.warn(format!(
                        "Ignoring unreadable marker on {}: {}",
                        sticker.uri, sticker.value
                    ));
                    self.outcome.unmatched_markers += 1;
                    self.outcome
                        .issues
                        .push(SyncIssue::new(IssueKind::MarkerResolutionMiss, sticker.uri.clone()));
                }
            }
        }

        let summary = {
            let mut catalog = self.services.catalog.lock().await;
            self.reconciler.pull_remote(
                &mut shows,
                &markers,
                &mut *catalog,
                self.services.progress.as_ref(),
                &self.reporter,
                Utc::now(),
            )
        };
        self.outcome.positions_pulled = summary.positions_pulled;
        self.outcome.unmatched_markers += summary.unmatched_markers;
        self.outcome.issues.extend(summary.issues);

        let (copy_items, mark_items) = match &request.episodes {
            None => {
                let played = self.reconciler.played_here(&shows, None);
                (played.clone(), played)
            }
            Some(ids) => (
                self.reconciler.select(&shows, ids, &self.reporter),
                self.reconciler.played_here(&shows, Some(ids)),
            ),
        };
        self.reporter.info(format!(
            "{} played on device, {} to copy, {} to mark",
            self.outcome.positions_pulled,
            copy_items.len(),
            mark_items.len()
        ));
        self.check_cancelled()?;

        self.copy_episodes(&mut client, &copy_items).await?;
        self.mark_played(&mut client, &mark_items).await?;

        if request.episodes.is_none() {
            self.reporter.notify(Notice::ResumePlayback);
            self.mirror(&mut client).await?;
        }

        Ok(())
    }

    /// Copy episodes the device does not have yet
    async fn copy_episodes(
        &mut self,
        client: &mut RemoteStateClient,
        items: &[SyncItem],
    ) -> Result<(), SyncError> {
        if items.is_empty() {
            return Ok(());
        }
        self.enter(
            SyncPhase::Transferring,
            StatusIcon::Upload,
            format!("Copying {} episodes", items.len()),
        );

        let mut copied = 0;
        for item in items {
            self.check_cancelled()?;

            if !item.present {
                self.reporter.warn(format!(
                    "{} is not downloaded, skipping",
                    item.local_path.display()
                ));
                continue;
            }

            match client.file_exists(&item.remote_path).await {
                Ok(true) => {
                    self.reporter
                        .info(format!("{} is already on the device", item.title));
                    self.outcome.already_present += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) if e.is_connection_failure() => return Err(e.into()),
                Err(e) => {
                    self.reporter.warn(format!(
                        "Could not check {} on the device ({}), copying anyway",
                        item.remote_path, e
                    ));
                }
            }

            let job = TransferJob::Copy {
                file: item.local_path.clone(),
                show_folder: item.show_folder.clone(),
            };
            let report = self.services.transfer.run(&job, &self.reporter).await?;
            self.record_transfer(report);
            self.outcome.episodes_copied += 1;
            copied += 1;
        }

        if copied > 0 {
            self.rescan(client).await;
        }
        Ok(())
    }

    /// Write played markers for the given episodes
    async fn mark_played(
        &mut self,
        client: &mut RemoteStateClient,
        items: &[SyncItem],
    ) -> Result<(), SyncError> {
        self.check_cancelled()?;
        self.enter(
            SyncPhase::Marking,
            StatusIcon::Upload,
            format!("Marking {} episodes as played", items.len()),
        );

        for item in items {
            let value = item.position.to_string();
            match client.set_sticker(&item.remote_path, PLAYED_STICKER, &value).await {
                Ok(()) => {
                    self.reporter.debug(format!(
                        "Marked {} played at {}s",
                        item.remote_path, item.position
                    ));
                    self.outcome.markers_written += 1;
                }
                Err(e) => {
                    self.reporter
                        .warn(format!("Could not mark {}: {}", item.remote_path, e));
                    self.outcome.issues.push(SyncIssue::new(
                        IssueKind::MarkerWriteFailure,
                        format!("{}: {}", item.remote_path, e),
                    ));
                }
            }
        }

        self.state_pushed = true;
        Ok(())
    }

    /// Mirror the whole downloads directory
    async fn mirror(&mut self, client: &mut RemoteStateClient) -> Result<(), SyncError> {
        self.check_cancelled()?;
        self.enter(SyncPhase::Transferring, StatusIcon::Upload, "Mirroring downloads");

        let job = TransferJob::Mirror {
            source: self.settings.downloads_dir.clone(),
        };
        let report = self.services.transfer.run(&job, &self.reporter).await?;
        self.record_transfer(report);

        self.rescan(client).await;
        Ok(())
    }

    fn record_transfer(&mut self, report: TransferReport) {
        self.outcome.files_sent += report.files_sent;
        self.outcome.files_deleted += report.files_deleted;
        self.outcome.commands.push(report.command);
    }

    /// Ask the device to index new files and wait for it, within limits
    async fn rescan(&mut self, client: &mut RemoteStateClient) {
        self.reporter.info("Updating device database");
        let result = match client.trigger_rescan().await {
            Ok(()) => client.wait_for_rescan(self.settings.rescan_wait).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(true) => self.reporter.debug("Device database updated"),
            Ok(false) => self.reporter.warn(format!(
                "Device database still updating after {}s, continuing",
                self.settings.rescan_wait.as_secs()
            )),
            Err(e) => self
                .reporter
                .warn(format!("Could not update device database: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Show;
    use crate::mpd::remote::Session;
    use crate::mpd::protocol::{Ack, Operation, Reply, Sticker};
    use crate::sync::reconcile::tests::{MemoryCatalog, RecordingSink, sample_shows};
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Device state shared by stub sessions and the stub transfer
    #[derive(Default)]
    struct Device {
        stickers: HashMap<String, String>,
        /// Paths relative to the MPD music directory
        files: BTreeSet<String>,
        operations: Vec<String>,
        connects: usize,
        refuse_connections: bool,
        reject_stickers_for: Option<String>,
    }

    type SharedDevice = Arc<StdMutex<Device>>;

    struct StubConnector {
        device: SharedDevice,
    }

    struct StubSession {
        device: SharedDevice,
    }

    #[async_trait]
    impl Connector for StubConnector {
        async fn connect(&self) -> Result<Box<dyn Session>, RemoteError> {
            let mut device = self.device.lock().unwrap();
            device.connects += 1;
            if device.refuse_connections {
                return Err(RemoteError::ConnectionFailure {
                    addr: self.address(),
                    reason: "connection refused".into(),
                });
            }
            Ok(Box::new(StubSession {
                device: self.device.clone(),
            }))
        }

        fn address(&self) -> String {
            "player:6600".into()
        }
    }

    #[async_trait]
    impl Session for StubSession {
        async fn execute(&mut self, op: &Operation) -> Result<Reply, RemoteError> {
            let mut device = self.device.lock().unwrap();
            device.operations.push(op.name().to_string());
            match op {
                Operation::FindStickers { name, .. } => Ok(Reply::Stickers(
                    device
                        .stickers
                        .iter()
                        .map(|(uri, value)| Sticker {
                            uri: uri.clone(),
                            name: name.clone(),
                            value: value.clone(),
                        })
                        .collect(),
                )),
                Operation::SetSticker { uri, value, .. } => {
                    if device.reject_stickers_for.as_deref() == Some(uri.as_str()) {
                        return Err(RemoteError::Ack(Ack {
                            code: 50,
                            index: 0,
                            command: "sticker".into(),
                            message: "no such song".into(),
                        }));
                    }
                    device.stickers.insert(uri.clone(), value.clone());
                    Ok(Reply::Done)
                }
                Operation::FindFile { uri } => Ok(Reply::Exists(device.files.contains(uri))),
                Operation::Update => Ok(Reply::Done),
                Operation::Status => Ok(Reply::Status(HashMap::new())),
            }
        }

        fn server_version(&self) -> &str {
            "0.23.5"
        }
    }

    struct StubGate {
        satisfied: bool,
        checks: AtomicUsize,
        release: Option<Arc<Notify>>,
    }

    impl StubGate {
        fn new(satisfied: bool) -> Self {
            Self {
                satisfied,
                checks: AtomicUsize::new(0),
                release: None,
            }
        }

        fn blocking(release: Arc<Notify>) -> Self {
            Self {
                release: Some(release),
                ..Self::new(true)
            }
        }
    }

    #[async_trait]
    impl CredentialGate for StubGate {
        async fn check(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst);
            if let Some(release) = &self.release {
                release.notified().await;
            }
            self.satisfied
        }

        fn describe(&self) -> String {
            "ssh-add -l".into()
        }
    }

    /// Transfer that applies jobs to the stub device instead of running rsync
    struct StubTransfer {
        device: SharedDevice,
        /// Files the local downloads tree holds, relative to it
        local: BTreeSet<String>,
        jobs: StdMutex<Vec<TransferJob>>,
        fail_copy: bool,
        fail_mirror: bool,
    }

    #[async_trait]
    impl Transfer for StubTransfer {
        fn describe(&self, job: &TransferJob) -> String {
            format!("{:?}", job)
        }

        async fn run(
            &self,
            job: &TransferJob,
            reporter: &SyncReporter,
        ) -> Result<TransferReport, TransferError> {
            self.jobs.lock().unwrap().push(job.clone());
            let command = self.describe(job);
            let mut report = TransferReport {
                command: command.clone(),
                ..TransferReport::default()
            };
            let mut device = self.device.lock().unwrap();

            match job {
                TransferJob::Copy { file, show_folder } => {
                    if self.fail_copy {
                        return Err(TransferError::Failed {
                            command,
                            code: Some(23),
                        });
                    }
                    let name = file.file_name().unwrap().to_string_lossy();
                    device.files.insert(format!("Podcasts/{}/{}", show_folder, name));
                    reporter.output(&format!("<f+++++++++ {}", name));
                    report.files_sent = 1;
                }
                TransferJob::Mirror { .. } => {
                    if self.fail_mirror {
                        return Err(TransferError::Failed {
                            command,
                            code: Some(12),
                        });
                    }
                    let wanted: BTreeSet<String> =
                        self.local.iter().map(|p| format!("Podcasts/{}", p)).collect();
                    report.files_sent = wanted.difference(&device.files).count();
                    report.files_deleted = device.files.difference(&wanted).count();
                    device.files = wanted;
                }
            }
            Ok(report)
        }
    }

    struct Fixture {
        device: SharedDevice,
        gate: Arc<StubGate>,
        transfer: Arc<StubTransfer>,
        catalog: Arc<Mutex<MemoryCatalog>>,
        sink: Arc<RecordingSink>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_gate(StubGate::new(true))
        }

        fn with_gate(gate: StubGate) -> Self {
            let device = SharedDevice::default();
            let local = ["ShowA/ep1.mp3", "ShowA/ep2.mp3", "ShowB/ep3.mp3"]
                .into_iter()
                .map(String::from)
                .collect();
            Self {
                transfer: Arc::new(StubTransfer {
                    device: device.clone(),
                    local,
                    jobs: StdMutex::new(Vec::new()),
                    fail_copy: false,
                    fail_mirror: false,
                }),
                device,
                gate: Arc::new(gate),
                catalog: Arc::new(Mutex::new(MemoryCatalog {
                    shows: sample_shows(),
                    ..Default::default()
                })),
                sink: Arc::new(RecordingSink::default()),
            }
        }

        fn orchestrator(&self) -> SyncOrchestrator {
            let services = SyncServices {
                connector: Arc::new(StubConnector {
                    device: self.device.clone(),
                }),
                gate: self.gate.clone(),
                transfer: self.transfer.clone(),
                catalog: self.catalog.clone(),
                progress: self.sink.clone(),
            };
            let settings = SyncSettings {
                mapping: RemotePathMapping::new("Podcasts"),
                downloads_dir: PathBuf::from("/downloads"),
                rescan_wait: Duration::from_secs(1),
            };
            SyncOrchestrator::new(services, settings)
        }

        fn jobs(&self) -> Vec<TransferJob> {
            self.transfer.jobs.lock().unwrap().clone()
        }

        async fn shows(&self) -> Vec<Show> {
            self.catalog.lock().await.shows.clone()
        }
    }

    async fn run(orchestrator: &SyncOrchestrator, request: SyncRequest) -> (SyncOutcome, Vec<SyncEvent>) {
        let (mut events, control) = orchestrator.start(request).unwrap().into_parts();
        let outcome = control.wait().await;
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        (outcome, seen)
    }

    #[tokio::test]
    async fn test_full_sync_pulls_copies_marks_then_mirrors() {
        let fixture = Fixture::new();
        {
            let mut device = fixture.device.lock().unwrap();
            device
                .stickers
                .insert("Podcasts/ShowA/ep1.mp3".into(), "120".into());
            device
                .stickers
                .insert("Music/Album/track.mp3".into(), "30".into());
        }

        let (outcome, events) = run(&fixture.orchestrator(), SyncRequest::full()).await;

        assert_eq!(outcome.status, RunStatus::FullySynced);
        assert_eq!(outcome.positions_pulled, 1);
        assert_eq!(outcome.unmatched_markers, 1);
        assert_eq!(outcome.episodes_copied, 1);
        assert_eq!(outcome.markers_written, 1);
        assert_eq!(outcome.commands.len(), 2);

        // Device position pulled into the catalog
        let shows = fixture.shows().await;
        assert_eq!(shows[0].episodes[0].current_position, 120);
        assert!(shows[0].episodes[0].is_finished);
        assert_eq!(fixture.sink.events.lock().unwrap().len(), 1);

        // ep2 was played here: copied first, then the whole tree mirrored
        let jobs = fixture.jobs();
        assert_eq!(
            jobs[0],
            TransferJob::Copy {
                file: PathBuf::from("/downloads/ShowA/ep2.mp3"),
                show_folder: "ShowA".into(),
            }
        );
        assert!(matches!(jobs[1], TransferJob::Mirror { .. }));

        let device = fixture.device.lock().unwrap();
        assert_eq!(
            device.stickers.get("Podcasts/ShowA/ep2.mp3").map(String::as_str),
            Some("300")
        );
        assert!(device.operations.iter().any(|op| op == "update"));

        let resume = events
            .iter()
            .position(|e| matches!(e, SyncEvent::Notification(Notice::ResumePlayback)))
            .unwrap();
        let done = events
            .iter()
            .position(|e| matches!(e, SyncEvent::Notification(Notice::FullySynced)))
            .unwrap();
        assert!(resume < done);
        assert!(matches!(events.last(), Some(SyncEvent::Finished(_))));
    }

    #[tokio::test]
    async fn test_missing_ssh_key_aborts_before_remote_calls() {
        let fixture = Fixture::with_gate(StubGate::new(false));

        let (outcome, _) = run(&fixture.orchestrator(), SyncRequest::full()).await;

        match &outcome.status {
            RunStatus::Aborted { phase, reason } => {
                assert_eq!(*phase, SyncPhase::Gating);
                assert!(reason.contains("no ssh key loaded"));
            }
            other => panic!("unexpected status {:?}", other),
        }
        let device = fixture.device.lock().unwrap();
        assert_eq!(device.connects, 1);
        assert!(device.operations.is_empty());
        assert!(fixture.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_device_aborts() {
        let fixture = Fixture::new();
        fixture.device.lock().unwrap().refuse_connections = true;

        let (outcome, _) = run(&fixture.orchestrator(), SyncRequest::full()).await;

        assert!(matches!(
            outcome.status,
            RunStatus::Aborted { phase: SyncPhase::Initializing, .. }
        ));
        assert_eq!(fixture.gate.checks.load(Ordering::SeqCst), 0);
        assert!(fixture.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_episode_already_on_device_is_not_copied() {
        let fixture = Fixture::new();
        fixture
            .device
            .lock()
            .unwrap()
            .files
            .insert("Podcasts/ShowA/ep2.mp3".into());

        let (outcome, _) = run(&fixture.orchestrator(), SyncRequest::full()).await;

        assert_eq!(outcome.already_present, 1);
        assert_eq!(outcome.episodes_copied, 0);
        assert_eq!(outcome.markers_written, 1);
        let jobs = fixture.jobs();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs[0], TransferJob::Mirror { .. }));
    }

    #[tokio::test]
    async fn test_mirror_failure_after_marking_is_partial() {
        let mut fixture = Fixture::new();
        Arc::get_mut(&mut fixture.transfer).unwrap().fail_mirror = true;

        let (outcome, _) = run(&fixture.orchestrator(), SyncRequest::full()).await;

        match &outcome.status {
            RunStatus::PartiallySynced { reason } => assert!(reason.contains("exit code 12")),
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(outcome.markers_written, 1);
        assert_eq!(outcome.commands.len(), 2);
    }

    #[tokio::test]
    async fn test_copy_failure_aborts_before_marking() {
        let mut fixture = Fixture::new();
        Arc::get_mut(&mut fixture.transfer).unwrap().fail_copy = true;

        let (outcome, events) = run(&fixture.orchestrator(), SyncRequest::full()).await;

        match &outcome.status {
            RunStatus::Aborted { phase, reason } => {
                assert_eq!(*phase, SyncPhase::Transferring);
                assert!(reason.contains("exit code 23"));
            }
            other => panic!("unexpected status {:?}", other),
        }
        assert_eq!(outcome.markers_written, 0);
        assert_eq!(outcome.commands.len(), 1);
        let jobs = fixture.jobs();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(jobs[0], TransferJob::Copy { .. }));

        let device = fixture.device.lock().unwrap();
        assert!(!device.operations.iter().any(|op| op == "sticker set"));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SyncEvent::Notification(Notice::ResumePlayback))));
    }

    #[tokio::test]
    async fn test_second_full_mirror_changes_nothing() {
        let fixture = Fixture::new();
        fixture
            .device
            .lock()
            .unwrap()
            .files
            .insert("Podcasts/Gone/old.mp3".into());
        let orchestrator = fixture.orchestrator();

        let (first, _) = run(&orchestrator, SyncRequest::full()).await;
        assert_eq!(first.status, RunStatus::FullySynced);
        assert_eq!(first.files_deleted, 1);
        let tree_after_first = fixture.device.lock().unwrap().files.clone();

        fixture.device.lock().unwrap().operations.clear();
        let (second, _) = run(&orchestrator, SyncRequest::full()).await;
        assert_eq!(second.status, RunStatus::FullySynced);
        // The device index is refreshed after every successful mirror
        assert!(fixture
            .device
            .lock()
            .unwrap()
            .operations
            .iter()
            .any(|op| op == "update"));
        assert_eq!(second.files_sent, 0);
        assert_eq!(second.files_deleted, 0);
        assert_eq!(second.episodes_copied, 0);
        assert_eq!(second.positions_pulled, 0);
        assert_eq!(fixture.device.lock().unwrap().files, tree_after_first);
    }

    #[tokio::test]
    async fn test_overlapping_runs_are_rejected() {
        let release = Arc::new(Notify::new());
        let fixture = Fixture::with_gate(StubGate::blocking(release.clone()));
        let orchestrator = fixture.orchestrator();

        let (_events, control) = orchestrator.start(SyncRequest::full()).unwrap().into_parts();
        assert!(orchestrator.is_running());
        assert!(matches!(
            orchestrator.start(SyncRequest::full()),
            Err(SyncError::AlreadyRunning)
        ));

        release.notify_one();
        let outcome = control.wait().await;
        assert_eq!(outcome.status, RunStatus::FullySynced);
        assert!(!orchestrator.is_running());

        release.notify_one();
        assert!(orchestrator.start(SyncRequest::full()).is_ok());
    }

    #[tokio::test]
    async fn test_cancel_stops_at_next_step() {
        let release = Arc::new(Notify::new());
        let fixture = Fixture::with_gate(StubGate::blocking(release.clone()));
        let orchestrator = fixture.orchestrator();

        let (_events, control) = orchestrator.start(SyncRequest::full()).unwrap().into_parts();
        control.cancel();
        release.notify_one();
        let outcome = control.wait().await;

        match outcome.status {
            RunStatus::Aborted { reason, .. } => assert_eq!(reason, "cancelled"),
            other => panic!("unexpected status {:?}", other),
        }
        assert!(fixture.jobs().is_empty());
    }

    #[tokio::test]
    async fn test_marker_write_failure_is_not_fatal() {
        let fixture = Fixture::new();
        fixture.device.lock().unwrap().reject_stickers_for = Some("Podcasts/ShowA/ep2.mp3".into());

        let (outcome, _) = run(&fixture.orchestrator(), SyncRequest::full()).await;

        assert_eq!(outcome.status, RunStatus::FullySynced);
        assert_eq!(outcome.markers_written, 0);
        assert_eq!(outcome.issues_of(IssueKind::MarkerWriteFailure), 1);
        assert_eq!(fixture.jobs().len(), 2);
    }

    #[tokio::test]
    async fn test_subset_sync_copies_and_marks_without_mirror() {
        let fixture = Fixture::new();

        let (outcome, events) = run(&fixture.orchestrator(), SyncRequest::subset(vec![4, 2])).await;

        assert_eq!(outcome.status, RunStatus::FullySynced);
        // ep4 is not downloaded
        assert_eq!(outcome.episodes_copied, 1);
        assert_eq!(outcome.markers_written, 1);
        let jobs = fixture.jobs();
        assert_eq!(jobs.len(), 1);
        assert!(matches!(&jobs[0], TransferJob::Copy { show_folder, .. } if show_folder == "ShowA"));
        assert!(!events
            .iter()
            .any(|e| matches!(e, SyncEvent::Notification(Notice::ResumePlayback))));
    }
}
