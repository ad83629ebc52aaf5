//! CLI command handlers

use anyhow::{Context, Result};
use clap_complete::generate;
use colored::Colorize;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::SetupWizard;
use crate::catalog::{Catalog, EpisodeActionLog, JsonCatalog};
use crate::config::SyncConfig;
use crate::mpd::{MpdConnector, RemoteStateClient};
use crate::sync::{
    IssueKind, PLAYED_STICKER, PlaybackReconciler, PlayedMarker, RemotePathMapping, RunStatus,
    SyncOrchestrator, SyncOutcome, SyncRequest, SyncServices, SyncSettings,
};
use crate::transfer::{CommandGate, RsyncTransfer};
use crate::ui::{console, window};

/// Handle the `setup` command
pub async fn setup(host: Option<String>, port: Option<u16>, force: bool) -> Result<()> {
    println!("{}", "Configuring podsync...".cyan());

    let config = SetupWizard::run(host, port, force).await?;

    println!();
    println!("{}", "Configuration saved!".green().bold());
    println!("  MPD:       {}:{}", config.host, config.port);
    println!("  rsync to:  {}", config.rsync_destination());
    println!("  Downloads: {}", config.downloads_dir.display());

    Ok(())
}

/// Handle the `sync` command
pub async fn sync(
    episodes: Vec<u64>,
    use_window: bool,
    host: Option<String>,
    port: Option<u16>,
    verbose: bool,
) -> Result<()> {
    let config = SyncConfig::load()?.with_overrides(host, port)?;
    let catalog = JsonCatalog::open(&config.catalog_path, &config.downloads_dir)?;
    let action_log = EpisodeActionLog::new(&config.action_log_path());
    debug!("Recording playback actions in {}", action_log.path().display());

    let services = SyncServices {
        connector: Arc::new(MpdConnector::new(
            &config.host,
            config.port,
            config.connect_timeout(),
        )),
        gate: Arc::new(CommandGate::ssh_agent(&config.ssh_add_program)),
        transfer: Arc::new(RsyncTransfer::new(
            &config.rsync_program,
            &config.rsync_destination(),
        )),
        catalog: Arc::new(Mutex::new(catalog)),
        progress: Arc::new(action_log),
    };
    let settings = SyncSettings {
        mapping: RemotePathMapping::new(&config.mpd_prefix),
        downloads_dir: config.downloads_dir.clone(),
        rescan_wait: config.rescan_wait(),
    };
    let orchestrator = SyncOrchestrator::new(services, settings);

    let request = if episodes.is_empty() {
        println!("Syncing to {}", config.host.green());
        SyncRequest::full()
    } else {
        println!("Syncing {} episode(s) to {}", episodes.len(), config.host.green());
        SyncRequest::subset(episodes)
    };

    let (mut events, control) = orchestrator.start(request)?.into_parts();

    let finished_in_window = if use_window {
        let title = format!("Syncing to {}", config.host);
        let outcome = window::show(&mut events, &control, &title).await?;
        if outcome.is_none() {
            println!("{}", "Window closed, sync continues here.".dimmed());
        }
        outcome.is_some()
    } else {
        false
    };
    if !finished_in_window {
        console::follow(events, &control, verbose).await;
    }

    let outcome = control.wait().await;
    print_summary(&outcome);

    match outcome.status {
        RunStatus::FullySynced => Ok(()),
        RunStatus::PartiallySynced { reason } => {
            anyhow::bail!("Sync incomplete: {}", reason)
        }
        RunStatus::Aborted { phase, reason } => {
            anyhow::bail!("Sync aborted while {}: {}", phase, reason)
        }
    }
}

fn print_summary(outcome: &SyncOutcome) {
    println!();
    match &outcome.status {
        RunStatus::FullySynced => println!("{}", "Fully synced!".green().bold()),
        RunStatus::PartiallySynced { .. } => {
            println!("{}", "Played state synced, file transfer failed.".yellow().bold())
        }
        RunStatus::Aborted { .. } => println!("{}", "Sync aborted.".red().bold()),
    }

    println!("  Positions pulled from device: {}", outcome.positions_pulled);
    println!("  Episodes copied:              {}", outcome.episodes_copied);
    if outcome.already_present > 0 {
        println!("  Already on device:            {}", outcome.already_present);
    }
    let failed_markers = outcome.issues_of(IssueKind::MarkerWriteFailure);
    if failed_markers > 0 {
        println!(
            "  Markers written:              {} ({} failed)",
            outcome.markers_written, failed_markers
        );
    } else {
        println!("  Markers written:              {}", outcome.markers_written);
    }
    println!(
        "  Files sent / deleted:         {} / {}",
        outcome.files_sent, outcome.files_deleted
    );
    if outcome.unmatched_markers > 0 {
        println!(
            "  {}",
            format!(
                "{} device markers matched no local episode",
                outcome.unmatched_markers
            )
            .dimmed()
        );
    }

    let problems: Vec<_> = outcome
        .issues
        .iter()
        .filter(|i| i.kind != IssueKind::MarkerResolutionMiss)
        .collect();
    if !problems.is_empty() {
        println!("  {}", "Problems:".yellow());
        for issue in problems {
            println!("    - {}: {}", issue.kind, issue.detail);
        }
    }
}

/// Handle the `status` command
pub async fn status(host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = SyncConfig::load()?.with_overrides(host, port)?;
    let catalog = JsonCatalog::open(&config.catalog_path, &config.downloads_dir)?;
    let shows = catalog.shows()?;
    let reconciler = PlaybackReconciler::new(
        RemotePathMapping::new(&config.mpd_prefix),
        &config.downloads_dir,
    );

    println!("{}", format!("Device {}:{}", config.host, config.port).green().bold());
    let connector = MpdConnector::new(&config.host, config.port, config.connect_timeout());
    let mut client = RemoteStateClient::connect(Arc::new(connector))
        .await
        .context("Could not reach MPD")?;
    println!("  MPD version: {}", client.server_version());

    let stickers = client.find_stickers("", PLAYED_STICKER).await?;
    let titles: HashMap<(&str, &str), (&str, u64)> = shows
        .iter()
        .flat_map(|show| {
            show.episodes.iter().map(move |e| {
                (
                    (show.download_folder.as_str(), e.download_filename.as_str()),
                    (e.title.as_str(), e.current_position),
                )
            })
        })
        .collect();

    println!(
        "  Played markers: {} (library prefix {}/)",
        stickers.len(),
        reconciler.mapping().prefix()
    );
    for sticker in &stickers {
        let Some(marker) = PlayedMarker::from_sticker(sticker) else {
            println!("    {} {}", "?".yellow(), sticker.uri);
            continue;
        };
        let local = reconciler
            .mapping()
            .resolve(&marker.remote_path)
            .and_then(|key| titles.get(&key));
        match local {
            Some((title, position)) => println!(
                "    {} {} (device {}, local {})",
                "✓".green(),
                title,
                format_position(marker.played_seconds),
                format_position(*position)
            ),
            None => println!(
                "    {} {} {}",
                "-".dimmed(),
                marker.remote_path.dimmed(),
                "(not in catalog)".dimmed()
            ),
        }
    }

    println!();
    let played = reconciler.played_here(&shows, None);
    println!("{}", format!("Played here: {}", played.len()).green().bold());
    for item in &played {
        println!(
            "  [{}] {} at {}",
            item.episode_id,
            item.title,
            format_position(item.position)
        );
    }

    Ok(())
}

/// Handle `catalog scan`
pub fn catalog_scan() -> Result<()> {
    let config = SyncConfig::load()?;
    let mut catalog = JsonCatalog::open(&config.catalog_path, &config.downloads_dir)?;
    println!(
        "{}",
        format!("Scanning {}...", catalog.downloads_dir().display()).cyan()
    );

    let summary = catalog.scan_downloads()?;

    println!(
        "{} {} new show(s), {} new episode(s)",
        "Imported".green().bold(),
        summary.shows_added,
        summary.episodes_added
    );
    Ok(())
}

/// Handle `catalog list`
pub fn catalog_list(played_only: bool) -> Result<()> {
    let config = SyncConfig::load()?;
    let catalog = JsonCatalog::open(&config.catalog_path, &config.downloads_dir)?;
    let shows = catalog.shows()?;

    if shows.is_empty() {
        println!(
            "{}",
            "Catalog is empty. Run 'podsync catalog scan' first.".yellow()
        );
        return Ok(());
    }

    for show in &shows {
        let episodes: Vec<_> = show
            .episodes
            .iter()
            .filter(|e| !played_only || e.is_played_here())
            .collect();
        if episodes.is_empty() {
            continue;
        }

        println!("{} ({})", show.title.green().bold(), show.download_folder);
        for episode in episodes {
            let flag = if episode.is_finished {
                "finished".dimmed()
            } else if episode.is_played_here() {
                "played here".cyan()
            } else if !episode.is_downloaded_and_present {
                "missing".red()
            } else {
                "".normal()
            };
            println!(
                "  [{}] {} {}/{} {}",
                episode.id,
                episode.title,
                format_position(episode.current_position),
                format_position(episode.total_time),
                flag
            );
        }
    }
    Ok(())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = <super::Cli as clap::CommandFactory>::command();
    generate(shell, &mut cmd, "podsync", &mut io::stdout());
}

/// `h:mm:ss` or `m:ss`
fn format_position(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
