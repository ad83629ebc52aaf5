//! Line-oriented sync front end
//!
//! A spinner shows the current phase; log lines, rsync output and
//! notifications are printed above it.

use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::utils::{OutputMode, set_output_mode};
use crate::sync::{Notice, RunControl, Severity, StatusIcon, SyncEvent};

static NETWORK: Emoji<'_, '_> = Emoji("🔌 ", "");
static KEY: Emoji<'_, '_> = Emoji("🔑 ", "");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "");
static UPLOAD: Emoji<'_, '_> = Emoji("📤 ", "");
static ERROR: Emoji<'_, '_> = Emoji("❌ ", "x ");
static DONE: Emoji<'_, '_> = Emoji("✅ ", "");
static BELL: Emoji<'_, '_> = Emoji("🔔 ", "! ");

pub fn icon(icon: StatusIcon) -> Emoji<'static, 'static> {
    match icon {
        StatusIcon::Network => NETWORK,
        StatusIcon::Authentication => KEY,
        StatusIcon::Download => DOWNLOAD,
        StatusIcon::Upload => UPLOAD,
        StatusIcon::Error => ERROR,
        StatusIcon::Done => DONE,
    }
}

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Print run events until the run finishes
///
/// Ctrl-C requests cancellation; the run stops at its next step boundary.
pub async fn follow(
    mut events: mpsc::UnboundedReceiver<SyncEvent>,
    control: &RunControl,
    verbose: bool,
) {
    // Run messages are printed here; keep their tracing copies off stderr
    set_output_mode(OutputMode::Console);
    let spinner = spinner();
    spinner.set_message("Starting sync...");

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if show_event(&spinner, event, verbose) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                control.cancel();
                spinner.println(format!("{}", "Cancelling after the current step...".yellow()));
            }
        }
    }

    spinner.finish_and_clear();
    set_output_mode(OutputMode::Plain);
}

/// Render one event; returns `true` once the run has finished
fn show_event(spinner: &ProgressBar, event: SyncEvent, verbose: bool) -> bool {
    match event {
        SyncEvent::Status { icon: kind, message, .. } => {
            spinner.set_message(format!("{}{}", icon(kind), message));
        }
        SyncEvent::Log { severity, message } => match severity {
            Severity::Debug if !verbose => {}
            Severity::Debug => spinner.println(format!("  {}", message.dimmed())),
            Severity::Info => spinner.println(format!("  {}", message)),
            Severity::Warning => spinner.println(format!("  {}", message.yellow())),
            Severity::Error => spinner.println(format!("{}{}", ERROR, message.red())),
        },
        SyncEvent::Output { line } => {
            if verbose {
                spinner.println(format!("    {}", line.dimmed()));
            } else {
                spinner.set_message(line);
            }
        }
        SyncEvent::Notification(notice) => {
            let text = format!("{}{}: {}", BELL, notice.title(), notice.message());
            let text = match notice {
                Notice::ResumePlayback => text.cyan().bold(),
                Notice::FullySynced => text.green().bold(),
            };
            spinner.println(text.to_string());
        }
        SyncEvent::Finished(_) => return true,
    }
    false
}
