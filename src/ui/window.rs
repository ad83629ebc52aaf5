//! Full-screen sync window
//!
//! Shows a status bar and a scrolling activity log. Closing the window with
//! `q` leaves the run going; Ctrl-C asks it to stop.

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    layout::{Constraint, Direction, Layout},
    prelude::*,
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Paragraph, Wrap},
};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;

use super::console::icon;
use crate::utils::{OutputMode, set_output_mode};
use crate::sync::{RunControl, RunStatus, Severity, StatusIcon, SyncEvent, SyncOutcome, SyncPhase};

/// Lines kept in the activity log
const LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Plain,
    Muted,
    Warning,
    Error,
    Highlight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    None,
    Close,
    Cancel,
}

struct WindowState {
    title: String,
    phase: SyncPhase,
    icon: StatusIcon,
    status: String,
    log: Vec<(LineKind, String)>,
    outcome: Option<SyncOutcome>,
    cancel_requested: bool,
}

impl WindowState {
    fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            phase: SyncPhase::Idle,
            icon: StatusIcon::Network,
            status: "Starting sync...".to_string(),
            log: Vec::new(),
            outcome: None,
            cancel_requested: false,
        }
    }

    fn push(&mut self, kind: LineKind, line: String) {
        self.log.push((kind, line));
        if self.log.len() > LOG_CAPACITY {
            let excess = self.log.len() - LOG_CAPACITY;
            self.log.drain(..excess);
        }
    }

    fn on_key(&mut self, key: KeyEvent) -> KeyAction {
        if key.kind != KeyEventKind::Press {
            return KeyAction::None;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => KeyAction::Close,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                if self.outcome.is_some() || self.cancel_requested {
                    return KeyAction::None;
                }
                self.cancel_requested = true;
                self.push(
                    LineKind::Warning,
                    "Cancelling after the current step...".to_string(),
                );
                KeyAction::Cancel
            }
            _ => KeyAction::None,
        }
    }

    fn apply(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Status {
                phase,
                icon,
                message,
            } => {
                self.phase = phase;
                self.icon = icon;
                self.push(LineKind::Plain, format!("[{}] {}", phase, message));
                self.status = message;
            }
            SyncEvent::Log { severity, message } => {
                let kind = match severity {
                    Severity::Debug => LineKind::Muted,
                    Severity::Info => LineKind::Plain,
                    Severity::Warning => LineKind::Warning,
                    Severity::Error => LineKind::Error,
                };
                self.push(kind, message);
            }
            SyncEvent::Output { line } => self.push(LineKind::Muted, format!("  {}", line)),
            SyncEvent::Notification(notice) => {
                self.push(
                    LineKind::Highlight,
                    format!("{}: {}", notice.title(), notice.message()),
                );
            }
            SyncEvent::Finished(outcome) => self.outcome = Some(outcome),
        }
    }
}

/// Show the window until the user closes it
///
/// Returns the outcome if the run finished while the window was open.
pub async fn show(
    events: &mut mpsc::UnboundedReceiver<SyncEvent>,
    control: &RunControl,
    title: &str,
) -> Result<Option<SyncOutcome>> {
    // Keep tracing output off the alternate screen
    set_output_mode(OutputMode::Window);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut state = WindowState::new(title);
    // Terminal polling blocks; keep the other runtime workers free for the run
    let result = tokio::task::block_in_place(|| {
        run_window_loop(&mut terminal, &mut state, events, control)
    });

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    set_output_mode(OutputMode::Plain);

    result?;
    Ok(state.outcome)
}

fn run_window_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: &mut WindowState,
    events: &mut mpsc::UnboundedReceiver<SyncEvent>,
    control: &RunControl,
) -> Result<()> {
    loop {
        while let Ok(event) = events.try_recv() {
            state.apply(event);
        }

        terminal.draw(|f| draw_sync_window(f, state))?;

        if event::poll(Duration::from_millis(50))?
            && let Event::Key(key) = event::read()?
        {
            match state.on_key(key) {
                KeyAction::Close => return Ok(()),
                KeyAction::Cancel => control.cancel(),
                KeyAction::None => {}
            }
        }
    }
}

fn draw_sync_window(f: &mut Frame, state: &WindowState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(3), // Status bar
            Constraint::Min(5),    // Log
            Constraint::Length(3), // Footer
        ])
        .split(f.area());

    let (header_text, header_color) = match state.outcome.as_ref().map(|o| &o.status) {
        Some(RunStatus::FullySynced) => (format!("{} - fully synced", state.title), Color::Green),
        Some(RunStatus::PartiallySynced { .. }) => {
            (format!("{} - partially synced", state.title), Color::Yellow)
        }
        Some(RunStatus::Aborted { .. }) => (format!("{} - aborted", state.title), Color::Red),
        None => (format!("{} ...", state.title), Color::Cyan),
    };
    let header = Paragraph::new(header_text)
        .style(Style::default().fg(header_color).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::BOTTOM));
    f.render_widget(header, chunks[0]);

    let status_color = match state.icon {
        StatusIcon::Error => Color::Red,
        StatusIcon::Done => Color::Green,
        _ => Color::Cyan,
    };
    let status = Paragraph::new(format!("{}{}", icon(state.icon), state.status))
        .style(Style::default().fg(status_color))
        .block(
            Block::default()
                .title(format!("Status: {}", state.phase))
                .borders(Borders::ALL),
        );
    f.render_widget(status, chunks[1]);

    let visible_lines = chunks[2].height.saturating_sub(2) as usize;
    let lines: Vec<Line> = state
        .log
        .iter()
        .rev()
        .take(visible_lines)
        .rev()
        .map(|(kind, text)| {
            let style = match kind {
                LineKind::Plain => Style::default(),
                LineKind::Muted => Style::default().fg(Color::DarkGray),
                LineKind::Warning => Style::default().fg(Color::Yellow),
                LineKind::Error => Style::default().fg(Color::Red),
                LineKind::Highlight => Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
            };
            Line::styled(text.clone(), style)
        })
        .collect();
    let log = Paragraph::new(lines)
        .block(Block::default().title("Activity Log").borders(Borders::ALL))
        .wrap(Wrap { trim: false });
    f.render_widget(log, chunks[2]);

    let help_text = if state.outcome.is_some() {
        "Press q to close"
    } else {
        "q: close window (sync continues)   Ctrl-C: cancel sync"
    };
    let footer = Paragraph::new(help_text)
        .style(Style::default().fg(Color::DarkGray))
        .block(Block::default().borders(Borders::TOP));
    f.render_widget(footer, chunks[3]);
}
