//! Logging that stays out of the way of the sync front ends
//!
//! While a sync is followed on the console, run messages are already printed
//! by the console front end, so their `tracing` copies are dropped from
//! stderr. While the full-screen window owns the terminal, stderr output is
//! dropped entirely.

use std::sync::atomic::{AtomicU8, Ordering};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

/// Target of the sync reporter's log events
const REPORTER_TARGET: &str = "podsync::sync::reporter";

/// Who currently owns the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OutputMode {
    Plain = 0,
    Console = 1,
    Window = 2,
}

static MODE: AtomicU8 = AtomicU8::new(OutputMode::Plain as u8);

pub fn set_output_mode(mode: OutputMode) {
    MODE.store(mode as u8, Ordering::SeqCst);
}

pub fn output_mode() -> OutputMode {
    match MODE.load(Ordering::SeqCst) {
        1 => OutputMode::Console,
        2 => OutputMode::Window,
        _ => OutputMode::Plain,
    }
}

/// Whether an event with this target should reach stderr in `mode`
fn passes(mode: OutputMode, target: &str) -> bool {
    match mode {
        OutputMode::Plain => true,
        OutputMode::Console => !target.starts_with(REPORTER_TARGET),
        OutputMode::Window => false,
    }
}

/// Wraps a layer and filters its terminal output by [`OutputMode`]
///
/// Span bookkeeping is always forwarded so spans opened before a front end
/// took over still format correctly afterwards.
pub struct WindowAwareLayer<L> {
    inner: L,
}

impl<L> WindowAwareLayer<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

impl<S, L> Layer<S> for WindowAwareLayer<L>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    L: Layer<S>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        self.inner.on_new_span(attrs, id, ctx);
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        self.inner.on_record(id, values, ctx);
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if passes(output_mode(), event.metadata().target()) {
            self.inner.on_event(event, ctx);
        }
    }

    fn on_enter(&self, id: &Id, ctx: Context<'_, S>) {
        self.inner.on_enter(id, ctx);
    }

    fn on_exit(&self, id: &Id, ctx: Context<'_, S>) {
        self.inner.on_exit(id, ctx);
    }

    fn on_close(&self, id: Id, ctx: Context<'_, S>) {
        self.inner.on_close(id, ctx);
    }
}
