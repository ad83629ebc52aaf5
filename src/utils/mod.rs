//! Utility functions

pub mod media;
pub mod tui_log;

pub use tui_log::{OutputMode, WindowAwareLayer, set_output_mode};
