//! Sync front ends: line console and full-screen window

pub mod console;
pub mod window;
