//! CLI module for podsync

use clap::{Parser, Subcommand};

pub mod commands;
pub mod setup;

pub use setup::SetupWizard;

#[derive(Parser, Debug)]
#[command(name = "podsync", about = "Sync podcast episodes and playback positions to an MPD player")]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configure the device connection
    Setup {
        /// Device host
        #[arg(long, env = "PODSYNC_HOST")]
        host: Option<String>,

        /// MPD port
        #[arg(long, env = "PODSYNC_PORT")]
        port: Option<u16>,

        /// Reconfigure without asking
        #[arg(long)]
        force: bool,
    },

    /// Sync playback positions and episode files with the device
    Sync {
        /// Only sync these episodes (repeatable)
        #[arg(short, long = "episode", value_name = "ID")]
        episodes: Vec<u64>,

        /// Follow the run in a full-screen window
        #[arg(short, long)]
        window: bool,

        /// Device host for this run
        #[arg(long, env = "PODSYNC_HOST")]
        host: Option<String>,

        /// MPD port for this run
        #[arg(long, env = "PODSYNC_PORT")]
        port: Option<u16>,
    },

    /// Show played markers on the device and episodes played here
    Status {
        /// Device host
        #[arg(long, env = "PODSYNC_HOST")]
        host: Option<String>,

        /// MPD port
        #[arg(long, env = "PODSYNC_PORT")]
        port: Option<u16>,
    },

    /// Manage the local episode catalog
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum CatalogAction {
    /// Import shows and episodes from the downloads folder
    Scan,

    /// List shows, episodes and playback positions
    List {
        /// Only list episodes played here
        #[arg(long)]
        played: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_repeated_episode_flags() {
        let cli = Cli::try_parse_from(["podsync", "sync", "-e", "3", "--episode", "7", "--window"]).unwrap();
        match cli.command {
            Commands::Sync {
                episodes, window, ..
            } => {
                assert_eq!(episodes, vec![3, 7]);
                assert!(window);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
