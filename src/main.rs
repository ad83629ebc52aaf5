//! podsync - Sync podcast episodes and playback positions to an MPD player

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod catalog;
mod cli;
mod config;
mod mpd;
mod sync;
mod transfer;
mod ui;
mod utils;

use cli::{CatalogAction, Cli, Commands};
use utils::WindowAwareLayer;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "podsync=debug" } else { "podsync=info" };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(WindowAwareLayer::new(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        ))
        .init();

    match cli.command {
        Commands::Setup { host, port, force } => {
            cli::commands::setup(host, port, force).await?;
        }
        Commands::Sync {
            episodes,
            window,
            host,
            port,
        } => {
            cli::commands::sync(episodes, window, host, port, cli.verbose).await?;
        }
        Commands::Status { host, port } => {
            cli::commands::status(host, port).await?;
        }
        Commands::Catalog { action } => match action {
            CatalogAction::Scan => cli::commands::catalog_scan()?,
            CatalogAction::List { played } => cli::commands::catalog_list(played)?,
        },
        Commands::Completion { shell } => {
            cli::commands::completion(shell);
        }
    }

    Ok(())
}
