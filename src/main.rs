//! bgpvault archive server.
//!
//! Run with: `bgpvault --config /etc/bgpvault/config.toml`
//!
//! Environment variables override file settings:
//! - `BGPVAULT_HOST`: host to bind to
//! - `BGPVAULT_PORT`: port to listen on
//! - `BGPVAULT_LOG_LEVEL` / `BGPVAULT_LOG_FORMAT`: logging overrides
//! - `RUST_LOG`: tracing filter (default: bgpvault=info)

use bgpvault::api::{serve, AppState};
use bgpvault::archive::spawn_archive;
use bgpvault::config::{generate_default_config, Config};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bgpvault")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Read-only archive server for MRT-format BGP captures")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a default configuration file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bgpvault=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting bgpvault v{}", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => {
            tracing::info!("No config file given, using environment-only configuration");
            Config::from_env()
        }
    };

    if config.archive.is_empty() {
        tracing::warn!("no archives configured; the server will only answer /archive/help");
    }

    // Spawn one service task per archive; each restores its saved catalog
    // or performs an initial scan.
    let mut state = AppState::new();
    let mut archives = Vec::new();
    for archive_config in config.archive.clone() {
        tracing::info!(
            collector = %archive_config.collector,
            discriminator = %archive_config.discriminator,
            root = %archive_config.root.display(),
            "starting archive"
        );
        let (handle, task) = spawn_archive(archive_config);
        state.register(handle.clone());
        archives.push((handle, task));
    }

    serve(state, &config.server).await?;

    // Stop the archive services; each waits out any in-flight scan.
    tracing::info!("Stopping archive services...");
    for (handle, task) in archives {
        handle.stop().await;
        if let Err(err) = task.await {
            tracing::error!(error = %err, "archive task failed");
        }
    }

    tracing::info!("bgpvault stopped");
    Ok(())
}
