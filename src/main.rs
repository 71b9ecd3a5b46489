//! redzone - authoritative server for a top-down battle-royale game.

mod config;

use anyhow::Result;
use clap::Parser;
use config::ServerConfig;
use redzone_server::ServerOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "redzone", version, about = "Authoritative battle-royale game server")]
struct Cli {
    /// Path to the server config file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the bind address.
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Override the map seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Enable team mode: players are downed and revivable instead of dying
    /// outright.
    #[arg(long)]
    team_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // INFO by default; override via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load_from_path(path),
        None => ServerConfig::load(),
    };
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    if cli.team_mode {
        config.team_mode = true;
    }
    if config.seed == 0 {
        config.seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1);
    }

    info!("Starting redzone v{}", env!("CARGO_PKG_VERSION"));

    redzone_server::run(ServerOptions {
        bind_addr: config.bind_addr,
        game: config.game_options(),
    })
    .await
}
