//! Storage node binary. `--api-addr`, `--data-dir`, `--lb-addr` per §6.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fsmesh::config::load_config;
use fsmesh::storage_node::{ensure_data_dir, router, spawn_heartbeat_loop, StorageNodeState};
use tracing::info;

#[derive(Parser)]
#[command(name = "storage-node", about = "Content-addressed chunk storage node")]
struct Cli {
    /// Address this node binds its HTTP server to and advertises to the dispatcher.
    #[arg(long)]
    api_addr: String,

    /// Directory chunks are persisted under.
    #[arg(long)]
    data_dir: PathBuf,

    /// Dispatcher address heartbeats are sent to.
    #[arg(long)]
    lb_addr: String,

    /// Path to config.toml (defaults applied if absent).
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let _log_guard = fsmesh::telemetry::init("storage-node", &cli.data_dir, &config.common.log_level);

    ensure_data_dir(&cli.data_dir).await?;

    let self_url = format!("http://{}", cli.api_addr);
    let state = Arc::new(StorageNodeState::new(cli.data_dir.clone(), self_url));

    spawn_heartbeat_loop(
        state.clone(),
        cli.lb_addr.clone(),
        Duration::from_secs(config.common.heartbeat_interval_secs),
    );

    let listener = tokio::net::TcpListener::bind(&cli.api_addr).await?;
    info!(addr = cli.api_addr.as_str(), data_dir = %cli.data_dir.display(), "storage node listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
