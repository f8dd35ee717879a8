//! Dispatcher binary: placement/routing front door. `--api-addr` to bind,
//! `--metadata-addr` (repeatable) listing the metadata-service replicas to
//! probe for leadership.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use fsmesh::config::load_config;
use fsmesh::dispatcher::{router, DispatcherState, LeaderCache, NodeRegistry};
use tracing::info;

#[derive(Parser)]
#[command(name = "dispatcher", about = "Storage-node placement and routing front door")]
struct Cli {
    /// Address this dispatcher binds its HTTP server to.
    #[arg(long)]
    api_addr: String,

    /// Metadata-service replica address, repeatable.
    #[arg(long = "metadata-addr", required = true)]
    metadata_addrs: Vec<String>,

    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Directory rolling log files are written under; the dispatcher has no
    /// other on-disk state.
    #[arg(long, default_value = ".")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let _log_guard = fsmesh::telemetry::init("dispatcher", &cli.log_dir, &config.common.log_level);

    let registry = NodeRegistry::new(config.common.liveness_ttl_secs);
    std::sync::Arc::new(registry.clone())
        .spawn_stale_node_sweep(Duration::from_secs(config.common.heartbeat_interval_secs));

    let state = DispatcherState {
        registry,
        leader: LeaderCache::new(),
        metadata_addrs: cli.metadata_addrs,
        http: reqwest::Client::new(),
        replication_factor: config.common.replication_factor,
        propose_retry_deadline: Duration::from_secs(config.common.propose_timeout_secs * 3),
    };

    let listener = tokio::net::TcpListener::bind(&cli.api_addr).await?;
    info!(addr = cli.api_addr.as_str(), "dispatcher listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
