//! Metadata service binary. `--id`, `--api-addr`, `--raft-addr`, `--data-dir`,
//! `--bootstrap` per §6; `--peer id=addr` (repeatable) supplies the fixed
//! `{id, privateAddr}*` servers list the bootstrapping replica initializes
//! with, mirroring `main.go`'s hardcoded three-server `raft.Configuration`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fsmesh::config::load_config;
use fsmesh::metadata_service::{build_raft_node, router, MetadataServiceState};
use fsmesh::raft_types::NodeId;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Parser)]
#[command(name = "metadata-service", about = "Replicated metadata FSM front-end")]
struct Cli {
    /// This replica's numeric node id.
    #[arg(long)]
    id: NodeId,

    /// Address this replica binds its HTTP server to.
    #[arg(long)]
    api_addr: String,

    /// Address peers dial for Raft RPCs (may equal --api-addr).
    #[arg(long)]
    raft_addr: String,

    /// Directory snapshots are persisted under.
    #[arg(long)]
    data_dir: PathBuf,

    /// Initialize the cluster membership from --peer entries. Exactly one
    /// replica in a fresh cluster should pass this.
    #[arg(long, default_value_t = false)]
    bootstrap: bool,

    /// `id=raft_addr` pair, repeatable. Required alongside --bootstrap.
    #[arg(long = "peer")]
    peers: Vec<String>,

    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

fn parse_peers(raw: &[String]) -> anyhow::Result<BTreeMap<NodeId, String>> {
    let mut peers = BTreeMap::new();
    for entry in raw {
        let (id, addr) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("--peer must be formatted id=addr, got '{entry}'"))?;
        peers.insert(id.parse::<NodeId>()?, addr.to_string());
    }
    Ok(peers)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    tokio::fs::create_dir_all(&cli.data_dir).await?;
    let _log_guard = fsmesh::telemetry::init(
        &format!("metadata-service-{}", cli.id),
        &cli.data_dir,
        &config.common.log_level,
    );

    let peers = parse_peers(&cli.peers)?;
    let peer_addrs = Arc::new(RwLock::new(peers.clone()));

    let bootstrap_members = if cli.bootstrap {
        let mut members = BTreeMap::new();
        members.insert(cli.id, openraft::BasicNode::new(cli.raft_addr.clone()));
        for (id, addr) in &peers {
            members.insert(*id, openraft::BasicNode::new(addr.clone()));
        }
        Some(members)
    } else {
        None
    };

    let (raft, state_machine) =
        build_raft_node(cli.id, peer_addrs, bootstrap_members, cli.data_dir.clone()).await?;

    let state = MetadataServiceState {
        raft,
        state_machine,
        node_id: cli.id,
        propose_timeout: Duration::from_secs(config.common.propose_timeout_secs),
    };

    let listener = tokio::net::TcpListener::bind(&cli.api_addr).await?;
    info!(id = cli.id, addr = cli.api_addr.as_str(), "metadata service listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
