//! HTTP surface for the metadata service (§4.3): `/status`, `/raft/propose`,
//! `/get-metadata`, plus the Raft peer-to-peer RPC endpoints `Network` in
//! `raft_types` dials. Reads are served only from the leader by checking
//! `openraft`'s current-leader metric before touching the FSM — the same
//! guarantee `namenode.ApiServer.handleStatus` gives by checking
//! `raft.State() != raft.Leader`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{FsMeshError, FsMeshResult};
use crate::raft_types::{NodeId, PeerAddrs, StateMachineStore, TypeConfig};
use crate::wire::{FileLocationsResponse, ProposeResponse, RaftCommand, StatusResponse};

pub type RaftHandle = openraft::Raft<TypeConfig>;

#[derive(Clone)]
pub struct MetadataServiceState {
    pub raft: RaftHandle,
    pub state_machine: Arc<StateMachineStore>,
    pub node_id: NodeId,
    pub propose_timeout: Duration,
}

pub fn router(state: MetadataServiceState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/raft/propose", post(handle_propose))
        .route("/get-metadata", get(handle_get_metadata))
        .route("/raft/append-entries", post(handle_append_entries))
        .route("/raft/install-snapshot", post(handle_install_snapshot))
        .route("/raft/vote", post(handle_vote))
        .with_state(state)
}

async fn is_leader(state: &MetadataServiceState) -> bool {
    let metrics = state.raft.metrics().borrow().clone();
    metrics.current_leader == Some(state.node_id)
}

/// `GET /status` — 200 if this replica believes it is the leader, 503
/// otherwise. The dispatcher polls this to locate the leader (§4.4).
async fn handle_status(State(state): State<MetadataServiceState>) -> (StatusCode, Json<StatusResponse>) {
    if is_leader(&state).await {
        (StatusCode::OK, Json(StatusResponse { status: "true".into() }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse { status: "false".into() }),
        )
    }
}

/// `POST /raft/propose` — leader-only. Blocks on `Raft::client_write` for up
/// to `propose_timeout` (5s in the base design).
async fn handle_propose(
    State(state): State<MetadataServiceState>,
    body: axum::body::Bytes,
) -> FsMeshResult<Json<ProposeResponse>> {
    if !is_leader(&state).await {
        return Err(FsMeshError::NotLeader);
    }

    let cmd: RaftCommand = serde_json::from_slice(&body)
        .map_err(|e| FsMeshError::BadRequest(format!("bad request body: {e}")))?;

    let outcome = tokio::time::timeout(state.propose_timeout, state.raft.client_write(cmd)).await;

    match outcome {
        Err(_) => Err(FsMeshError::ConsensusTimeout),
        Ok(Err(e)) => {
            warn!(error = %e, "raft apply error");
            Err(FsMeshError::ConsensusTimeout)
        }
        Ok(Ok(response)) => match response.data {
            Ok(()) => Ok(Json(ProposeResponse { success: true })),
            Err(reason) => {
                warn!(error = %reason, "metadata apply rejected");
                Err(FsMeshError::ConsensusTimeout)
            }
        },
    }
}

#[derive(Deserialize)]
pub struct GetMetadataQuery {
    pub filename: String,
}

/// `GET /get-metadata?filename=` — leader-only, served straight from the
/// FSM under its own lock (§4.2 `GetFileMetadata`), not through the log.
/// Answers only 200/404/503 (§6): this handler maps errors itself rather
/// than reusing `FsMeshError`'s shared `IntoResponse`, which also serves the
/// storage node's wider (200/404/500) contract.
async fn handle_get_metadata(
    State(state): State<MetadataServiceState>,
    Query(query): Query<GetMetadataQuery>,
) -> axum::response::Response {
    if !is_leader(&state).await {
        return FsMeshError::NotLeader.into_response();
    }

    let fsm = state.state_machine.fsm.read().await;
    match fsm.get_file_metadata(&query.filename) {
        Ok(chunks) => Json(FileLocationsResponse { chunks }).into_response(),
        Err(FsMeshError::NotFound(name)) => FsMeshError::NotFound(name).into_response(),
        Err(FsMeshError::Corrupt(reason)) => {
            warn!(filename = query.filename.as_str(), error = %reason, "metadata corrupt");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": reason })),
            )
                .into_response()
        }
        Err(other) => {
            warn!(filename = query.filename.as_str(), error = %other, "unexpected get-metadata error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "error": other.to_string() })),
            )
                .into_response()
        }
    }
}

async fn handle_append_entries(
    State(state): State<MetadataServiceState>,
    Json(rpc): Json<openraft::raft::AppendEntriesRequest<TypeConfig>>,
) -> Json<openraft::raft::AppendEntriesResponse<NodeId>> {
    let resp = state
        .raft
        .append_entries(rpc)
        .await
        .expect("local append_entries handling does not fail at the transport layer");
    Json(resp)
}

async fn handle_install_snapshot(
    State(state): State<MetadataServiceState>,
    Json(rpc): Json<openraft::raft::InstallSnapshotRequest<TypeConfig>>,
) -> Json<openraft::raft::InstallSnapshotResponse<NodeId>> {
    let resp = state
        .raft
        .install_snapshot(rpc)
        .await
        .expect("local install_snapshot handling does not fail at the transport layer");
    Json(resp)
}

async fn handle_vote(
    State(state): State<MetadataServiceState>,
    Json(rpc): Json<openraft::raft::VoteRequest<NodeId>>,
) -> Json<openraft::raft::VoteResponse<NodeId>> {
    let resp = state
        .raft
        .vote(rpc)
        .await
        .expect("local vote handling does not fail at the transport layer");
    Json(resp)
}

/// Builds the `Raft` node, bootstrapping the cluster membership when
/// `bootstrap` is set (§4.3: "exactly one replica is started with
/// bootstrap=true"), mirroring `main.go`'s fixed three-replica
/// `raft.Configuration{Servers: [...]}` call.
pub async fn build_raft_node(
    node_id: NodeId,
    peers: PeerAddrs,
    bootstrap_members: Option<BTreeMap<NodeId, openraft::BasicNode>>,
    data_dir: PathBuf,
) -> anyhow::Result<(RaftHandle, Arc<StateMachineStore>)> {
    let config = Arc::new(openraft::Config::default().validate()?);
    let log_store = crate::raft_types::SharedLogStore::new(data_dir.clone());
    let state_machine = Arc::new(StateMachineStore::new(data_dir));
    let network = crate::raft_types::Network::new(peers);

    let raft = openraft::Raft::new(
        node_id,
        config,
        network,
        log_store,
        state_machine.clone(),
    )
    .await?;

    if let Some(members) = bootstrap_members {
        info!(node_id, "bootstrapping metadata service cluster");
        raft.initialize(members).await?;
    }

    Ok((raft, state_machine))
}
