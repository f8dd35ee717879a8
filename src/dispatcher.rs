//! The stateless placement/routing dispatcher (§4.4). Tracks storage-node
//! liveness and load the way `master_service::MasterService` tracks
//! `chunk_servers`/`last_heartbeat_time`, but the state here is never
//! replicated — it is dispatcher-local and resets on restart (§9 "Global
//! state").

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tokio::time;
use tracing::{info, warn};

use crate::error::{FsMeshError, FsMeshResult};
use crate::wire::{
    ChunkStruct, ClientChunk, FileLocationsResponse, HeartbeatPayload, ProposeResponse,
    RaftCommand, UploadFileRequest, UploadFileResponse,
};

#[derive(Debug, Clone)]
pub struct NodeState {
    pub last_heartbeat_secs: u64,
    pub active_writes: i64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}

/// `nodes: map SN URL -> {lastHeartbeat, activeWrites}`, guarded by a mutex
/// the way §5 requires — a dedicated lock distinct from the FSM's.
#[derive(Clone)]
pub struct NodeRegistry {
    nodes: Arc<Mutex<HashMap<String, NodeState>>>,
    liveness_ttl_secs: u64,
}

impl NodeRegistry {
    pub fn new(liveness_ttl_secs: u64) -> Self {
        Self {
            nodes: Arc::new(Mutex::new(HashMap::new())),
            liveness_ttl_secs,
        }
    }

    pub async fn record_heartbeat(&self, payload: HeartbeatPayload) {
        let mut nodes = self.nodes.lock().await;
        nodes.insert(
            payload.node_id,
            NodeState {
                last_heartbeat_secs: now_secs(),
                active_writes: payload.active_writes,
            },
        );
    }

    /// Nodes whose last heartbeat is within the liveness TTL (T5), ranked by
    /// `active_writes` ascending with a lexicographic URL tiebreak (§4.4).
    pub async fn live_nodes_ranked(&self) -> Vec<(String, i64)> {
        let now = now_secs();
        let nodes = self.nodes.lock().await;
        let mut live: Vec<(String, i64)> = nodes
            .iter()
            .filter(|(_, state)| now.saturating_sub(state.last_heartbeat_secs) <= self.liveness_ttl_secs)
            .map(|(addr, state)| (addr.clone(), state.active_writes))
            .collect();
        live.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        live
    }

    /// Periodically logs nodes that fall out of the liveness window.
    /// Grounded in `master_service::start_heartbeat_checker`, reduced to a
    /// signal only: rebalancing and chunk GC remain non-goals (§1, §9).
    pub fn spawn_stale_node_sweep(self: Arc<Self>, interval: Duration) {
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            let mut previously_live: std::collections::HashSet<String> =
                std::collections::HashSet::new();
            loop {
                ticker.tick().await;
                let live: std::collections::HashSet<String> = self
                    .live_nodes_ranked()
                    .await
                    .into_iter()
                    .map(|(addr, _)| addr)
                    .collect();
                for addr in previously_live.difference(&live) {
                    warn!(node = addr.as_str(), "storage node dropped out of liveness window");
                }
                previously_live = live;
            }
        });
    }
}

/// In-memory per-request load bump: advisory only, overwritten by the next
/// real heartbeat (§4.4 "These increments are advisory").
struct RequestLoad {
    bumps: HashMap<String, i64>,
}

impl RequestLoad {
    fn new() -> Self {
        Self {
            bumps: HashMap::new(),
        }
    }

    fn bump(&mut self, addr: &str) {
        *self.bumps.entry(addr.to_string()).or_insert(0) += 1;
    }

    fn adjusted(&self, addr: &str, base: i64) -> i64 {
        base + self.bumps.get(addr).copied().unwrap_or(0)
    }
}

/// Picks `replication_factor` distinct, currently-live nodes for `chunks`, in
/// client-supplied order, ranking by load ascending with each request's
/// in-flight bumps folded in so later chunks in the same request spread out
/// across nodes (§4.4 steps 1-3).
pub async fn build_upload_plan(
    registry: &NodeRegistry,
    chunks: &[ClientChunk],
    replication_factor: usize,
) -> Result<(HashMap<String, Vec<String>>, Vec<ChunkStruct>), FsMeshError> {
    let live = registry.live_nodes_ranked().await;
    if live.len() < replication_factor {
        return Err(FsMeshError::InsufficientReplicas {
            needed: replication_factor,
            available: live.len(),
        });
    }

    let base_load: HashMap<String, i64> = live.iter().cloned().collect();
    let mut request_load = RequestLoad::new();
    let mut plan = HashMap::new();
    let mut command_chunks = Vec::with_capacity(chunks.len());

    for chunk in chunks {
        let mut ranked: Vec<(String, i64)> = base_load
            .keys()
            .map(|addr| (addr.clone(), request_load.adjusted(addr, base_load[addr])))
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let selected: Vec<String> = ranked
            .into_iter()
            .take(replication_factor)
            .map(|(addr, _)| addr)
            .collect();

        for addr in &selected {
            request_load.bump(addr);
        }

        plan.insert(chunk.chunk_id.clone(), selected.clone());
        command_chunks.push(ChunkStruct {
            chunk_id: chunk.chunk_id.clone(),
            chunk_index: chunk.index,
            locations: selected,
        });
    }

    Ok((plan, command_chunks))
}

pub fn build_register_command(filename: &str, chunks: Vec<ChunkStruct>) -> RaftCommand {
    RaftCommand::register_file(filename, chunks)
}

/// Tracks the last-known metadata-service leader URL so repeated proposes
/// avoid re-probing every peer (§4.4 "Leader resolution").
#[derive(Clone)]
pub struct LeaderCache {
    leader_url: Arc<RwLock<Option<String>>>,
}

impl LeaderCache {
    pub fn new() -> Self {
        Self {
            leader_url: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get(&self) -> Option<String> {
        self.leader_url.read().await.clone()
    }

    pub async fn set(&self, url: String) {
        *self.leader_url.write().await = Some(url);
    }

    pub async fn clear(&self) {
        *self.leader_url.write().await = None;
    }
}

/// Global atomic load counter used by storage nodes, exported here too
/// because placement unit tests want something to point `activeWrites` at
/// without spinning up HTTP.
pub struct ActiveWrites(AtomicI64);

impl ActiveWrites {
    pub fn new() -> Self {
        Self(AtomicI64::new(0))
    }

    pub fn enter(&self) -> WriteGuard<'_> {
        self.0.fetch_add(1, Ordering::SeqCst);
        WriteGuard(self)
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct WriteGuard<'a>(&'a ActiveWrites);

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.0 .0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn log_registered_cluster_size(count: usize) {
    info!(nodes = count, "dispatcher tracking storage nodes");
}

/// Shared state for the dispatcher's own HTTP surface (§4.4/§6).
#[derive(Clone)]
pub struct DispatcherState {
    pub registry: NodeRegistry,
    pub leader: LeaderCache,
    pub metadata_addrs: Vec<String>,
    pub http: reqwest::Client,
    pub replication_factor: usize,
    pub propose_retry_deadline: Duration,
}

pub fn router(state: DispatcherState) -> Router {
    Router::new()
        .route("/heartbeat", post(handle_heartbeat))
        .route("/uploadFile", post(handle_upload_file))
        .route("/get-file-locations", get(handle_get_file_locations))
        .with_state(state)
}

async fn handle_heartbeat(
    State(state): State<DispatcherState>,
    Json(payload): Json<HeartbeatPayload>,
) -> StatusCode {
    state.registry.record_heartbeat(payload).await;
    StatusCode::OK
}

#[derive(Deserialize)]
pub struct FilenameQuery {
    pub filename: String,
}

/// Resolves the current metadata-service leader, probing the configured
/// peers in order and caching the first that answers `/status` with 200
/// (§4.4 "Leader resolution"). Retries once on a stale cached leader.
async fn resolve_leader(state: &DispatcherState) -> FsMeshResult<String> {
    if let Some(cached) = state.leader.get().await {
        if probe_leader(state, &cached).await {
            return Ok(cached);
        }
        state.leader.clear().await;
    }

    for addr in &state.metadata_addrs {
        if probe_leader(state, addr).await {
            state.leader.set(addr.clone()).await;
            return Ok(addr.clone());
        }
    }

    Err(FsMeshError::NotLeader)
}

async fn probe_leader(state: &DispatcherState, addr: &str) -> bool {
    matches!(
        state.http.get(format!("{addr}/status")).send().await,
        Ok(resp) if resp.status().is_success()
    )
}

/// Proposes `cmd` to the current leader, re-resolving and retrying once on
/// a 503 or network error before giving up within `propose_retry_deadline`
/// (§4.4: "On persistent failure ... fail the upload with 503").
async fn propose_with_retry(state: &DispatcherState, cmd: &RaftCommand) -> FsMeshResult<()> {
    let deadline = tokio::time::Instant::now() + state.propose_retry_deadline;

    loop {
        let leader = resolve_leader(state).await?;
        let result = state
            .http
            .post(format!("{leader}/raft/propose"))
            .json(cmd)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                let body: ProposeResponse = resp
                    .json()
                    .await
                    .map_err(|e| FsMeshError::Upstream(e.to_string()))?;
                return if body.success {
                    Ok(())
                } else {
                    Err(FsMeshError::ConsensusTimeout)
                };
            }
            Ok(resp) => {
                warn!(status = %resp.status(), leader = leader.as_str(), "propose rejected by leader");
                state.leader.clear().await;
            }
            Err(e) => {
                warn!(error = %e, leader = leader.as_str(), "propose request failed");
                state.leader.clear().await;
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(FsMeshError::ConsensusTimeout);
        }
    }
}

/// `POST /uploadFile` (§4.4 step-by-step): builds a placement plan, proposes
/// the resulting `RaftCommand` to the metadata service, and returns the plan
/// so the client knows where to stream each chunk.
async fn handle_upload_file(
    State(state): State<DispatcherState>,
    Json(req): Json<UploadFileRequest>,
) -> FsMeshResult<Json<UploadFileResponse>> {
    let (plan, command_chunks) =
        build_upload_plan(&state.registry, &req.chunks, state.replication_factor).await?;

    let cmd = build_register_command(&req.filename, command_chunks);
    propose_with_retry(&state, &cmd).await?;

    Ok(Json(UploadFileResponse {
        success: true,
        upload_plan: plan,
    }))
}

/// `GET /get-file-locations?filename=` — forwards to the leader's
/// `/get-metadata`, since chunk placement is only known to the FSM (§4.4).
async fn handle_get_file_locations(
    State(state): State<DispatcherState>,
    Query(query): Query<FilenameQuery>,
) -> FsMeshResult<Json<FileLocationsResponse>> {
    let leader = resolve_leader(&state).await?;

    let resp = state
        .http
        .get(format!("{leader}/get-metadata"))
        .query(&[("filename", &query.filename)])
        .send()
        .await
        .map_err(|e| FsMeshError::Upstream(e.to_string()))?;

    if resp.status() == StatusCode::NOT_FOUND {
        return Err(FsMeshError::NotFound(query.filename));
    }
    if !resp.status().is_success() {
        state.leader.clear().await;
        return Err(FsMeshError::Upstream(format!(
            "metadata service returned {}",
            resp.status()
        )));
    }

    resp.json()
        .await
        .map(Json)
        .map_err(|e| FsMeshError::Upstream(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn heartbeat(registry: &NodeRegistry, addr: &str, load: i64) {
        registry
            .record_heartbeat(HeartbeatPayload {
                node_id: addr.to_string(),
                active_writes: load,
            })
            .await;
    }

    #[tokio::test]
    async fn ranks_by_load_then_url() {
        let registry = NodeRegistry::new(30);
        heartbeat(&registry, "http://b", 1).await;
        heartbeat(&registry, "http://a", 1).await;
        heartbeat(&registry, "http://c", 0).await;

        let ranked = registry.live_nodes_ranked().await;
        assert_eq!(
            ranked.iter().map(|(a, _)| a.as_str()).collect::<Vec<_>>(),
            vec!["http://c", "http://a", "http://b"]
        );
    }

    #[tokio::test]
    async fn insufficient_replicas_when_too_few_live_nodes() {
        let registry = NodeRegistry::new(30);
        heartbeat(&registry, "http://a", 0).await;
        heartbeat(&registry, "http://b", 0).await;

        let err = build_upload_plan(
            &registry,
            &[ClientChunk {
                chunk_id: "c1".into(),
                index: 0,
            }],
            3,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, FsMeshError::InsufficientReplicas { .. }));
    }

    #[tokio::test]
    async fn picks_r_distinct_live_nodes_per_chunk_and_spreads_within_request() {
        let registry = NodeRegistry::new(30);
        for addr in ["http://a", "http://b", "http://c", "http://d"] {
            heartbeat(&registry, addr, 0).await;
        }

        let chunks = vec![
            ClientChunk {
                chunk_id: "c1".into(),
                index: 0,
            },
            ClientChunk {
                chunk_id: "c2".into(),
                index: 1,
            },
        ];
        let (plan, command_chunks) = build_upload_plan(&registry, &chunks, 3).await.unwrap();

        assert_eq!(plan.len(), 2);
        for replicas in plan.values() {
            assert_eq!(replicas.len(), 3);
            let unique: std::collections::HashSet<_> = replicas.iter().collect();
            assert_eq!(unique.len(), 3);
        }
        assert_eq!(command_chunks[0].chunk_index, 0);
        assert_eq!(command_chunks[1].chunk_index, 1);
        // second chunk's selection should differ from the first's now that
        // the first chunk's nodes carry an advisory bump.
        assert_ne!(plan["c1"], plan["c2"]);
    }

    #[test]
    fn active_writes_guard_decrements_on_drop() {
        let counter = ActiveWrites::new();
        {
            let _g1 = counter.enter();
            let _g2 = counter.enter();
            assert_eq!(counter.get(), 2);
        }
        assert_eq!(counter.get(), 0);
    }
}
