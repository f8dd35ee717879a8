//! Wires `fsm::MetadataStateMachine` into `openraft`, the consensus library
//! this system treats as an external dependency rather than a rewrite target
//! (§9). This module owns exactly what the base design asks of it: applying
//! committed entries to the FSM, producing/installing snapshots, and
//! forwarding Raft RPCs over HTTP with `reqwest` — never placement, never
//! read serving (that stays in `metadata_service`).
//!
//! The log and stable store are openraft's in-memory shapes, but every
//! mutation is mirrored to `dataDir/logs.dat` and `dataDir/stable.dat`
//! (§6 "On-disk layout"), and snapshots are written under `dataDir/` too, so
//! a restarted replica does not lose its log, vote, or metadata state — the
//! same guarantee `original_source/namenode/api.go`'s leader gives by
//! writing `cmdBytes` to its own on-disk log file.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::path::PathBuf;
use std::sync::Arc;

use openraft::async_trait::async_trait;
use openraft::storage::{LogState, Snapshot};
use openraft::{
    BasicNode, Entry, EntryPayload, LogId, RaftLogReader, RaftNetwork, RaftNetworkFactory,
    RaftSnapshotBuilder, RaftStateMachine, RaftTypeConfig, SnapshotMeta, StorageError,
    StorageIOError, StoredMembership, Vote,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::fsm::MetadataStateMachine;
use crate::wire::RaftCommand;

openraft::declare_raft_types!(
    pub TypeConfig:
        D = RaftCommand,
        R = Result<(), String>,
        NodeId = u64,
        Node = BasicNode,
);

pub type NodeId = u64;

const LOG_FILE: &str = "logs.dat";
const STABLE_FILE: &str = "stable.dat";
const SNAPSHOT_FILE: &str = "snapshot.dat";

/// In-memory mirror of the log and vote, kept byte-for-byte consistent with
/// `dataDir/logs.dat` and `dataDir/stable.dat` on every mutation.
#[derive(Default)]
pub struct LogStore {
    log: BTreeMap<u64, Entry<TypeConfig>>,
    vote: Option<Vote<NodeId>>,
    last_purged: Option<LogId<NodeId>>,
}

#[derive(Clone)]
pub struct SharedLogStore {
    inner: Arc<Mutex<LogStore>>,
    data_dir: PathBuf,
}

impl SharedLogStore {
    /// Loads `logs.dat`/`stable.dat` from `data_dir` if present (a restarted
    /// replica picks up exactly where it left off), otherwise starts empty.
    pub fn new(data_dir: PathBuf) -> Self {
        let mut store = LogStore::default();

        if let Ok(bytes) = std::fs::read(data_dir.join(STABLE_FILE)) {
            if let Ok(vote) = serde_json::from_slice(&bytes) {
                store.vote = Some(vote);
            }
        }
        if let Ok(bytes) = std::fs::read(data_dir.join(LOG_FILE)) {
            if let Ok(entries) = serde_json::from_slice::<Vec<Entry<TypeConfig>>>(&bytes) {
                for entry in entries {
                    store.log.insert(entry.log_id.index, entry);
                }
            }
        }

        Self {
            inner: Arc::new(Mutex::new(store)),
            data_dir,
        }
    }

    async fn persist_vote(&self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        let bytes = serde_json::to_vec(vote)
            .map_err(|e| StorageIOError::write_vote(&e))?;
        tokio::fs::write(self.data_dir.join(STABLE_FILE), bytes)
            .await
            .map_err(|e| StorageIOError::write_vote(&e))?;
        Ok(())
    }

    async fn persist_log(&self, store: &LogStore) -> Result<(), StorageError<NodeId>> {
        let entries: Vec<&Entry<TypeConfig>> = store.log.values().collect();
        let bytes =
            serde_json::to_vec(&entries).map_err(|e| StorageIOError::write_logs(&e))?;
        tokio::fs::write(self.data_dir.join(LOG_FILE), bytes)
            .await
            .map_err(|e| StorageIOError::write_logs(&e))?;
        Ok(())
    }
}

#[async_trait]
impl RaftLogReader<TypeConfig> for SharedLogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + Send>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<NodeId>> {
        let store = self.inner.lock().await;
        Ok(store
            .log
            .range(range)
            .map(|(_, entry)| entry.clone())
            .collect())
    }
}

#[async_trait]
impl openraft::storage::RaftLogStorage<TypeConfig> for SharedLogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let store = self.inner.lock().await;
        let last = store.log.values().last().map(|e| e.log_id);
        Ok(LogState {
            last_purged_log_id: store.last_purged,
            last_log_id: last,
        })
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.inner.lock().await.vote = Some(*vote);
        self.persist_vote(vote).await
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.lock().await.vote)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: openraft::storage::LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
    {
        let mut store = self.inner.lock().await;
        for entry in entries {
            store.log.insert(entry.log_id.index, entry);
        }
        let result = self.persist_log(&store).await;
        drop(store);
        callback.log_io_completed(Ok(()));
        result
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let mut store = self.inner.lock().await;
        store.log.split_off(&log_id.index);
        self.persist_log(&store).await
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        let mut store = self.inner.lock().await;
        store.log = store.log.split_off(&(log_id.index + 1));
        store.last_purged = Some(log_id);
        self.persist_log(&store).await
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }
}

/// Wraps the deterministic `MetadataStateMachine` so `openraft` can drive it
/// the way `hashicorp/raft` drives `namenode.FSM` in the original Go service:
/// `apply` per committed entry, `build_snapshot`/`install_snapshot` for
/// catch-up.
pub struct StateMachineStore {
    pub fsm: RwLock<MetadataStateMachine>,
    last_applied: RwLock<Option<LogId<NodeId>>>,
    last_membership: RwLock<StoredMembership<TypeConfig>>,
    data_dir: PathBuf,
}

impl StateMachineStore {
    /// Restores from `dataDir/snapshot.dat` if one exists, so a replica
    /// brought back up from snapshot alone (Scenario 5) resumes with its
    /// prior file/chunk metadata rather than an empty FSM.
    pub fn new(data_dir: PathBuf) -> Self {
        let mut fsm = MetadataStateMachine::new();
        if let Ok(bytes) = std::fs::read(data_dir.join(SNAPSHOT_FILE)) {
            if let Err(e) = fsm.restore(&bytes) {
                warn!(error = %e, "ignoring unreadable snapshot on startup");
            }
        }

        Self {
            fsm: RwLock::new(fsm),
            last_applied: RwLock::new(None),
            last_membership: RwLock::new(StoredMembership::default()),
            data_dir,
        }
    }

    async fn persist_snapshot(&self, bytes: &[u8]) -> Result<(), StorageError<NodeId>> {
        tokio::fs::write(self.data_dir.join(SNAPSHOT_FILE), bytes)
            .await
            .map_err(|e| StorageIOError::write_snapshot(None, &e))?;
        Ok(())
    }
}

#[async_trait]
impl RaftSnapshotBuilder<TypeConfig> for Arc<StateMachineStore> {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let data = self.fsm.read().await.snapshot();
        let last_applied = *self.last_applied.read().await;
        let membership = self.last_membership.read().await.clone();

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership: membership,
            snapshot_id: format!("{:?}", last_applied),
        };

        self.persist_snapshot(&data).await?;

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}

#[async_trait]
impl RaftStateMachine<TypeConfig> for Arc<StateMachineStore> {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<TypeConfig>), StorageError<NodeId>> {
        Ok((
            *self.last_applied.read().await,
            self.last_membership.read().await.clone(),
        ))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<Result<(), String>>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
    {
        let mut results = Vec::new();
        let mut fsm = self.fsm.write().await;

        for entry in entries {
            *self.last_applied.write().await = Some(entry.log_id);

            match entry.payload {
                EntryPayload::Blank => results.push(Ok(())),
                EntryPayload::Membership(membership) => {
                    *self.last_membership.write().await =
                        StoredMembership::new(Some(entry.log_id), membership);
                    results.push(Ok(()));
                }
                EntryPayload::Normal(cmd) => {
                    let bytes = serde_json::to_vec(&cmd).expect("RaftCommand always serializes");
                    let outcome = fsm.apply(&bytes).map_err(|e| e.to_string());
                    if let Err(e) = &outcome {
                        warn!("metadata apply rejected: {e}");
                    }
                    results.push(outcome);
                }
            }
        }

        Ok(results)
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<NodeId>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<TypeConfig>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<NodeId>> {
        let bytes = snapshot.into_inner();
        self.fsm
            .write()
            .await
            .restore(&bytes)
            .map_err(|e| openraft::StorageIOError::read_snapshot(Some(meta.signature()), &e))?;
        self.persist_snapshot(&bytes).await?;
        *self.last_applied.write().await = meta.last_log_id;
        *self.last_membership.write().await = meta.last_membership.clone();
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let mut builder = self.clone();
        Ok(Some(RaftSnapshotBuilder::build_snapshot(&mut builder).await?))
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        self.clone()
    }
}

/// Maps a `NodeId` to the peer's HTTP address for the RPC forwarding below.
pub type PeerAddrs = Arc<RwLock<BTreeMap<NodeId, String>>>;

#[derive(Clone)]
pub struct Network {
    peers: PeerAddrs,
    client: reqwest::Client,
}

impl Network {
    pub fn new(peers: PeerAddrs) -> Self {
        Self {
            peers,
            client: reqwest::Client::new(),
        }
    }
}

impl RaftNetworkFactory<TypeConfig> for Network {
    type Network = NetworkConnection;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        NetworkConnection {
            target,
            addr: node.addr.clone(),
            client: self.client.clone(),
        }
    }
}

pub struct NetworkConnection {
    target: NodeId,
    addr: String,
    client: reqwest::Client,
}

type RpcError<E = openraft::error::Infallible> =
    openraft::error::RPCError<NodeId, BasicNode, openraft::error::RaftError<NodeId, E>>;

#[async_trait]
impl RaftNetwork<TypeConfig> for NetworkConnection {
    async fn append_entries(
        &mut self,
        rpc: openraft::raft::AppendEntriesRequest<TypeConfig>,
        _option: openraft::network::RPCOption,
    ) -> Result<openraft::raft::AppendEntriesResponse<NodeId>, RpcError> {
        debug!(target = self.target, "forwarding append_entries");
        self.client
            .post(format!("http://{}/raft/append-entries", self.addr))
            .json(&rpc)
            .send()
            .await
            .map_err(|e| openraft::error::RPCError::Network(openraft::error::NetworkError::new(&e)))?
            .json()
            .await
            .map_err(|e| openraft::error::RPCError::Network(openraft::error::NetworkError::new(&e)))
    }

    async fn install_snapshot(
        &mut self,
        rpc: openraft::raft::InstallSnapshotRequest<TypeConfig>,
        _option: openraft::network::RPCOption,
    ) -> Result<
        openraft::raft::InstallSnapshotResponse<NodeId>,
        RpcError<openraft::error::InstallSnapshotError>,
    > {
        self.client
            .post(format!("http://{}/raft/install-snapshot", self.addr))
            .json(&rpc)
            .send()
            .await
            .map_err(|e| openraft::error::RPCError::Network(openraft::error::NetworkError::new(&e)))?
            .json()
            .await
            .map_err(|e| openraft::error::RPCError::Network(openraft::error::NetworkError::new(&e)))
    }

    async fn vote(
        &mut self,
        rpc: openraft::raft::VoteRequest<NodeId>,
        _option: openraft::network::RPCOption,
    ) -> Result<openraft::raft::VoteResponse<NodeId>, RpcError> {
        self.client
            .post(format!("http://{}/raft/vote", self.addr))
            .json(&rpc)
            .send()
            .await
            .map_err(|e| openraft::error::RPCError::Network(openraft::error::NetworkError::new(&e)))?
            .json()
            .await
            .map_err(|e| openraft::error::RPCError::Network(openraft::error::NetworkError::new(&e)))
    }
}
