//! Storage node: persists chunks on local disk keyed by content hash, serves
//! read/write over HTTP, and emits heartbeats (§4.1). Grounded in
//! `chunkserver_impl.rs`'s `Chunk::upload`/`read` handlers, translated from a
//! streamed gRPC body to a raw HTTP byte stream with `axum`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path as AxPath, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use tokio::fs;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

use crate::dispatcher::ActiveWrites;
use crate::error::{FsMeshError, FsMeshResult};
use crate::wire::HeartbeatPayload;

pub struct StorageNodeState {
    pub data_dir: PathBuf,
    pub active_writes: ActiveWrites,
    pub self_url: String,
}

impl StorageNodeState {
    pub fn new(data_dir: PathBuf, self_url: String) -> Self {
        Self {
            data_dir,
            active_writes: ActiveWrites::new(),
            self_url,
        }
    }

    fn chunk_path(&self, chunk_id: &str) -> PathBuf {
        self.data_dir.join(chunk_id)
    }
}

pub type SharedStorageNode = Arc<StorageNodeState>;

pub async fn ensure_data_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        fs::set_permissions(path, perms).await?;
    }
    Ok(())
}

pub fn router(state: SharedStorageNode) -> Router {
    Router::new()
        .route("/writeChunk/:chunk_id", post(write_chunk))
        .route("/readChunk/:chunk_id", get(read_chunk))
        .with_state(state)
}

/// `POST /writeChunk/{chunkId}`. Overwrite is idempotent because the caller
/// only ever re-sends bytes it has already hashed to this id (I5): writing
/// the same chunk twice is a no-op from the client's perspective.
async fn write_chunk(
    State(state): State<SharedStorageNode>,
    AxPath(chunk_id): AxPath<String>,
    body: Bytes,
) -> FsMeshResult<StatusCode> {
    let _guard = state.active_writes.enter();
    let path = state.chunk_path(&chunk_id);

    info!(chunk_id = chunk_id.as_str(), bytes = body.len(), "writing chunk");

    fs::write(&path, &body).await.map_err(|e| {
        error!(chunk_id = chunk_id.as_str(), error = %e, "failed to write chunk");
        FsMeshError::ReplicaIo(format!("failed to write chunk '{chunk_id}': {e}"))
    })?;

    Ok(StatusCode::OK)
}

/// `GET /readChunk/{chunkId}`. 404 when the chunk has never been written
/// here; any other disk error surfaces as 500 for the client to retry
/// against a different replica. Streams the file off disk rather than
/// buffering it, the HTTP-native equivalent of the teacher's gRPC server
/// streaming upload/download (`chunkserver_impl.rs`'s `Upload`/`Download`).
async fn read_chunk(
    State(state): State<SharedStorageNode>,
    AxPath(chunk_id): AxPath<String>,
) -> FsMeshResult<Body> {
    let path = state.chunk_path(&chunk_id);
    debug!(chunk_id = chunk_id.as_str(), "reading chunk");

    let file = fs::File::open(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FsMeshError::NotFound(format!("chunk '{chunk_id}'"))
        } else {
            FsMeshError::ReplicaIo(format!("failed to read chunk '{chunk_id}': {e}"))
        }
    })?;

    Ok(Body::from_stream(ReaderStream::new(file)))
}

/// Sends `{node_id, active_writes}` to the dispatcher every
/// `heartbeat_interval`. Failures are logged and not retried within the
/// tick — the next tick tries again (§4.1). Ticks are driven through an
/// `IntervalStream`, the same `tokio_stream::wrappers` style the teacher's
/// `src/bin/client.rs` uses for its `ReceiverStream`.
pub fn spawn_heartbeat_loop(state: SharedStorageNode, lb_addr: String, interval: Duration) {
    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticks = IntervalStream::new(tokio::time::interval(interval));
        while ticks.next().await.is_some() {
            let payload = HeartbeatPayload {
                node_id: state.self_url.clone(),
                active_writes: state.active_writes.get(),
            };
            match client
                .post(format!("{lb_addr}/heartbeat"))
                .json(&payload)
                .timeout(interval)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    debug!("heartbeat acknowledged by dispatcher");
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), "dispatcher rejected heartbeat");
                }
                Err(e) => {
                    warn!(error = %e, "failed to send heartbeat");
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    #[tokio::test]
    async fn write_then_read_round_trips_bytes_matching_their_hash() {
        let dir = tempdir();
        ensure_data_dir(&dir).await.unwrap();
        let state: SharedStorageNode =
            Arc::new(StorageNodeState::new(dir.clone(), "http://sn-1".to_string()));

        let body = b"hello chunked world".to_vec();
        let mut hasher = Sha1::new();
        hasher.update(&body);
        let chunk_id = hex::encode(hasher.finalize());

        write_chunk(
            State(state.clone()),
            AxPath(chunk_id.clone()),
            Bytes::from(body.clone()),
        )
        .await
        .unwrap();

        // `read_chunk` streams the response body; assert on the bytes it
        // would stream by reading the same file the handler opens rather
        // than draining an `axum::body::Body` (which needs `http-body-util`
        // this crate does not otherwise depend on).
        assert!(read_chunk(State(state.clone()), AxPath(chunk_id.clone()))
            .await
            .is_ok());
        let on_disk = std::fs::read(dir.join(&chunk_id)).unwrap();
        assert_eq!(on_disk, body);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn reading_unknown_chunk_is_not_found() {
        let dir = tempdir();
        ensure_data_dir(&dir).await.unwrap();
        let state: SharedStorageNode =
            Arc::new(StorageNodeState::new(dir.clone(), "http://sn-1".to_string()));

        let err = read_chunk(State(state), AxPath("missing".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, FsMeshError::NotFound(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    fn tempdir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("fsmesh-test-{}", rand_suffix()));
        dir
    }

    fn rand_suffix() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }
}
