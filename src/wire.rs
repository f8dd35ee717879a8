//! Wire JSON shapes exchanged between client, dispatcher, metadata service and
//! storage nodes. Field names are the exact snake_case tokens from §6 of the
//! design doc — every struct here derives `Serialize`/`Deserialize` so the
//! binaries never hand-roll JSON, the way `rustfs::config` derives `Deserialize`
//! for its TOML structs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ChunkId = String;

/// A single chunk entry inside a `RaftCommand` or a metadata read response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkStruct {
    pub chunk_id: ChunkId,
    pub chunk_index: usize,
    pub locations: Vec<String>,
}

/// The single command type the metadata FSM recognizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RaftCommand {
    pub operation: String,
    pub filename: String,
    pub chunks: Vec<ChunkStruct>,
}

pub const OP_REGISTER_FILE: &str = "REGISTER_FILE";

impl RaftCommand {
    pub fn register_file(filename: impl Into<String>, chunks: Vec<ChunkStruct>) -> Self {
        Self {
            operation: OP_REGISTER_FILE.to_string(),
            filename: filename.into(),
            chunks,
        }
    }
}

/// Sent by storage nodes to the dispatcher every heartbeat tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub node_id: String,
    pub active_writes: i64,
}

/// `POST /uploadFile` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientChunk {
    pub chunk_id: ChunkId,
    pub index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFileRequest {
    pub filename: String,
    pub chunks: Vec<ClientChunk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadFileResponse {
    pub success: bool,
    pub upload_plan: HashMap<ChunkId, Vec<String>>,
}

/// `GET /get-file-locations` and `GET /get-metadata` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileLocationsResponse {
    pub chunks: Vec<ChunkStruct>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeResponse {
    pub success: bool,
}
