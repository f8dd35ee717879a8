//! Client-side chunking and upload/download drivers (§4.5). Kept as library
//! functions (not inlined in `src/bin/client.rs`) so the placement-agnostic
//! parts — plan requests, parallel fan-out, replica fallback — are testable
//! without a real dispatcher, the same split the teacher's `rustfs` lacks but
//! the rest of the pack (`summit-services::file_transfer`) favors.

use std::collections::HashMap;
use std::path::Path;

use futures::future::join_all;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

use crate::chunking::{split_into_chunks, ChunkPiece};
use crate::error::{FsMeshError, FsMeshResult};
use crate::wire::{
    ClientChunk, FileLocationsResponse, UploadFileRequest, UploadFileResponse,
};

pub struct DispatcherClient {
    http: reqwest::Client,
    dispatcher_addr: String,
}

impl DispatcherClient {
    pub fn new(dispatcher_addr: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            dispatcher_addr,
        }
    }

    pub async fn request_upload_plan(
        &self,
        filename: &str,
        pieces: &[ChunkPiece],
    ) -> FsMeshResult<HashMap<String, Vec<String>>> {
        let chunks = pieces
            .iter()
            .map(|p| ClientChunk {
                chunk_id: p.chunk_id.clone(),
                index: p.index,
            })
            .collect();

        let resp = self
            .http
            .post(format!("{}/uploadFile", self.dispatcher_addr))
            .json(&UploadFileRequest {
                filename: filename.to_string(),
                chunks,
            })
            .send()
            .await
            .map_err(|e| FsMeshError::Upstream(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(FsMeshError::Upstream(format!(
                "dispatcher returned {}",
                resp.status()
            )));
        }

        let body: UploadFileResponse = resp
            .json()
            .await
            .map_err(|e| FsMeshError::Upstream(e.to_string()))?;
        Ok(body.upload_plan)
    }

    pub async fn get_file_locations(&self, filename: &str) -> FsMeshResult<FileLocationsResponse> {
        let resp = self
            .http
            .get(format!("{}/get-file-locations", self.dispatcher_addr))
            .query(&[("filename", filename)])
            .send()
            .await
            .map_err(|e| FsMeshError::Upstream(e.to_string()))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FsMeshError::NotFound(filename.to_string()));
        }
        if !resp.status().is_success() {
            return Err(FsMeshError::Upstream(format!(
                "dispatcher returned {}",
                resp.status()
            )));
        }

        resp.json()
            .await
            .map_err(|e| FsMeshError::Upstream(e.to_string()))
    }
}

/// Uploads every chunk to every URL in its replica set in parallel. A
/// chunk's upload only fails the whole operation if all of its replicas
/// fail (§7: "does not fail the upload unless all replicas of a chunk
/// fail" — the check the base design left for implementers to add).
pub async fn upload_chunks(
    http: &reqwest::Client,
    pieces: Vec<ChunkPiece>,
    plan: &HashMap<String, Vec<String>>,
) -> FsMeshResult<()> {
    let uploads = pieces.into_iter().map(|piece| {
        let http = http.clone();
        let replicas = plan.get(&piece.chunk_id).cloned().unwrap_or_default();
        async move {
            let futures = replicas.iter().map(|url| {
                let http = http.clone();
                let url = url.clone();
                let data = piece.data.clone();
                let chunk_id = piece.chunk_id.clone();
                async move {
                    let result = http
                        .post(format!("{url}/writeChunk/{chunk_id}"))
                        .body(data)
                        .send()
                        .await;
                    match result {
                        Ok(resp) if resp.status().is_success() => true,
                        Ok(resp) => {
                            warn!(%url, chunk_id = chunk_id.as_str(), status = %resp.status(), "replica rejected chunk write");
                            false
                        }
                        Err(e) => {
                            warn!(%url, chunk_id = chunk_id.as_str(), error = %e, "replica write failed");
                            false
                        }
                    }
                }
            });
            let outcomes = join_all(futures).await;
            let any_succeeded = outcomes.iter().any(|ok| *ok);
            (piece.chunk_id, any_succeeded)
        }
    });

    for (chunk_id, any_succeeded) in join_all(uploads).await {
        if !any_succeeded {
            error!(chunk_id = chunk_id.as_str(), "all replicas failed for chunk");
            return Err(FsMeshError::ReplicaIo(format!(
                "all replicas failed for chunk '{chunk_id}'"
            )));
        }
    }

    info!("upload complete");
    Ok(())
}

/// Downloads each chunk in parallel, trying successive replicas in order on
/// failure (§4.5, fixing the "only `locations[0]`" gap flagged in §9), then
/// writes the reassembled file in `chunk_index` order.
pub async fn download_file(
    http: &reqwest::Client,
    plan: FileLocationsResponse,
    save_as: &Path,
) -> FsMeshResult<()> {
    let mut chunks = plan.chunks;
    chunks.sort_by_key(|c| c.chunk_index);

    let fetches = chunks.into_iter().map(|chunk| {
        let http = http.clone();
        async move {
            for url in &chunk.locations {
                match http.get(format!("{url}/readChunk/{}", chunk.chunk_id)).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        match resp.bytes().await {
                            Ok(bytes) => return Ok((chunk.chunk_index, bytes.to_vec())),
                            Err(e) => warn!(%url, error = %e, "failed reading response body"),
                        }
                    }
                    Ok(resp) => warn!(%url, status = %resp.status(), "replica returned error"),
                    Err(e) => warn!(%url, error = %e, "replica unreachable"),
                }
            }
            Err(FsMeshError::ReplicaIo(format!(
                "all replicas failed for chunk '{}'",
                chunk.chunk_id
            )))
        }
    });

    let mut results = join_all(fetches).await;
    results.sort_by_key(|r| match r {
        Ok((index, _)) => *index as i64,
        Err(_) => i64::MAX,
    });

    let mut file = File::create(save_as)
        .await
        .map_err(|e| FsMeshError::ReplicaIo(format!("failed to create output file: {e}")))?;

    for result in results {
        let (_, data) = result?;
        file.write_all(&data)
            .await
            .map_err(|e| FsMeshError::ReplicaIo(format!("failed to write output file: {e}")))?;
    }

    info!(path = %save_as.display(), "download complete");
    Ok(())
}

pub async fn chunk_path(path: &Path, chunk_size: usize) -> std::io::Result<Vec<ChunkPiece>> {
    let file = File::open(path).await?;
    split_into_chunks(file, chunk_size).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_plan_request_carries_index_order() {
        let pieces = vec![
            ChunkPiece {
                index: 0,
                chunk_id: "c0".into(),
                data: vec![],
            },
            ChunkPiece {
                index: 1,
                chunk_id: "c1".into(),
                data: vec![],
            },
        ];
        let req = UploadFileRequest {
            filename: "a.bin".into(),
            chunks: pieces
                .iter()
                .map(|p| ClientChunk {
                    chunk_id: p.chunk_id.clone(),
                    index: p.index,
                })
                .collect(),
        };
        assert_eq!(req.chunks[0].index, 0);
        assert_eq!(req.chunks[1].index, 1);
    }
}
