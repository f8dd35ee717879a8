//! Error kinds shared by every binary in the workspace (§7 of the design doc).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum FsMeshError {
    #[error("not the consensus leader")]
    NotLeader,

    #[error("consensus apply timed out")]
    ConsensusTimeout,

    #[error("insufficient replicas: need {needed}, have {available} live nodes")]
    InsufficientReplicas { needed: usize, available: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("replica I/O error: {0}")]
    ReplicaIo(String),

    #[error("corrupt metadata: {0}")]
    Corrupt(String),

    #[error("file already registered: {0}")]
    DuplicateFile(String),

    #[error("upstream error: {0}")]
    Upstream(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for FsMeshError {
    fn into_response(self) -> Response {
        let status = match &self {
            FsMeshError::NotLeader | FsMeshError::ConsensusTimeout => StatusCode::SERVICE_UNAVAILABLE,
            FsMeshError::InsufficientReplicas { .. } => StatusCode::SERVICE_UNAVAILABLE,
            FsMeshError::NotFound(_) => StatusCode::NOT_FOUND,
            FsMeshError::BadRequest(_) => StatusCode::BAD_REQUEST,
            FsMeshError::ReplicaIo(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FsMeshError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FsMeshError::DuplicateFile(_) => StatusCode::CONFLICT,
            FsMeshError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = if let FsMeshError::InsufficientReplicas { .. } = &self {
            ErrorBody {
                error: "insufficient_replicas".to_string(),
            }
        } else {
            ErrorBody {
                error: self.to_string(),
            }
        };
        (status, Json(body)).into_response()
    }
}

pub type FsMeshResult<T> = Result<T, FsMeshError>;
