//! Errors raised by the External Uploader and its Bitable transport.

use harvestflow_protocol::{ErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("network error talking to the tabular service: {0}")]
    Transport(String),

    #[error("tabular service rejected the request (rate limit): {0}")]
    RateLimit(String),

    #[error("bearer token rejected by the tabular service")]
    AuthExpired,

    #[error("credentials rejected by the tabular service: {0}")]
    PermissionDenied(String),

    #[error("tabular service returned an unexpected 4xx: {0}")]
    RemoteRejected(String),

    #[error("tabular service returned a 5xx: {0}")]
    ServerError(String),

    #[error("storage error: {0}")]
    Storage(#[from] harvestflow_db::DbError),

    #[error("response body could not be parsed: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl HasErrorKind for UploadError {
    fn kind(&self) -> ErrorKind {
        match self {
            UploadError::Transport(_) | UploadError::ServerError(_) => ErrorKind::TransientNetwork,
            UploadError::RateLimit(_) => ErrorKind::RateLimit,
            UploadError::AuthExpired => ErrorKind::AuthExpired,
            UploadError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            UploadError::RemoteRejected(_) => ErrorKind::TransientNetwork,
            UploadError::Storage(_) => ErrorKind::StorageError,
            UploadError::Malformed(_) => ErrorKind::TransientNetwork,
        }
    }
}
