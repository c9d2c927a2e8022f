//! Errors raised by the Extraction Driver and its `BrowserSession`/
//! `RecordExtractor` collaborators.

use harvestflow_protocol::{ErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timed out waiting for selector: {0}")]
    ElementWait(String),

    #[error("scroll failed: {0}")]
    Scroll(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("browser session is no longer responsive: {0}")]
    SessionLost(String),

    #[error("storage error: {0}")]
    Storage(#[from] harvestflow_db::DbError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HasErrorKind for DriverError {
    fn kind(&self) -> ErrorKind {
        match self {
            DriverError::Navigation(_) | DriverError::ElementWait(_) | DriverError::Scroll(_) => {
                ErrorKind::TransientNetwork
            }
            DriverError::Extraction(_) => ErrorKind::ExtractionMalformed,
            DriverError::SessionLost(_) => ErrorKind::SessionLost,
            DriverError::Storage(_) => ErrorKind::StorageError,
            DriverError::Serialization(_) => ErrorKind::StorageError,
        }
    }
}
