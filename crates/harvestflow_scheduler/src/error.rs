//! Errors raised by the Job Scheduler and Control Facade.

use harvestflow_protocol::{ErrorKind, HasErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("storage error: {0}")]
    Storage(#[from] harvestflow_db::DbError),

    #[error("invalid job submission: {0}")]
    ConstraintViolation(String),

    #[error("job {0} not found")]
    JobNotFound(i64),

    #[error("job {0} is not in a cancellable state")]
    NotCancellable(i64),

    #[error("job {0} is not failed, cannot restart")]
    NotRestartable(i64),

    #[error("failed to open a browser session for profile {0}: {1}")]
    SessionOpenFailed(String, String),

    #[error("uploader is not configured")]
    UploaderNotConfigured,

    #[error("upload error: {0}")]
    Upload(#[from] harvestflow_uploader::error::UploadError),

    #[error("failed to build export: {0}")]
    ExportFailed(String),
}

impl HasErrorKind for SchedulerError {
    fn kind(&self) -> ErrorKind {
        match self {
            SchedulerError::Storage(e) => e.kind(),
            SchedulerError::Upload(e) => e.kind(),
            SchedulerError::ConstraintViolation(_)
            | SchedulerError::JobNotFound(_)
            | SchedulerError::NotCancellable(_)
            | SchedulerError::NotRestartable(_)
            | SchedulerError::UploaderNotConfigured
            | SchedulerError::ExportFailed(_) => ErrorKind::ConstraintViolation,
            SchedulerError::SessionOpenFailed(_, _) => ErrorKind::SessionLost,
        }
    }
}
