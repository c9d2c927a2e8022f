//! Thin wrapper binding an optional [`harvestflow_uploader::Uploader`] to
//! the Control Facade's `trigger-upload` operation. Upload is optional
//! system-wide configuration (`spec.md` §6 lists Lark/Feishu credentials as
//! config, not a hard requirement), so the scheduler may run with no
//! uploader configured at all.

use harvestflow_ids::JobId;
use harvestflow_uploader::{UploadReport, Uploader};

use crate::error::SchedulerError;

pub struct UploaderHandle {
    uploader: Uploader,
}

impl UploaderHandle {
    pub fn new(uploader: Uploader) -> Self {
        Self { uploader }
    }

    pub async fn upload(&self, job_id: Option<JobId>) -> Result<UploadReport, SchedulerError> {
        let report = match job_id {
            Some(job_id) => self.uploader.upload_job(job_id).await?,
            None => self.uploader.upload_all().await?,
        };
        Ok(report)
    }
}
