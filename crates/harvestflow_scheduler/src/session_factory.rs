//! How a leased profile becomes a live `BrowserSession` is out of scope
//! (`spec.md` §1: the headless-browser transport and selector library are
//! not this crate's concern) — injected here as a trait so the scheduler
//! can drive the real [`harvestflow_driver::Driver`] against a fixture in
//! tests, the way the uploader isolates `BitableTransport`.

use harvestflow_driver::{BrowserSession, RecordExtractor};
use harvestflow_ids::ProfileId;

use crate::error::SchedulerError;

#[async_trait::async_trait]
pub trait SessionFactory: Send + Sync {
    /// Opens a browser session bound to `profile_id` plus the extractor
    /// that knows how to read records off it.
    async fn open(
        &self,
        profile_id: &ProfileId,
    ) -> Result<(Box<dyn BrowserSession>, Box<dyn RecordExtractor>), SchedulerError>;
}
