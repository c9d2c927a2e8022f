//! The two opaque collaborators the driver consumes (`spec.md` §1):
//! `BrowserSession` (navigation, DOM queries, scroll) and `RecordExtractor`
//! (DOM-to-record parsing). Neither is implemented here — the selector
//! library and the browser control transport are out of scope.

use std::time::Duration;

use futures::future::BoxFuture;
use harvestflow_protocol::{CandidateRecord, Target};

use crate::error::DriverError;

/// A live handle to one headless-browser tab bound to a leased profile.
pub trait BrowserSession: Send {
    fn navigate<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, Result<(), DriverError>>;

    fn wait_for_selector<'a>(
        &'a mut self,
        selector: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<(), DriverError>>;

    fn scroll_by(&mut self, delta_px: i64) -> BoxFuture<'_, Result<(), DriverError>>;

    fn scroll_offset(&mut self) -> BoxFuture<'_, Result<i64, DriverError>>;

    fn evaluate_json<'a>(
        &'a mut self,
        script: &'a str,
    ) -> BoxFuture<'a, Result<serde_json::Value, DriverError>>;
}

/// The target currently being extracted, handed to the extractor so it can
/// scope its DOM queries without the driver knowing selector details.
pub struct ExtractionContext {
    pub target: Target,
}

/// Parses whatever the session currently has rendered into candidate
/// records. Implementations own all selector/DOM-shape knowledge.
pub trait RecordExtractor: Send + Sync {
    fn extract<'a>(
        &'a self,
        session: &'a mut dyn BrowserSession,
        ctx: &'a ExtractionContext,
    ) -> BoxFuture<'a, Result<Vec<CandidateRecord>, DriverError>>;
}
