//! Extraction Driver (`spec.md` §4.5, C5) — the per-job navigate/scroll/
//! extract/dedupe loop. Given a [`Job`](harvestflow_protocol::Job) and a
//! live [`session::BrowserSession`], [`driver::Driver::run_job`] drives the
//! session to completion across every target, emitting records to the
//! Record Store and state to the Checkpoint Store, and returns a
//! [`driver::DriverOutcome`] rather than propagating via panics/exceptions.

pub mod cancel;
pub mod driver;
pub mod error;
pub mod session;

pub use cancel::CancellationToken;
pub use driver::{Driver, DriverOutcome};
pub use error::DriverError;
pub use session::{BrowserSession, ExtractionContext, RecordExtractor};
