//! Shared domain types, configuration, and error taxonomy for HarvestFlow.
//!
//! Every crate in the workspace depends on this one for the vocabulary it
//! shares with the rest of the system: `Job`/`Record`/`Target`/
//! `ScrapeCheckpoint` (see [`types`]), `SystemConfig` (see [`config`]), and
//! the cross-cutting [`error::ErrorKind`] taxonomy.

pub mod config;
pub mod defaults;
pub mod error;
pub mod types;

pub use config::SystemConfig;
pub use error::{ErrorKind, HasErrorKind};
pub use types::{
    CandidateRecord, Job, JobSpec, JobState, Record, ScrapeCheckpoint, Shortfall, Target,
    TerminalReason, Thresholds, materialize_targets,
};
