//! Job Scheduler (`spec.md` §4.7, C7) and Control Facade (§4.8, C8): FIFO
//! admission against the Profile Pool and a concurrency cap, in-process
//! dispatch of jobs onto the Extraction Driver, restart recovery, and the
//! thin administrative surface translating external requests into calls on
//! the scheduler and the Record Store.

pub mod control;
pub mod error;
pub mod scheduler;
pub mod session_factory;
pub mod uploader_handle;

pub use control::{ControlRequest, ControlResponse, ExportFormat, SubmitJobRequest};
pub use error::SchedulerError;
pub use scheduler::Scheduler;
pub use session_factory::SessionFactory;
pub use uploader_handle::UploaderHandle;
