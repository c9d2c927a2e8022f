//! Canonical default values shared across the scheduler, driver, and
//! uploader.

/// Default sqlite database URL, relative to the process working directory.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:harvestflow.db";
/// Default number of jobs the scheduler will run concurrently.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
/// Minimum gap, in seconds, before a released profile is re-lease-eligible.
pub const DEFAULT_PROFILE_COOLDOWN_SECS: u64 = 2;
/// Idle duration, in seconds, after which a profile is decisively preferred
/// for rotation regardless of fairness score (`spec.md` §4.2).
pub const DEFAULT_PROFILE_SWITCH_INTERVAL_SECS: u64 = 30;
/// Overall per-job deadline, in seconds, before force-cancellation.
pub const DEFAULT_JOB_DEADLINE_SECS: u64 = 900;
/// Default Lark/Feishu Bitable API base URL.
pub const DEFAULT_LARK_API_BASE: &str = "https://open.feishu.cn/open-apis";
/// Default maximum upload retries for transient/5xx errors.
pub const DEFAULT_UPLOAD_MAX_RETRIES: u32 = 3;

/// Maximum Rate Governor calls admitted per rolling one-second window.
pub const DEFAULT_RATE_CEILING_PER_SEC: u32 = 3;
/// Base delay for the Rate Governor's exponential backoff.
pub const DEFAULT_BACKOFF_BASE_SECS: f64 = 1.0;
/// Cap on the Rate Governor's exponential backoff delay.
pub const DEFAULT_BACKOFF_CAP_SECS: f64 = 60.0;

/// Message recorded as the job's failure reason on user-initiated cancellation.
pub const CANCELLED_BY_USER_MESSAGE: &str = "Cancelled by user";
