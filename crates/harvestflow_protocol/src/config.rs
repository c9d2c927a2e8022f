//! System configuration shared across the scheduler, driver, and uploader.
//!
//! Built from compiled defaults, then layered with persisted `system_config`
//! rows (see `spec.md` §6), then overridden by uppercased environment
//! variables as the final authority, and treated as an immutable value for
//! the remainder of the process lifetime (`spec.md` §5, "No global mutable
//! singletons"). Loading the persisted rows themselves is the caller's job
//! (`harvestflow_db::RecordStore::load_system_config`) since this crate has
//! no database dependency of its own; [`SystemConfig::apply_db_rows`] only
//! folds an already-loaded map in.

use std::collections::HashMap;
use std::time::Duration;

/// Canonical system configuration used by every binary entry point.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Sqlite database URL for the Record Store / Checkpoint Store.
    pub database_url: String,
    /// Fixed set of browser profile ids the Profile Pool is constructed
    /// from. Immutable after construction (`spec.md` §4.2, invariant iii).
    pub profile_ids: Vec<String>,
    /// Maximum number of jobs running concurrently.
    pub max_concurrency: usize,
    /// Minimum inter-use gap before a released profile is re-lease-eligible.
    pub profile_cooldown: Duration,
    /// Idle duration after which a profile is decisively preferred for
    /// rotation regardless of score.
    pub profile_switch_interval: Duration,
    /// Overall per-job deadline; jobs exceeding it are force-cancelled.
    pub job_deadline: Duration,
    /// Lark/Feishu Bitable app id.
    pub lark_app_id: String,
    /// Lark/Feishu Bitable app secret.
    pub lark_app_secret: String,
    /// Lark/Feishu Bitable base URL (override for testing against a mock).
    pub lark_api_base: String,
    /// Maximum upload retries for transient/5xx errors before giving up on
    /// a batch for this run (it remains unsynced and is retried next run).
    pub upload_max_retries: u32,
}

impl SystemConfig {
    /// Folds in an already-loaded `system_config` table, keyed by the same
    /// uppercased names [`Self::apply_env_overrides`] reads from the
    /// environment (`spec.md` §6). Call this before `apply_env_overrides` so
    /// environment variables remain the final override.
    pub fn apply_db_rows(mut self, rows: &HashMap<String, String>) -> Self {
        if let Some(v) = rows.get("DATABASE_URL") {
            self.database_url = v.clone();
        }
        if let Some(v) = rows.get("LARK_APP_ID") {
            self.lark_app_id = v.clone();
        }
        if let Some(v) = rows.get("LARK_APP_SECRET") {
            self.lark_app_secret = v.clone();
        }
        if let Some(v) = rows.get("LARK_API_BASE") {
            self.lark_api_base = v.clone();
        }
        if let Some(v) = rows.get("MAX_CONCURRENCY") {
            if let Ok(parsed) = v.parse() {
                self.max_concurrency = parsed;
            }
        }
        if let Some(v) = rows.get("UPLOAD_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                self.upload_max_retries = parsed;
            }
        }
        self
    }

    /// Apply environment-variable overrides with the same uppercased key as
    /// the corresponding `system_config` row, matching `spec.md` §6.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database_url = v;
        }
        if let Ok(v) = std::env::var("LARK_APP_ID") {
            self.lark_app_id = v;
        }
        if let Ok(v) = std::env::var("LARK_APP_SECRET") {
            self.lark_app_secret = v;
        }
        if let Ok(v) = std::env::var("LARK_API_BASE") {
            self.lark_api_base = v;
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENCY") {
            if let Ok(parsed) = v.parse() {
                self.max_concurrency = parsed;
            }
        }
        if let Ok(v) = std::env::var("UPLOAD_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                self.upload_max_retries = parsed;
            }
        }
        self
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            database_url: crate::defaults::DEFAULT_DATABASE_URL.to_string(),
            profile_ids: Vec::new(),
            max_concurrency: crate::defaults::DEFAULT_MAX_CONCURRENCY,
            profile_cooldown: Duration::from_secs(crate::defaults::DEFAULT_PROFILE_COOLDOWN_SECS),
            profile_switch_interval: Duration::from_secs(
                crate::defaults::DEFAULT_PROFILE_SWITCH_INTERVAL_SECS,
            ),
            job_deadline: Duration::from_secs(crate::defaults::DEFAULT_JOB_DEADLINE_SECS),
            lark_app_id: String::new(),
            lark_app_secret: String::new(),
            lark_api_base: crate::defaults::DEFAULT_LARK_API_BASE.to_string(),
            upload_max_retries: crate::defaults::DEFAULT_UPLOAD_MAX_RETRIES,
        }
    }
}
