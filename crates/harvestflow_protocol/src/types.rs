//! Domain types shared by the scheduler, driver, and uploader: jobs,
//! records, checkpoints, and the target-combination rule.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use harvestflow_ids::{Fingerprint, JobId};
use serde::{Deserialize, Serialize};

/// Minimum engagement a candidate record must clear to be staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_likes: u32,
    pub min_replies: u32,
    pub min_reposts: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_likes: 0,
            min_replies: 0,
            min_reposts: 0,
        }
    }
}

/// A single extraction target: an account, a keyword, or (under the
/// cartesian combining rule) an account/keyword pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Target {
    Account(String),
    Keyword(String),
    Pair(String, String),
}

impl Target {
    /// Stable string used as the checkpoint/shortfall map key and as the
    /// navigation-url discriminant handed to the driver.
    pub fn key(&self) -> String {
        match self {
            Target::Account(a) => a.clone(),
            Target::Keyword(k) => k.clone(),
            Target::Pair(a, k) => format!("{a}::{k}"),
        }
    }
}

/// Materializes the combining rule from `spec.md` §3: if both accounts and
/// keywords are non-empty, the cartesian product is scraped per pair;
/// otherwise each account and each keyword is scraped independently.
pub fn materialize_targets(accounts: &[String], keywords: &[String]) -> Vec<Target> {
    if !accounts.is_empty() && !keywords.is_empty() {
        let mut targets = Vec::with_capacity(accounts.len() * keywords.len());
        for account in accounts {
            for keyword in keywords {
                targets.push(Target::Pair(account.clone(), keyword.clone()));
            }
        }
        targets
    } else {
        let mut targets = Vec::with_capacity(accounts.len() + keywords.len());
        targets.extend(accounts.iter().cloned().map(Target::Account));
        targets.extend(keywords.iter().cloned().map(Target::Keyword));
        targets
    }
}

/// Job lifecycle state. Transitions are monotone except the
/// `Running|Queued -> Pending` restart-recovery transition (`spec.md` §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// The `(requested, delivered)` shortfall recorded for one target once a
/// job's extraction loop has moved past it (`spec.md` §4.5 step 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub requested: u32,
    pub delivered: u32,
}

/// User-submitted job specification, validated by the Control Facade before
/// `RecordStore::create_job` is ever called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub accounts: Vec<String>,
    pub keywords: Vec<String>,
    pub thresholds: Thresholds,
    pub max_records: u32,
    pub priority: Option<i32>,
    pub auto_upload: bool,
}

/// A fully materialized job record as stored in the Record Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub spec: JobSpec,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub delivered_count: u32,
    pub last_error: Option<String>,
    /// Aggregate upload error from the most recent uploader run. Upload
    /// errors never alter `state`; they only ever touch this field and
    /// per-record `synced` flags (`spec.md` §7).
    pub last_upload_error: Option<String>,
    pub shortfalls: HashMap<String, Shortfall>,
}

/// A record as it comes out of the extractor, before fingerprinting and
/// threshold filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub author: String,
    pub content: String,
    /// Publication timestamp; absent when the source page didn't yield a
    /// parseable one (`spec.md` §7, "Missing publication-timestamp").
    pub published_at: Option<DateTime<Utc>>,
    pub likes: u32,
    pub replies: u32,
    pub reposts: u32,
    pub canonical_link: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub media: Option<Vec<String>>,
}

impl CandidateRecord {
    /// `spec.md` §3: fingerprint is `author + canonical-link`, falling back
    /// to `author + first-500-chars-of-content` when there is no link.
    pub fn fingerprint(&self) -> Fingerprint {
        match &self.canonical_link {
            Some(link) if !link.is_empty() => Fingerprint::compute(&self.author, link),
            _ => {
                let basis: String = self.content.chars().take(500).collect();
                Fingerprint::compute(&self.author, &basis)
            }
        }
    }

    pub fn passes_thresholds(&self, thresholds: &Thresholds) -> bool {
        self.likes >= thresholds.min_likes
            && self.replies >= thresholds.min_replies
            && self.reposts >= thresholds.min_reposts
    }
}

/// A persisted, deduplicated record belonging to exactly one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub job_id: JobId,
    pub fingerprint: Fingerprint,
    pub target_key: String,
    pub author: String,
    pub content: String,
    pub published_at: Option<DateTime<Utc>>,
    pub likes: u32,
    pub replies: u32,
    pub reposts: u32,
    pub canonical_link: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub media: Option<Vec<String>>,
    /// Heuristic-classifier hint; never authoritative (`spec.md` §3).
    pub category: Option<String>,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-job, per-target resumable extraction state (`spec.md` §3,
/// "ScrapeCheckpoint"). Keyed in the Checkpoint Store by `(job_id,
/// target_key)` since one job resumes independently per target.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeCheckpoint {
    pub seen_fingerprints: HashSet<Fingerprint>,
    pub last_scroll_offset: i64,
    pub stagnant_rounds: u32,
    pub shortfalls_by_target: HashMap<String, Shortfall>,
}

/// Why a per-target scroll-and-extract loop stopped (`spec.md` §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalReason {
    TargetMet,
    EndOfFeed,
    BudgetExhausted,
}
