//! Record Store (C3) and Checkpoint Store (C4) for HarvestFlow: the
//! durable, sqlite-backed local store of jobs, records, and per-job
//! resumable extraction state.
//!
//! Schema bootstrap is a single idempotent `CREATE TABLE IF NOT EXISTS`
//! pass run at pool construction — no migration framework, matching the
//! teacher's own lightweight schema bootstrap.

pub mod error;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use harvestflow_ids::{Fingerprint, JobId};
use harvestflow_protocol::{CandidateRecord, Job, JobSpec, JobState, Record, ScrapeCheckpoint, Shortfall};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

pub use error::{DbError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    spec_blob TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    ended_at TEXT,
    delivered_count INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    last_upload_error TEXT,
    shortfalls_blob TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(id),
    fingerprint TEXT NOT NULL,
    target_key TEXT NOT NULL,
    author TEXT NOT NULL,
    content TEXT NOT NULL,
    published_at TEXT,
    likes INTEGER NOT NULL,
    replies INTEGER NOT NULL,
    reposts INTEGER NOT NULL,
    canonical_link TEXT,
    hashtags_blob TEXT,
    media_blob TEXT,
    category TEXT,
    synced INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_records_job_fingerprint
    ON records(job_id, fingerprint);

CREATE INDEX IF NOT EXISTS idx_records_job_synced ON records(job_id, synced);

CREATE TABLE IF NOT EXISTS checkpoints (
    job_id INTEGER NOT NULL,
    target_key TEXT NOT NULL,
    blob TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, target_key)
);

CREATE TABLE IF NOT EXISTS system_config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    description TEXT,
    updated_at TEXT NOT NULL
);
"#;

/// Durable local store of jobs, records, and per-job/per-target checkpoints.
/// Backed by a single `sqlx::SqlitePool`; cross-job write serialization is
/// delegated to sqlite's own transaction isolation (`spec.md` §5).
#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    /// Connects to `database_url` and runs the idempotent schema bootstrap.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.bootstrap_schema().await?;
        Ok(store)
    }

    /// Wraps an already-open pool (used by tests with an in-memory sqlite
    /// database shared across connections).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn bootstrap_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(";\n\n") {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                continue;
            }
            sqlx::query(trimmed).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `CreateJob(spec) -> jobId` (`spec.md` §4.3).
    pub async fn create_job(&self, spec: &JobSpec) -> Result<JobId> {
        let spec_blob = serde_json::to_string(spec)?;
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (name, spec_blob, state, created_at, delivered_count, shortfalls_blob)
            VALUES (?, ?, ?, ?, 0, '{}')
            "#,
        )
        // last_upload_error and the rest default to NULL/0 at insert time.
        .bind(&spec.name)
        .bind(&spec_blob)
        .bind(JobState::Pending.as_str())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let job_id = JobId::from(row.last_insert_rowid());
        info!(job_id = %job_id, name = %spec.name, "job created");
        Ok(job_id)
    }

    /// `UpdateJobState(jobId, newState, metadata)` (`spec.md` §4.3). The
    /// `last_error` and timestamp columns are updated opportunistically
    /// based on the target state.
    pub async fn update_job_state(
        &self,
        job_id: JobId,
        new_state: JobState,
        last_error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        match new_state {
            JobState::Running => {
                sqlx::query(
                    "UPDATE jobs SET state = ?, started_at = COALESCE(started_at, ?), last_error = ? WHERE id = ?",
                )
                .bind(new_state.as_str())
                .bind(&now)
                .bind(last_error)
                .bind(job_id.get())
                .execute(&self.pool)
                .await?;
            }
            JobState::Completed | JobState::Failed | JobState::Cancelled => {
                sqlx::query(
                    "UPDATE jobs SET state = ?, ended_at = ?, last_error = ? WHERE id = ?",
                )
                .bind(new_state.as_str())
                .bind(&now)
                .bind(last_error)
                .bind(job_id.get())
                .execute(&self.pool)
                .await?;
            }
            JobState::Pending | JobState::Queued => {
                sqlx::query("UPDATE jobs SET state = ?, last_error = ? WHERE id = ?")
                    .bind(new_state.as_str())
                    .bind(last_error)
                    .bind(job_id.get())
                    .execute(&self.pool)
                    .await?;
            }
        }
        debug!(job_id = %job_id, state = new_state.as_str(), "job state updated");
        Ok(())
    }

    /// Restart recovery item 1 (`spec.md` §4.7): every `Running`/`Queued`
    /// job is moved to `Pending` in one statement.
    pub async fn reset_interrupted_jobs(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ? WHERE state IN (?, ?)",
        )
        .bind(JobState::Pending.as_str())
        .bind(JobState::Running.as_str())
        .bind(JobState::Queued.as_str())
        .execute(&self.pool)
        .await?;
        let count = result.rows_affected();
        if count > 0 {
            info!(count, "reset interrupted jobs to pending on restart");
        }
        Ok(count)
    }

    /// Persists the uploader's aggregate "last upload error" metadata field
    /// (`spec.md` §4.6/§7). Never touches `state` — upload errors are
    /// orthogonal to job lifecycle.
    pub async fn set_last_upload_error(&self, job_id: JobId, message: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE jobs SET last_upload_error = ? WHERE id = ?")
            .bind(message)
            .bind(job_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Records the job's shortfall map, merging into whatever has already
    /// been persisted for other targets in the same job.
    pub async fn record_shortfall(&self, job_id: JobId, target_key: &str, shortfall: Shortfall) -> Result<()> {
        let mut job = self.get_job(job_id).await?;
        job.shortfalls.insert(target_key.to_string(), shortfall);
        let blob = serde_json::to_string(&job.shortfalls)?;
        sqlx::query("UPDATE jobs SET shortfalls_blob = ? WHERE id = ?")
            .bind(&blob)
            .bind(job_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// `AppendRecords(jobId, records[]) -> (inserted, duplicateSkipped)`
    /// (`spec.md` §4.3). Atomic at the batch level: one transaction,
    /// `INSERT OR IGNORE` against the unique `(job_id, fingerprint)` index
    /// lets the index itself absorb retried/duplicate inserts.
    pub async fn append_records(
        &self,
        job_id: JobId,
        target_key: &str,
        candidates: &[CandidateRecord],
    ) -> Result<(u64, u64)> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        let now = Utc::now().to_rfc3339();

        for candidate in candidates {
            let fingerprint = candidate.fingerprint().to_hex();
            let hashtags_blob = candidate
                .hashtags
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let media_blob = candidate
                .media
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            let published_at = candidate.published_at.map(|ts| ts.to_rfc3339());

            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO records
                    (job_id, fingerprint, target_key, author, content, published_at,
                     likes, replies, reposts, canonical_link, hashtags_blob, media_blob,
                     category, synced, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, 0, ?)
                "#,
            )
            .bind(job_id.get())
            .bind(&fingerprint)
            .bind(target_key)
            .bind(&candidate.author)
            .bind(&candidate.content)
            .bind(&published_at)
            .bind(candidate.likes)
            .bind(candidate.replies)
            .bind(candidate.reposts)
            .bind(&candidate.canonical_link)
            .bind(&hashtags_blob)
            .bind(&media_blob)
            .bind(&now)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        let duplicate_skipped = candidates.len() as u64 - inserted;
        if inserted > 0 {
            sqlx::query("UPDATE jobs SET delivered_count = delivered_count + ? WHERE id = ?")
                .bind(inserted as i64)
                .bind(job_id.get())
                .execute(&self.pool)
                .await?;
        }
        Ok((inserted, duplicate_skipped))
    }

    /// `ListUnsynced(jobId|all, limit) -> records[]` (`spec.md` §4.3), in
    /// insertion order so an upload consumer can replay a timeline.
    pub async fn list_unsynced(&self, job_id: Option<JobId>, limit: i64) -> Result<Vec<Record>> {
        let rows = match job_id {
            Some(job_id) => {
                sqlx::query("SELECT * FROM records WHERE job_id = ? AND synced = 0 ORDER BY id ASC LIMIT ?")
                    .bind(job_id.get())
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM records WHERE synced = 0 ORDER BY id ASC LIMIT ?")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(record_from_row).collect()
    }

    /// `MarkSynced(recordIds[])` (`spec.md` §4.3). One-way `false -> true`
    /// transition; only reset via [`Self::reset_sync_flag`].
    pub async fn mark_synced(&self, record_ids: &[i64]) -> Result<()> {
        if record_ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for id in record_ids {
            sqlx::query("UPDATE records SET synced = 1 WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// `ListRecords(filter, paging) -> records[]` (`spec.md` §4.3).
    pub async fn list_records(&self, job_id: Option<JobId>, limit: i64, offset: i64) -> Result<Vec<Record>> {
        let rows = match job_id {
            Some(job_id) => {
                sqlx::query("SELECT * FROM records WHERE job_id = ? ORDER BY id ASC LIMIT ? OFFSET ?")
                    .bind(job_id.get())
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM records ORDER BY id ASC LIMIT ? OFFSET ?")
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(record_from_row).collect()
    }

    /// `ResetSyncFlag(jobId)` (`spec.md` §4.3), administrative.
    pub async fn reset_sync_flag(&self, job_id: JobId) -> Result<u64> {
        let result = sqlx::query("UPDATE records SET synced = 0 WHERE job_id = ?")
            .bind(job_id.get())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// User override of the classifier's category hint (`spec.md` §6,
    /// `set-record-category`).
    pub async fn set_record_category(&self, record_id: i64, category: &str) -> Result<()> {
        sqlx::query("UPDATE records SET category = ? WHERE id = ?")
            .bind(category)
            .bind(record_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<Job> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id.get())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("job {job_id}")))?;
        job_from_row(row)
    }

    pub async fn list_jobs(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let rows = match state {
            Some(state) => {
                sqlx::query("SELECT * FROM jobs WHERE state = ? ORDER BY id ASC")
                    .bind(state.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM jobs ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(job_from_row).collect()
    }

    /// Reads every persisted `system_config` row (`spec.md` §6). Keys are
    /// the same uppercased names [`harvestflow_protocol::SystemConfig`]'s
    /// environment overrides use, so a caller can fold this map into a
    /// config value the same way it folds in `std::env`.
    pub async fn load_system_config(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM system_config")
            .fetch_all(&self.pool)
            .await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Upserts one `system_config` row, e.g. from an administrative config
    /// change. `description` is only recorded on first insert.
    pub async fn set_system_config(&self, key: &str, value: &str, description: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO system_config (key, value, description, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(description)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn job_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Job> {
    let spec_blob: String = row.try_get("spec_blob")?;
    let spec: JobSpec = serde_json::from_str(&spec_blob)?;
    let state_str: String = row.try_get("state")?;
    let state: JobState = state_str.parse().map_err(DbError::invalid_state)?;
    let shortfalls_blob: String = row.try_get("shortfalls_blob")?;
    let shortfalls: HashMap<String, Shortfall> = serde_json::from_str(&shortfalls_blob)?;

    Ok(Job {
        id: JobId::from(row.try_get::<i64, _>("id")?),
        spec,
        state,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
        started_at: row
            .try_get::<Option<String>, _>("started_at")?
            .map(parse_timestamp)
            .transpose()?,
        ended_at: row
            .try_get::<Option<String>, _>("ended_at")?
            .map(parse_timestamp)
            .transpose()?,
        delivered_count: row.try_get::<i64, _>("delivered_count")? as u32,
        last_error: row.try_get("last_error")?,
        last_upload_error: row.try_get("last_upload_error")?,
        shortfalls,
    })
}

fn record_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Record> {
    let fingerprint_hex: String = row.try_get("fingerprint")?;
    let fingerprint = Fingerprint::from_hex(&fingerprint_hex)
        .ok_or_else(|| DbError::invalid_state(format!("corrupt fingerprint: {fingerprint_hex}")))?;
    let hashtags_blob: Option<String> = row.try_get("hashtags_blob")?;
    let media_blob: Option<String> = row.try_get("media_blob")?;

    Ok(Record {
        id: row.try_get("id")?,
        job_id: JobId::from(row.try_get::<i64, _>("job_id")?),
        fingerprint,
        target_key: row.try_get("target_key")?,
        author: row.try_get("author")?,
        content: row.try_get("content")?,
        published_at: row
            .try_get::<Option<String>, _>("published_at")?
            .map(parse_timestamp)
            .transpose()?,
        likes: row.try_get::<i64, _>("likes")? as u32,
        replies: row.try_get::<i64, _>("replies")? as u32,
        reposts: row.try_get::<i64, _>("reposts")? as u32,
        canonical_link: row.try_get("canonical_link")?,
        hashtags: hashtags_blob.map(|b| serde_json::from_str(&b)).transpose()?,
        media: media_blob.map(|b| serde_json::from_str(&b)).transpose()?,
        category: row.try_get("category")?,
        synced: row.try_get::<i64, _>("synced")? != 0,
        created_at: parse_timestamp(row.try_get("created_at")?)?,
    })
}

fn parse_timestamp(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::invalid_state(format!("bad timestamp {raw}: {e}")))
}

/// Durable per-job, per-target resume state (`spec.md` §4.4). `target_key`
/// lets one job's checkpoint be addressed per target, since a job resumes
/// independently per target (`spec.md` §4.5 step 2).
#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn from_record_store(store: &RecordStore) -> Self {
        Self::new(store.pool.clone())
    }

    /// `Save(jobId, checkpoint)`. Sqlite's single-file WAL mode gives the
    /// atomic-replace semantics `spec.md` §4.4 asks for via a plain UPSERT,
    /// no temp-file-and-rename dance needed.
    pub async fn save(&self, job_id: JobId, target_key: &str, checkpoint: &ScrapeCheckpoint) -> Result<()> {
        let blob = serde_json::to_string(checkpoint)?;
        sqlx::query(
            r#"
            INSERT INTO checkpoints (job_id, target_key, blob, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(job_id, target_key) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at
            "#,
        )
        .bind(job_id.get())
        .bind(target_key)
        .bind(&blob)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `Load(jobId) -> checkpoint|none`. A surviving checkpoint at process
    /// start signals the job was interrupted and is resumable.
    pub async fn load(&self, job_id: JobId, target_key: &str) -> Result<Option<ScrapeCheckpoint>> {
        let row = sqlx::query("SELECT blob FROM checkpoints WHERE job_id = ? AND target_key = ?")
            .bind(job_id.get())
            .bind(target_key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let blob: String = row.try_get("blob")?;
                Ok(Some(serde_json::from_str(&blob)?))
            }
            None => Ok(None),
        }
    }

    /// `Delete(jobId)`. Deleted only on successful completion or explicit
    /// administrative reset.
    pub async fn delete(&self, job_id: JobId) -> Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE job_id = ?")
            .bind(job_id.get())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harvestflow_protocol::Thresholds;

    async fn test_store() -> RecordStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = RecordStore::from_pool(pool);
        store.bootstrap_schema().await.unwrap();
        store
    }

    fn sample_spec() -> JobSpec {
        JobSpec {
            name: "J1".into(),
            accounts: vec!["alice".into()],
            keywords: vec![],
            thresholds: Thresholds { min_likes: 10, min_replies: 0, min_reposts: 0 },
            max_records: 5,
            priority: None,
            auto_upload: false,
        }
    }

    fn candidate(author: &str, link: &str, likes: u32) -> CandidateRecord {
        CandidateRecord {
            author: author.into(),
            content: "hello".into(),
            published_at: None,
            likes,
            replies: 0,
            reposts: 0,
            canonical_link: Some(link.into()),
            hashtags: None,
            media: None,
        }
    }

    #[tokio::test]
    async fn create_job_then_fetch_round_trips() {
        let store = test_store().await;
        let job_id = store.create_job(&sample_spec()).await.unwrap();
        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.spec.name, "J1");
        assert_eq!(job.state, JobState::Pending);
    }

    #[tokio::test]
    async fn append_records_dedupes_by_fingerprint() {
        let store = test_store().await;
        let job_id = store.create_job(&sample_spec()).await.unwrap();
        let batch = vec![
            candidate("alice", "https://x.example/1", 12),
            candidate("alice", "https://x.example/1", 12),
        ];
        let (inserted, dup) = store.append_records(job_id, "alice", &batch).await.unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(dup, 1);

        // Retrying the exact same batch again inserts zero new rows
        // (append_records(J, xs) ∘ append_records(J, xs) = append_records(J, xs)).
        let (inserted_again, dup_again) = store.append_records(job_id, "alice", &batch).await.unwrap();
        assert_eq!(inserted_again, 0);
        assert_eq!(dup_again, 2);
    }

    #[tokio::test]
    async fn mark_synced_is_one_way_and_idempotent() {
        let store = test_store().await;
        let job_id = store.create_job(&sample_spec()).await.unwrap();
        store
            .append_records(job_id, "alice", &[candidate("alice", "https://x.example/1", 12)])
            .await
            .unwrap();

        let unsynced = store.list_unsynced(Some(job_id), 10).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        let id = unsynced[0].id;

        store.mark_synced(&[id]).await.unwrap();
        assert!(store.list_unsynced(Some(job_id), 10).await.unwrap().is_empty());

        // Marking synced twice has no further effect.
        store.mark_synced(&[id]).await.unwrap();
        assert!(store.list_unsynced(Some(job_id), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_sync_flag_makes_records_reappear() {
        let store = test_store().await;
        let job_id = store.create_job(&sample_spec()).await.unwrap();
        store
            .append_records(job_id, "alice", &[candidate("alice", "https://x.example/1", 12)])
            .await
            .unwrap();
        let id = store.list_unsynced(Some(job_id), 10).await.unwrap()[0].id;
        store.mark_synced(&[id]).await.unwrap();

        store.reset_sync_flag(job_id).await.unwrap();
        assert_eq!(store.list_unsynced(Some(job_id), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reset_interrupted_jobs_moves_running_and_queued_to_pending() {
        let store = test_store().await;
        let job_id = store.create_job(&sample_spec()).await.unwrap();
        store.update_job_state(job_id, JobState::Running, None).await.unwrap();

        store.reset_interrupted_jobs().await.unwrap();
        let job = store.get_job(job_id).await.unwrap();
        assert_eq!(job.state, JobState::Pending);
    }

    #[tokio::test]
    async fn checkpoint_save_load_delete_round_trips() {
        let store = test_store().await;
        let job_id = store.create_job(&sample_spec()).await.unwrap();
        let checkpoints = CheckpointStore::from_record_store(&store);

        assert!(checkpoints.load(job_id, "alice").await.unwrap().is_none());

        let mut checkpoint = ScrapeCheckpoint::default();
        checkpoint.last_scroll_offset = 1500;
        checkpoint.stagnant_rounds = 2;
        checkpoints.save(job_id, "alice", &checkpoint).await.unwrap();

        let loaded = checkpoints.load(job_id, "alice").await.unwrap().unwrap();
        assert_eq!(loaded.last_scroll_offset, 1500);
        assert_eq!(loaded.stagnant_rounds, 2);

        checkpoints.delete(job_id).await.unwrap();
        assert!(checkpoints.load(job_id, "alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn system_config_upserts_and_reads_back() {
        let store = test_store().await;
        assert!(store.load_system_config().await.unwrap().is_empty());

        store.set_system_config("MAX_CONCURRENCY", "4", Some("override")).await.unwrap();
        store.set_system_config("LARK_APP_ID", "app-1", None).await.unwrap();

        let rows = store.load_system_config().await.unwrap();
        assert_eq!(rows.get("MAX_CONCURRENCY").map(String::as_str), Some("4"));
        assert_eq!(rows.get("LARK_APP_ID").map(String::as_str), Some("app-1"));

        // re-setting a key overwrites the value, not adds a second row.
        store.set_system_config("MAX_CONCURRENCY", "8", None).await.unwrap();
        let rows = store.load_system_config().await.unwrap();
        assert_eq!(rows.get("MAX_CONCURRENCY").map(String::as_str), Some("8"));
        assert_eq!(rows.len(), 2);
    }
}
