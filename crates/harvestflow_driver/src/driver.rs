//! The per-job navigate/scroll/extract/dedupe loop (`spec.md` §4.5 — "the
//! hardest part"). `Driver::run_job` drives a live `BrowserSession` to
//! completion across every target, writing records and checkpoints as it
//! goes, and returns a [`DriverOutcome`] rather than using panics/exceptions
//! for control flow (`spec.md` §9).

use std::sync::Arc;
use std::time::Duration;

use harvestflow_db::{CheckpointStore, RecordStore};
use harvestflow_ids::JobId;
use harvestflow_protocol::{
    materialize_targets, ErrorKind, HasErrorKind, Job, Shortfall, Target, TerminalReason,
};
use tracing::{info, warn};

use crate::cancel::CancellationToken;
use crate::error::DriverError;
use crate::session::{BrowserSession, ExtractionContext, RecordExtractor};

const SCROLL_DELTA_NORMAL_PX: i64 = 1500;
const SCROLL_DELTA_STAGNANT_PX: i64 = 3000;
const STAGNANT_ROUNDS_FOR_LARGER_SCROLL: u32 = 3;
const STAGNANT_ROUNDS_LIMIT: u32 = 8;
const SCROLL_OFFSET_EPSILON_PX: i64 = 50;
const SETTLE_MIN: Duration = Duration::from_millis(500);
const SETTLE_MAX: Duration = Duration::from_millis(1000);
const TIMELINE_SELECTOR: &str = "[data-testid=\"primaryColumn\"]";
const ELEMENT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-target scroll-attempt ceiling. Not named explicitly in `spec.md` §4.5
/// (it only says "the configured per-target scroll attempt budget"); chosen
/// generously so `StagnantRounds >= 8` is the terminal condition that fires
/// in practice, with this as a hard backstop against runaway jobs.
const DEFAULT_SCROLL_ATTEMPT_BUDGET: u32 = 500;
/// Transient navigation retries (`spec.md` §4.5, failure semantics).
const TRANSIENT_RETRY_MAX: u32 = 3;
const TRANSIENT_RETRY_STEP: Duration = Duration::from_secs(2);

/// Terminal result of a driver run, replacing exceptions for driver/
/// scheduler control flow (`spec.md` §9).
#[derive(Debug)]
pub enum DriverOutcome {
    Completed { delivered: u32 },
    Failed { reason: String, kind: ErrorKind },
    Cancelled,
}

pub struct Driver {
    record_store: Arc<RecordStore>,
    checkpoint_store: Arc<CheckpointStore>,
    scroll_attempt_budget: u32,
}

impl Driver {
    pub fn new(record_store: Arc<RecordStore>, checkpoint_store: Arc<CheckpointStore>) -> Self {
        Self {
            record_store,
            checkpoint_store,
            scroll_attempt_budget: DEFAULT_SCROLL_ATTEMPT_BUDGET,
        }
    }

    pub fn with_scroll_attempt_budget(mut self, budget: u32) -> Self {
        self.scroll_attempt_budget = budget;
        self
    }

    /// Drives `session` across every target in `job.spec`, emitting records
    /// via the Record Store and persisting resumable state via the
    /// Checkpoint Store. Never returns an `Err` — every terminal state is
    /// represented in [`DriverOutcome`].
    pub async fn run_job(
        &self,
        job: &Job,
        session: &mut dyn BrowserSession,
        extractor: &dyn RecordExtractor,
        cancel: &CancellationToken,
    ) -> DriverOutcome {
        let targets = materialize_targets(&job.spec.accounts, &job.spec.keywords);
        let mut total_delivered = 0u32;

        for target in targets {
            if cancel.is_cancelled() {
                info!(job_id = %job.id, "cancellation observed between targets");
                return DriverOutcome::Cancelled;
            }

            match self
                .run_target_with_retry(job.id, &job.spec, &target, job.spec.max_records, session, extractor, cancel)
                .await
            {
                Ok(TargetRunResult::Cancelled) => {
                    return DriverOutcome::Cancelled;
                }
                Ok(TargetRunResult::Done { delivered, .. }) => {
                    total_delivered += delivered;
                }
                Err(err) if err.kind() == ErrorKind::SessionLost => {
                    warn!(job_id = %job.id, error = %err, "irrecoverable session failure");
                    return DriverOutcome::Failed {
                        reason: err.to_string(),
                        kind: err.kind(),
                    };
                }
                Err(err) if err.kind() == ErrorKind::StorageError => {
                    warn!(job_id = %job.id, error = %err, "storage error, treating run as irrecoverable");
                    return DriverOutcome::Failed {
                        reason: err.to_string(),
                        kind: err.kind(),
                    };
                }
                Err(err) => {
                    // Transient-navigation exhaustion: record the shortfall
                    // and proceed to the next target (`spec.md` §4.5).
                    warn!(job_id = %job.id, target = %target.key(), error = %err, "target exhausted retries, moving on");
                    if let Err(store_err) = self
                        .record_store
                        .record_shortfall(job.id, &target.key(), Shortfall { requested: job.spec.max_records, delivered: 0 })
                        .await
                    {
                        return DriverOutcome::Failed {
                            reason: store_err.to_string(),
                            kind: ErrorKind::StorageError,
                        };
                    }
                }
            }
        }

        if let Err(err) = self.checkpoint_store.delete(job.id).await {
            return DriverOutcome::Failed {
                reason: err.to_string(),
                kind: ErrorKind::StorageError,
            };
        }

        DriverOutcome::Completed { delivered: total_delivered }
    }

    async fn run_target_with_retry(
        &self,
        job_id: JobId,
        spec: &harvestflow_protocol::JobSpec,
        target: &Target,
        max_records: u32,
        session: &mut dyn BrowserSession,
        extractor: &dyn RecordExtractor,
        cancel: &CancellationToken,
    ) -> Result<TargetRunResult, DriverError> {
        let mut attempt = 0u32;
        loop {
            match self.run_target(job_id, spec, target, max_records, session, extractor, cancel).await {
                Ok(result) => return Ok(result),
                Err(err) if err.kind() == ErrorKind::TransientNetwork && attempt + 1 < TRANSIENT_RETRY_MAX => {
                    attempt += 1;
                    warn!(job_id = %job_id, target = %target.key(), attempt, error = %err, "retrying target after transient failure");
                    tokio::time::sleep(TRANSIENT_RETRY_STEP * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One target's navigate -> resume -> scroll-and-extract loop
    /// (`spec.md` §4.5 steps 1-4).
    async fn run_target(
        &self,
        job_id: JobId,
        spec: &harvestflow_protocol::JobSpec,
        target: &Target,
        max_records: u32,
        session: &mut dyn BrowserSession,
        extractor: &dyn RecordExtractor,
        cancel: &CancellationToken,
    ) -> Result<TargetRunResult, DriverError> {
        let target_key = target.key();

        tokio::time::timeout(NAVIGATION_TIMEOUT, session.navigate(&target_url(target))).await??;

        session
            .wait_for_selector(TIMELINE_SELECTOR, ELEMENT_WAIT_TIMEOUT)
            .await?;

        let mut checkpoint = self
            .checkpoint_store
            .load(job_id, &target_key)
            .await?
            .unwrap_or_default();

        // Boundary case (`spec.md` §8): maxRecords = 0 navigates but never
        // scrolls; the shortfall is recorded immediately as (0, 0).
        if max_records == 0 {
            self.record_store
                .record_shortfall(job_id, &target_key, Shortfall { requested: 0, delivered: 0 })
                .await?;
            return Ok(TargetRunResult::Done { delivered: 0, reason: TerminalReason::TargetMet });
        }

        // `delivered` for a resumed target equals the number of
        // fingerprints already accepted into `seenFingerprints` — every
        // entry there passed the threshold filter when it was staged.
        let mut delivered = checkpoint.seen_fingerprints.len() as u32;
        let mut attempts = 0u32;

        let reason = loop {
            if cancel.is_cancelled() {
                self.checkpoint_store.save(job_id, &target_key, &checkpoint).await?;
                return Ok(TargetRunResult::Cancelled);
            }

            let y0 = session.scroll_offset().await?;

            let ctx = ExtractionContext { target: target.clone() };
            let candidates = extractor.extract(session, &ctx).await?;

            let mut staged = Vec::new();
            for candidate in candidates {
                let fingerprint = candidate.fingerprint();
                if checkpoint.seen_fingerprints.contains(&fingerprint) {
                    continue;
                }
                if !candidate.passes_thresholds(&spec.thresholds) {
                    continue;
                }
                checkpoint.seen_fingerprints.insert(fingerprint);
                staged.push(candidate);
            }

            let round_made_progress = !staged.is_empty();
            if round_made_progress {
                let (inserted, _duplicates) =
                    self.record_store.append_records(job_id, &target_key, &staged).await?;
                delivered += inserted as u32;
                self.checkpoint_store.save(job_id, &target_key, &checkpoint).await?;
            }

            if delivered >= max_records {
                break TerminalReason::TargetMet;
            }

            let scroll_delta = if checkpoint.stagnant_rounds >= STAGNANT_ROUNDS_FOR_LARGER_SCROLL {
                SCROLL_DELTA_STAGNANT_PX
            } else {
                SCROLL_DELTA_NORMAL_PX
            };
            session.scroll_by(scroll_delta).await?;

            let settle = if checkpoint.stagnant_rounds > 0 { SETTLE_MAX } else { SETTLE_MIN };
            tokio::time::sleep(settle).await;

            let y1 = session.scroll_offset().await?;
            let scroll_unchanged = (y1 - y0).abs() < SCROLL_OFFSET_EPSILON_PX;
            checkpoint.last_scroll_offset = y1;

            // A round counts as stagnant if it produced no new fingerprints
            // OR the scroll offset barely moved (`spec.md` §4.5 steps g-h).
            if round_made_progress && !scroll_unchanged {
                checkpoint.stagnant_rounds = 0;
            } else {
                checkpoint.stagnant_rounds += 1;
            }

            if checkpoint.stagnant_rounds >= STAGNANT_ROUNDS_LIMIT {
                break TerminalReason::EndOfFeed;
            }

            attempts += 1;
            if attempts >= self.scroll_attempt_budget {
                break TerminalReason::BudgetExhausted;
            }
        };

        if delivered < max_records {
            self.record_store
                .record_shortfall(job_id, &target_key, Shortfall { requested: max_records, delivered })
                .await?;
        }

        Ok(TargetRunResult::Done { delivered, reason })
    }
}

enum TargetRunResult {
    Done { delivered: u32, reason: TerminalReason },
    Cancelled,
}

/// Builds the navigation URL for a target. The exact DOM/URL scheme is a
/// non-goal (`spec.md` §1); this is a reasonable concretion so the driver
/// has something to call `navigate` with.
fn target_url(target: &Target) -> String {
    match target {
        Target::Account(handle) => format!("https://x.com/{handle}"),
        Target::Keyword(keyword) => {
            format!("https://x.com/search?q={}&src=typed_query&f=live", percent_encode(keyword))
        }
        Target::Pair(handle, keyword) => format!(
            "https://x.com/search?q=from%3A{}%20{}&src=typed_query&f=live",
            handle,
            percent_encode(keyword)
        ),
    }
}

fn percent_encode(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            '#' => "%23".to_string(),
            '&' => "%26".to_string(),
            other => other.to_string(),
        })
        .collect()
}

impl From<tokio::time::error::Elapsed> for DriverError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        DriverError::Navigation("navigation timed out".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use harvestflow_protocol::{CandidateRecord, JobSpec, ScrapeCheckpoint, Thresholds};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    /// A browser session that never actually renders anything; `scroll_by`
    /// just moves a counter so stagnancy detection has something to compare.
    struct FakeBrowserSession {
        offset: i64,
    }

    impl FakeBrowserSession {
        fn new() -> Self {
            Self { offset: 0 }
        }
    }

    impl BrowserSession for FakeBrowserSession {
        fn navigate<'a>(&'a mut self, _url: &'a str) -> BoxFuture<'a, Result<(), DriverError>> {
            Box::pin(async { Ok(()) })
        }

        fn wait_for_selector<'a>(
            &'a mut self,
            _selector: &'a str,
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<(), DriverError>> {
            Box::pin(async { Ok(()) })
        }

        fn scroll_by(&mut self, delta_px: i64) -> BoxFuture<'_, Result<(), DriverError>> {
            self.offset += delta_px;
            Box::pin(async { Ok(()) })
        }

        fn scroll_offset(&mut self) -> BoxFuture<'_, Result<i64, DriverError>> {
            let offset = self.offset;
            Box::pin(async move { Ok(offset) })
        }

        fn evaluate_json<'a>(
            &'a mut self,
            _script: &'a str,
        ) -> BoxFuture<'a, Result<serde_json::Value, DriverError>> {
            Box::pin(async { Ok(serde_json::Value::Null) })
        }
    }

    /// Replays one pre-scripted batch of candidates per call to `extract`;
    /// once the script runs out it yields empty rounds forever, the way a
    /// feed that has stopped producing anything new would.
    struct ScriptedExtractor {
        rounds: StdMutex<std::vec::IntoIter<Vec<CandidateRecord>>>,
        calls: AtomicUsize,
    }

    impl ScriptedExtractor {
        fn new(rounds: Vec<Vec<CandidateRecord>>) -> Self {
            Self { rounds: StdMutex::new(rounds.into_iter()), calls: AtomicUsize::new(0) }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl RecordExtractor for ScriptedExtractor {
        fn extract<'a>(
            &'a self,
            _session: &'a mut dyn BrowserSession,
            _ctx: &'a ExtractionContext,
        ) -> BoxFuture<'a, Result<Vec<CandidateRecord>, DriverError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let batch = self.rounds.lock().unwrap().next().unwrap_or_default();
            Box::pin(async move { Ok(batch) })
        }
    }

    fn candidate(author: &str, content: &str, likes: u32) -> CandidateRecord {
        CandidateRecord {
            author: author.into(),
            content: content.into(),
            published_at: None,
            likes,
            replies: 0,
            reposts: 0,
            canonical_link: None,
            hashtags: None,
            media: None,
        }
    }

    fn job_spec(account: &str, thresholds: Thresholds, max_records: u32) -> JobSpec {
        JobSpec {
            name: "scenario".into(),
            accounts: vec![account.into()],
            keywords: vec![],
            thresholds,
            max_records,
            priority: None,
            auto_upload: false,
        }
    }

    async fn test_store() -> (Arc<RecordStore>, Arc<CheckpointStore>) {
        let store = Arc::new(RecordStore::connect("sqlite::memory:").await.unwrap());
        let checkpoints = Arc::new(CheckpointStore::from_record_store(&store));
        (store, checkpoints)
    }

    /// S1 (`spec.md` §8): of `[X(likes=12), Y(likes=9), X(likes=12) dup]`,
    /// the threshold filter drops `Y` and the intra-round dedup drops the
    /// repeated `X`, leaving exactly one delivered record.
    #[tokio::test]
    async fn threshold_filter_and_intra_round_dedup() {
        let (store, checkpoints) = test_store().await;
        let spec = job_spec("alice", Thresholds { min_likes: 10, min_replies: 0, min_reposts: 0 }, 10);
        let job_id = store.create_job(&spec).await.unwrap();
        let job = store.get_job(job_id).await.unwrap();

        let extractor = ScriptedExtractor::new(vec![vec![
            candidate("alice", "X", 12),
            candidate("alice", "Y", 9),
            candidate("alice", "X", 12),
        ]]);
        let mut session = FakeBrowserSession::new();
        let driver = Driver::new(store.clone(), checkpoints.clone()).with_scroll_attempt_budget(50);
        let cancel = CancellationToken::new();

        let outcome = driver.run_job(&job, &mut session, &extractor, &cancel).await;
        match outcome {
            DriverOutcome::Completed { delivered } => assert_eq!(delivered, 1),
            other => panic!("expected Completed, got {other:?}"),
        }

        let records = store.list_records(Some(job_id), 100, 0).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "X");

        let job = store.get_job(job_id).await.unwrap();
        let shortfall = job.shortfalls.get("alice").unwrap();
        assert_eq!(shortfall.delivered, 1);
        assert_eq!(shortfall.requested, 10);
    }

    /// Eight consecutive rounds with no new fingerprints hit
    /// `StagnantRounds >= 8` and stop the target before the (much larger)
    /// scroll-attempt budget does, terminating with a shortfall.
    #[tokio::test]
    async fn stagnancy_ends_the_target_before_the_scroll_budget() {
        let (store, checkpoints) = test_store().await;
        let spec = job_spec("alice", Thresholds::default(), 100);
        let job_id = store.create_job(&spec).await.unwrap();
        let job = store.get_job(job_id).await.unwrap();

        let extractor = ScriptedExtractor::new(vec![]);
        let mut session = FakeBrowserSession::new();
        let driver = Driver::new(store.clone(), checkpoints.clone()).with_scroll_attempt_budget(500);
        let cancel = CancellationToken::new();

        let outcome = driver.run_job(&job, &mut session, &extractor, &cancel).await;
        match outcome {
            DriverOutcome::Completed { delivered } => assert_eq!(delivered, 0),
            other => panic!("expected Completed, got {other:?}"),
        }
        assert_eq!(extractor.call_count(), 8);

        let job = store.get_job(job_id).await.unwrap();
        let shortfall = job.shortfalls.get("alice").unwrap();
        assert_eq!(shortfall.delivered, 0);
        assert_eq!(shortfall.requested, 100);
    }

    /// S3 (`spec.md` §8): a checkpoint pre-seeded from a prior run (as if the
    /// process had crashed and restarted) makes the resumed run skip the
    /// record it already saw and deliver only the new one, with no
    /// duplicate ever reaching the Record Store.
    #[tokio::test]
    async fn resumes_from_a_checkpoint_without_emitting_duplicates() {
        let (store, checkpoints) = test_store().await;
        let spec = job_spec("alice", Thresholds::default(), 2);
        let job_id = store.create_job(&spec).await.unwrap();

        let x = candidate("alice", "X", 5);
        let z = candidate("alice", "Z", 5);
        let x_fingerprint = x.fingerprint();

        // the prior run already persisted X and checkpointed having seen it.
        store.append_records(job_id, "alice", std::slice::from_ref(&x)).await.unwrap();
        let checkpoint = ScrapeCheckpoint {
            seen_fingerprints: std::iter::once(x_fingerprint).collect(),
            ..Default::default()
        };
        checkpoints.save(job_id, "alice", &checkpoint).await.unwrap();

        let job = store.get_job(job_id).await.unwrap();
        let extractor = ScriptedExtractor::new(vec![vec![x, z]]);
        let mut session = FakeBrowserSession::new();
        let driver = Driver::new(store.clone(), checkpoints.clone()).with_scroll_attempt_budget(50);
        let cancel = CancellationToken::new();

        let outcome = driver.run_job(&job, &mut session, &extractor, &cancel).await;
        match outcome {
            DriverOutcome::Completed { delivered } => assert_eq!(delivered, 2),
            other => panic!("expected Completed, got {other:?}"),
        }

        let mut contents: Vec<String> = store
            .list_records(Some(job_id), 100, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.content)
            .collect();
        contents.sort();
        assert_eq!(contents, vec!["X".to_string(), "Z".to_string()]);

        // a fully completed job clears its checkpoint entirely.
        assert!(checkpoints.load(job_id, "alice").await.unwrap().is_none());
    }
}
