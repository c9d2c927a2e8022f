//! End-to-end coverage of admission -> dispatch -> completion and the
//! restart-recovery transition, driven through the public `Scheduler` and
//! `control::handle` surfaces rather than internals.

use std::sync::Arc;
use std::time::Duration;

use harvestflow_db::{CheckpointStore, RecordStore};
use harvestflow_driver::{BrowserSession, DriverError, ExtractionContext, RecordExtractor};
use harvestflow_ids::ProfileId;
use harvestflow_profiles::ProfilePool;
use harvestflow_protocol::{CandidateRecord, JobState, Thresholds};
use harvestflow_scheduler::{control, ControlRequest, ControlResponse, Scheduler, SchedulerError, SessionFactory, SubmitJobRequest};
use futures::future::BoxFuture;

struct ScriptedSession;
impl BrowserSession for ScriptedSession {
    fn navigate<'a>(&'a mut self, _url: &'a str) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async { Ok(()) })
    }
    fn wait_for_selector<'a>(&'a mut self, _selector: &'a str, _timeout: Duration) -> BoxFuture<'a, Result<(), DriverError>> {
        Box::pin(async { Ok(()) })
    }
    fn scroll_by(&mut self, _delta_px: i64) -> BoxFuture<'_, Result<(), DriverError>> {
        Box::pin(async { Ok(()) })
    }
    fn scroll_offset(&mut self) -> BoxFuture<'_, Result<i64, DriverError>> {
        Box::pin(async { Ok(0) })
    }
    fn evaluate_json<'a>(&'a mut self, _script: &'a str) -> BoxFuture<'a, Result<serde_json::Value, DriverError>> {
        Box::pin(async { Ok(serde_json::Value::Null) })
    }
}

/// Yields one fresh record on the first call, then nothing — enough to
/// exercise a `Completed` run without an infinite scroll loop.
struct OneShotExtractor {
    served: std::sync::atomic::AtomicBool,
}

impl RecordExtractor for OneShotExtractor {
    fn extract<'a>(
        &'a self,
        _session: &'a mut dyn BrowserSession,
        _ctx: &'a ExtractionContext,
    ) -> BoxFuture<'a, Result<Vec<CandidateRecord>, DriverError>> {
        Box::pin(async move {
            if self.served.swap(true, std::sync::atomic::Ordering::SeqCst) {
                Ok(vec![])
            } else {
                Ok(vec![CandidateRecord {
                    author: "alice".into(),
                    content: "hello world".into(),
                    published_at: None,
                    likes: 10,
                    replies: 0,
                    reposts: 0,
                    canonical_link: Some("https://x.example/1".into()),
                    hashtags: None,
                    media: None,
                }])
            }
        })
    }
}

struct Factory;

#[async_trait::async_trait]
impl SessionFactory for Factory {
    async fn open(
        &self,
        _profile_id: &ProfileId,
    ) -> Result<(Box<dyn BrowserSession>, Box<dyn RecordExtractor>), SchedulerError> {
        Ok((
            Box::new(ScriptedSession),
            Box::new(OneShotExtractor { served: std::sync::atomic::AtomicBool::new(false) }),
        ))
    }
}

async fn build_scheduler() -> (Arc<Scheduler>, Arc<RecordStore>) {
    let store = Arc::new(RecordStore::connect("sqlite::memory:").await.unwrap());
    let checkpoints = Arc::new(CheckpointStore::from_record_store(&store));
    let pool = Arc::new(ProfilePool::new(vec!["p1".into()], Duration::from_millis(0), Duration::from_secs(30)));
    let scheduler = Arc::new(
        Scheduler::new(store.clone(), checkpoints, pool, Arc::new(Factory), 1, Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(10)),
    );
    (scheduler, store)
}

#[tokio::test]
async fn submit_job_through_control_facade_runs_to_completion() {
    let (scheduler, store) = build_scheduler().await;

    let response = control::handle(
        &scheduler,
        None,
        ControlRequest::SubmitJob(SubmitJobRequest {
            name: "J1".into(),
            accounts: vec!["alice".into()],
            keywords: vec![],
            thresholds: Thresholds { min_likes: 5, min_replies: 0, min_reposts: 0 },
            max_records: 1,
            auto_upload: false,
        }),
    )
    .await;

    let job_id = match response {
        ControlResponse::JobSubmitted { job_id } => job_id,
        other => panic!("unexpected response: {other:?}"),
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let run_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    let mut final_state = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let job = store.get_job(job_id).await.unwrap();
        if job.state == JobState::Completed || job.state == JobState::Failed {
            final_state = Some(job.state);
            break;
        }
    }

    let _ = shutdown_tx.send(());
    let _ = run_handle.await;

    assert_eq!(final_state, Some(JobState::Completed));
    let records = store.list_records(Some(job_id), 10, 0).await.unwrap();
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn reject_submission_with_no_targets() {
    let (scheduler, _store) = build_scheduler().await;
    let response = control::handle(
        &scheduler,
        None,
        ControlRequest::SubmitJob(SubmitJobRequest {
            name: "J2".into(),
            accounts: vec![],
            keywords: vec![],
            thresholds: Thresholds::default(),
            max_records: 5,
            auto_upload: false,
        }),
    )
    .await;
    assert!(matches!(response, ControlResponse::Error { .. }));
}

struct StubTransport {
    batch_calls: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl harvestflow_uploader::transport::BitableTransport for StubTransport {
    async fn fetch_token(
        &self,
        _app_id: &str,
        _app_secret: &str,
    ) -> Result<harvestflow_uploader::transport::TokenResponse, harvestflow_uploader::error::UploadError> {
        Ok(harvestflow_uploader::transport::TokenResponse { token: "tok".into(), expires_in_secs: 3600 })
    }

    async fn fetch_fields(
        &self,
        _token: &str,
        _doc_token: &str,
        _table_id: &str,
    ) -> Result<Vec<harvestflow_uploader::transport::RemoteField>, harvestflow_uploader::error::UploadError> {
        Ok(vec![harvestflow_uploader::transport::RemoteField {
            field_id: "fld_author".into(),
            field_name: "author".into(),
            field_type: harvestflow_uploader::transport::FieldType::Text,
        }])
    }

    async fn batch_create(
        &self,
        _token: &str,
        _doc_token: &str,
        _table_id: &str,
        records: &[serde_json::Value],
    ) -> Result<harvestflow_uploader::transport::BatchOutcome, harvestflow_uploader::error::UploadError> {
        self.batch_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(harvestflow_uploader::transport::BatchOutcome::Success { confirmed: vec![true; records.len()] })
    }
}

#[tokio::test]
async fn auto_upload_job_replicates_through_the_configured_uploader_on_completion() {
    let store = Arc::new(RecordStore::connect("sqlite::memory:").await.unwrap());
    let checkpoints = Arc::new(CheckpointStore::from_record_store(&store));
    let pool = Arc::new(ProfilePool::new(vec!["p1".into()], Duration::from_millis(0), Duration::from_secs(30)));

    let transport = Arc::new(StubTransport { batch_calls: std::sync::atomic::AtomicUsize::new(0) });
    let governor = Arc::new(harvestflow_governor::RateGovernor::new());
    let uploader = harvestflow_uploader::Uploader::new(
        store.clone(),
        transport.clone(),
        governor,
        "app",
        "secret",
        harvestflow_uploader::UploaderConfig { doc_token: "doc".into(), table_id: "tbl".into(), max_retries: 3 },
    );
    let uploader_handle = Arc::new(harvestflow_scheduler::UploaderHandle::new(uploader));

    let scheduler = Arc::new(
        Scheduler::new(store.clone(), checkpoints, pool, Arc::new(Factory), 1, Duration::from_secs(60))
            .with_poll_interval(Duration::from_millis(10))
            .with_uploader(uploader_handle),
    );

    let job_id = scheduler
        .submit_job(harvestflow_protocol::JobSpec {
            name: "J4".into(),
            accounts: vec!["alice".into()],
            keywords: vec![],
            thresholds: Thresholds { min_likes: 5, min_replies: 0, min_reposts: 0 },
            max_records: 1,
            priority: None,
            auto_upload: true,
        })
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let run_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(shutdown_rx).await })
    };

    let mut final_state = None;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        let job = store.get_job(job_id).await.unwrap();
        if job.state == JobState::Completed || job.state == JobState::Failed {
            final_state = Some(job.state);
            break;
        }
    }
    let _ = shutdown_tx.send(());
    let _ = run_handle.await;

    assert_eq!(final_state, Some(JobState::Completed));

    let mut uploaded = false;
    for _ in 0..50 {
        if transport.batch_calls.load(std::sync::atomic::Ordering::SeqCst) >= 1 {
            uploaded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(uploaded, "auto_upload job never reached the configured transport");

    let records = store.list_records(Some(job_id), 10, 0).await.unwrap();
    assert!(records.iter().all(|r| r.synced));
}

#[tokio::test]
async fn restart_recovery_resets_running_jobs_to_pending() {
    let (scheduler, store) = build_scheduler().await;
    let job_id = scheduler
        .submit_job(harvestflow_protocol::JobSpec {
            name: "J3".into(),
            accounts: vec!["alice".into()],
            keywords: vec![],
            thresholds: Thresholds::default(),
            max_records: 5,
            priority: None,
            auto_upload: false,
        })
        .await
        .unwrap();
    store.update_job_state(job_id, JobState::Running, None).await.unwrap();

    scheduler.recover().await.unwrap();

    assert_eq!(store.get_job(job_id).await.unwrap().state, JobState::Pending);
}
