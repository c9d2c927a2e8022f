//! Job Scheduler (C7): FIFO admission against a concurrency cap and the
//! Profile Pool, in-process dispatch of admitted jobs, restart recovery, and
//! per-job deadline enforcement.
//!
//! The supervisor shape — a single loop that ticks on an interval, reaps
//! finished units, enforces timeouts, then tries to admit more work — is the
//! same event-loop-with-cleanup-tick pattern the teacher's own sentinel
//! event loop uses (recv -> cleanup stale workers -> fail orphaned jobs ->
//! dispatch), generalized from a ZMQ worker pool to in-process tokio tasks
//! bound to leased browser profiles.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use harvestflow_db::{CheckpointStore, RecordStore};
use harvestflow_driver::{CancellationToken, Driver, DriverOutcome};
use harvestflow_ids::{JobId, ProfileId};
use harvestflow_profiles::{LeaseOutcome, ProfilePool};
use harvestflow_protocol::{ErrorKind, Job, JobSpec, JobState};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::session_factory::SessionFactory;
use crate::uploader_handle::UploaderHandle;

/// How often the admission loop wakes to reap finished jobs, enforce
/// deadlines, and retry cooldown-blocked admissions (`spec.md` §4.7,
/// "polls the pool at a bounded interval").
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

struct RunningJob {
    cancel: CancellationToken,
    profile_id: ProfileId,
    started_at: Instant,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    record_store: Arc<RecordStore>,
    checkpoint_store: Arc<CheckpointStore>,
    profile_pool: Arc<ProfilePool>,
    session_factory: Arc<dyn SessionFactory>,
    max_concurrency: usize,
    job_deadline: Duration,
    poll_interval: Duration,
    uploader: Option<Arc<UploaderHandle>>,
    running: Mutex<HashMap<JobId, RunningJob>>,
}

impl Scheduler {
    pub fn new(
        record_store: Arc<RecordStore>,
        checkpoint_store: Arc<CheckpointStore>,
        profile_pool: Arc<ProfilePool>,
        session_factory: Arc<dyn SessionFactory>,
        max_concurrency: usize,
        job_deadline: Duration,
    ) -> Self {
        Self {
            record_store,
            checkpoint_store,
            profile_pool,
            session_factory,
            max_concurrency,
            job_deadline,
            poll_interval: DEFAULT_POLL_INTERVAL,
            uploader: None,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Configures the uploader an auto-upload job replicates through on
    /// completion (`spec.md` §2, §3). Without this, `auto_upload` jobs
    /// finish normally but never enqueue an upload batch.
    pub fn with_uploader(mut self, uploader: Arc<UploaderHandle>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    pub fn record_store(&self) -> &Arc<RecordStore> {
        &self.record_store
    }

    /// Restart recovery (`spec.md` §4.7): every `Running`/`Queued` job is
    /// moved back to `Pending`, and every in-memory lease hold is cleared.
    /// The Profile Pool itself holds no durable state — it is rebuilt from
    /// scratch on every process start, so recovery is purely in-memory.
    /// Must be called once before [`Self::run`].
    pub async fn recover(&self) -> Result<(), SchedulerError> {
        let reset = self.record_store.reset_interrupted_jobs().await?;
        self.profile_pool.recover();
        if reset > 0 {
            info!(reset, "restart recovery: reset interrupted jobs to pending");
        }
        Ok(())
    }

    /// Runs the admission supervisor until `shutdown` resolves. Each tick
    /// reaps finished jobs, force-cancels overdue ones, then tries to admit
    /// as much of the backlog as capacity and the profile pool allow.
    pub async fn run(&self, mut shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<(), SchedulerError> {
        info!("scheduler admission loop started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            self.reap_finished().await;
            self.enforce_deadlines().await;
            if let Err(err) = self.admit().await {
                warn!(error = %err, "admission tick failed");
            }
        }
        info!("scheduler admission loop stopped");
        Ok(())
    }

    /// One admission pass: admits head-of-backlog jobs until capacity is
    /// exhausted or the head is blocked on profile cooldown (`spec.md`
    /// §4.7). Backlog order is FIFO by job id across `Pending` and `Queued`
    /// states combined.
    async fn admit(&self) -> Result<(), SchedulerError> {
        loop {
            let cap = self.max_concurrency.min(self.profile_pool.size());
            if self.running.lock().await.len() >= cap {
                return Ok(());
            }

            let mut backlog = self.record_store.list_jobs(Some(JobState::Pending)).await?;
            backlog.extend(self.record_store.list_jobs(Some(JobState::Queued)).await?);
            backlog.sort_by_key(|j| j.id.get());
            let Some(head) = backlog.into_iter().next() else {
                return Ok(());
            };

            match self.profile_pool.lease(head.id) {
                Ok(LeaseOutcome::Ready(profile_id)) => {
                    self.spawn_job(head, profile_id).await?;
                }
                Ok(LeaseOutcome::CoolingDown) => {
                    if head.state == JobState::Pending {
                        self.record_store.update_job_state(head.id, JobState::Queued, None).await?;
                    }
                    return Ok(());
                }
                Err(_) => return Ok(()),
            }
        }
    }

    async fn spawn_job(&self, job: Job, profile_id: ProfileId) -> Result<(), SchedulerError> {
        self.record_store.update_job_state(job.id, JobState::Running, None).await?;

        let cancel = CancellationToken::new();
        let job_id = job.id;
        let task = run_job_task(
            job,
            profile_id.clone(),
            self.record_store.clone(),
            self.checkpoint_store.clone(),
            self.profile_pool.clone(),
            self.session_factory.clone(),
            self.uploader.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(task);

        self.running.lock().await.insert(
            job_id,
            RunningJob { cancel, profile_id, started_at: Instant::now(), handle },
        );
        Ok(())
    }

    async fn reap_finished(&self) {
        let mut running = self.running.lock().await;
        running.retain(|job_id, rj| {
            let finished = rj.handle.is_finished();
            if finished {
                info!(%job_id, "reaped finished job task");
            }
            !finished
        });
    }

    /// Force-cancels any running job past its deadline (`spec.md` §5). The
    /// cancellation itself is cooperative — this only raises the flag the
    /// driver checks between targets.
    async fn enforce_deadlines(&self) {
        let running = self.running.lock().await;
        for (job_id, rj) in running.iter() {
            if rj.started_at.elapsed() >= self.job_deadline && !rj.cancel.is_cancelled() {
                warn!(%job_id, "job exceeded its deadline, forcing cancellation");
                rj.cancel.cancel();
            }
        }
    }

    /// `Cancel(jobId)` (`spec.md` §4.7). A running job is signalled
    /// cooperatively; a backlogged job is cancelled immediately since
    /// nothing is mid-flight.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<(), SchedulerError> {
        if let Some(rj) = self.running.lock().await.get(&job_id) {
            rj.cancel.cancel();
            return Ok(());
        }

        let job = self.record_store.get_job(job_id).await.map_err(|_| SchedulerError::JobNotFound(job_id.get()))?;
        match job.state {
            JobState::Pending | JobState::Queued => {
                self.record_store.update_job_state(job_id, JobState::Cancelled, None).await?;
                Ok(())
            }
            _ => Err(SchedulerError::NotCancellable(job_id.get())),
        }
    }

    /// Administrative `Restart` (`spec.md` §4.7): only a `Failed` job may be
    /// reset to `Pending`, clearing its error.
    pub async fn restart_job(&self, job_id: JobId) -> Result<(), SchedulerError> {
        let job = self.record_store.get_job(job_id).await.map_err(|_| SchedulerError::JobNotFound(job_id.get()))?;
        if job.state != JobState::Failed {
            return Err(SchedulerError::NotRestartable(job_id.get()));
        }
        self.record_store.update_job_state(job_id, JobState::Pending, None).await?;
        Ok(())
    }

    /// `Submit(spec) -> jobId` (`spec.md` §4.7). Input validation is the
    /// Control Facade's job; this assumes an already-validated spec.
    pub async fn submit_job(&self, spec: JobSpec) -> Result<JobId, SchedulerError> {
        Ok(self.record_store.create_job(&spec).await?)
    }
}

async fn run_job_task(
    job: Job,
    profile_id: ProfileId,
    record_store: Arc<RecordStore>,
    checkpoint_store: Arc<CheckpointStore>,
    profile_pool: Arc<ProfilePool>,
    session_factory: Arc<dyn SessionFactory>,
    uploader: Option<Arc<UploaderHandle>>,
    cancel: CancellationToken,
) {
    let job_id = job.id;
    let auto_upload = job.spec.auto_upload;

    let outcome = match session_factory.open(&profile_id).await {
        Ok((mut session, extractor)) => {
            let driver = Driver::new(record_store.clone(), checkpoint_store.clone());
            driver.run_job(&job, session.as_mut(), extractor.as_ref(), &cancel).await
        }
        Err(err) => DriverOutcome::Failed { reason: err.to_string(), kind: ErrorKind::SessionLost },
    };

    match outcome {
        DriverOutcome::Completed { delivered } => {
            info!(%job_id, delivered, "job completed");
            if let Err(err) = record_store.update_job_state(job_id, JobState::Completed, None).await {
                warn!(%job_id, error = %err, "failed to persist completed state");
            }
            if auto_upload {
                match &uploader {
                    Some(handle) => match handle.upload(Some(job_id)).await {
                        Ok(report) => info!(%job_id, confirmed = report.confirmed, unconfirmed = report.unconfirmed, "auto-upload completed"),
                        Err(err) => warn!(%job_id, error = %err, "auto-upload failed"),
                    },
                    None => warn!(%job_id, "job requested auto-upload but no uploader is configured"),
                }
            }
        }
        DriverOutcome::Failed { reason, kind } => {
            warn!(%job_id, %reason, %kind, "job failed");
            if let Err(err) = record_store.update_job_state(job_id, JobState::Failed, Some(&reason)).await {
                warn!(%job_id, error = %err, "failed to persist failed state");
            }
        }
        DriverOutcome::Cancelled => {
            info!(%job_id, "job cancelled");
            if let Err(err) = record_store.update_job_state(job_id, JobState::Cancelled, None).await {
                warn!(%job_id, error = %err, "failed to persist cancelled state");
            }
        }
    }

    if let Err(err) = profile_pool.release(&profile_id, job_id) {
        warn!(%job_id, error = %err, "failed to release profile lease");
    }
}
