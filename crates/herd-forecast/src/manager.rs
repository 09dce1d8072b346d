//! Job lifecycle manager.
//!
//! Owns every job's state machine, its progress channel and its cancel
//! signal. A job's status change and the matching progress event are applied
//! under one lock, so a subscriber can never observe an event the status
//! query contradicts. Store writes happen after the lock is released and
//! never affect the job outcome.
//!
//! A watchdog task, started with the first submission, fails jobs that have
//! been queued or running for longer than `stuck_job_timeout`. The driver of
//! a timed-out job is told to stop; whatever it produces afterwards is
//! discarded by the state machine.
//!
//! The same sweep evicts finished jobs once they are older than
//! `job_retention`, or when more than `max_retained_jobs` have piled up.
//! Evicted jobs live on in the job store only.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use herd_sim::{Engine, HerdRoster, Scenario, ScenarioParams};
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, Instrument};

use crate::config::{ForecastConfig, RequestContext};
use crate::error::{ForecastError, JobFailure, Result};
use crate::job::{ForecastJob, JobId, JobSnapshot, JobStatus};
use crate::metrics::METRICS;
use crate::monte_carlo::{canceled, MonteCarloRunner, ProgressUpdate};
use crate::obs;
use crate::pool::WorkerPool;
use crate::progress::{ProgressChannel, ProgressEvent, Subscription};
use crate::result::ForecastResult;
use crate::store::{JobRecord, JobStore, MemoryJobStore};

#[derive(Debug)]
struct JobEntry {
    job: ForecastJob,
    channel: Arc<ProgressChannel>,
    cancel: watch::Sender<bool>,
    context: RequestContext,
    scenario_digest: String,
    submitted: Instant,
    started: Option<Instant>,
    finished: Option<Instant>,
    revision: u64,
}

impl JobEntry {
    fn record(&mut self) -> JobRecord {
        self.revision += 1;
        JobRecord {
            snapshot: self.job.snapshot().clone(),
            context: self.context.clone(),
            scenario_digest: self.scenario_digest.clone(),
            revision: self.revision,
        }
    }

    fn progress_event(&self, partial: Option<Arc<ForecastResult>>) -> ProgressEvent {
        let snap = self.job.snapshot();
        ProgressEvent::Progress {
            job_id: snap.id,
            status: snap.status,
            completed_runs: snap.completed_runs,
            total_runs: snap.total_runs,
            partial,
        }
    }

    fn mark_finished(&mut self) {
        self.finished.get_or_insert_with(Instant::now);
    }

    fn elapsed_ms(&self) -> u64 {
        let since = self.started.unwrap_or(self.submitted);
        since.elapsed().as_millis() as u64
    }
}

struct Inner {
    config: ForecastConfig,
    runner: MonteCarloRunner,
    job_slots: Arc<Semaphore>,
    jobs: Mutex<HashMap<JobId, JobEntry>>,
    store: Arc<dyn JobStore>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.watchdog.get_mut().take() {
            handle.abort();
        }
    }
}

/// Accepts forecast requests and runs them as observable, cancellable jobs.
///
/// Cloning is cheap and shares the same jobs, worker pool and store.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("config", &self.inner.config)
            .field("jobs", &self.inner.jobs.lock().len())
            .finish()
    }
}

impl JobManager {
    /// Create a manager with an in-memory job store.
    pub fn new(config: ForecastConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryJobStore::new()))
    }

    pub fn with_store(config: ForecastConfig, store: Arc<dyn JobStore>) -> Result<Self> {
        let pool = WorkerPool::new(config.effective_workers());
        let runner = MonteCarloRunner::new(
            pool,
            config.batch_size,
            config.simulation_version.clone(),
        );
        Self::with_runner(config, store, runner)
    }

    /// Use `runner` for every job. Its pool and batch size take precedence
    /// over the worker settings in `config`.
    pub fn with_runner(
        config: ForecastConfig,
        store: Arc<dyn JobStore>,
        runner: MonteCarloRunner,
    ) -> Result<Self> {
        config.validate()?;
        let job_slots = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                runner,
                job_slots,
                jobs: Mutex::new(HashMap::new()),
                store,
                watchdog: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.inner.config
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        Arc::clone(&self.inner.store)
    }

    /// Validate `params` against `roster` and queue a job.
    ///
    /// Invalid parameters are rejected here and never create a job.
    pub async fn submit(
        &self,
        roster: Arc<HerdRoster>,
        params: ScenarioParams,
        context: RequestContext,
    ) -> Result<JobId> {
        let scenario = Scenario::new(params, &roster, &self.inner.config.limits)?;
        let id = JobId::new();
        let total_runs = scenario.mc_runs();
        let digest = scenario.digest();

        let channel = Arc::new(ProgressChannel::new(
            id,
            total_runs,
            self.inner.config.heartbeat_interval,
        ));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let record = {
            let mut jobs = self.inner.jobs.lock();
            let mut entry = JobEntry {
                job: ForecastJob::new(id, total_runs),
                channel,
                cancel: cancel_tx,
                context,
                scenario_digest: digest.clone(),
                submitted: Instant::now(),
                started: None,
                finished: None,
                revision: 0,
            };
            entry.channel.publish(entry.progress_event(None));
            let record = entry.record();
            jobs.insert(id, entry);
            record
        };

        METRICS.inc_jobs_submitted();
        obs::emit_job_queued(&id, total_runs, &digest);
        self.inner.persist(record).await;
        self.inner.evict_finished(Instant::now());
        self.ensure_watchdog();

        let inner = Arc::clone(&self.inner);
        tokio::spawn(
            drive(inner, id, roster, scenario, cancel_rx).instrument(obs::job_span(&id)),
        );
        Ok(id)
    }

    /// Latest snapshot of a job. Never blocks on the simulation.
    ///
    /// Evicted jobs yield [`ForecastError::JobNotFound`]; their last record
    /// stays in [`JobManager::store`].
    pub fn status(&self, id: &JobId) -> Result<JobSnapshot> {
        self.inner
            .jobs
            .lock()
            .get(id)
            .map(|e| e.job.snapshot().clone())
            .ok_or(ForecastError::JobNotFound(*id))
    }

    /// The result of a succeeded job.
    ///
    /// Queued and running jobs yield [`ForecastError::ResultNotReady`];
    /// failed and canceled jobs yield [`ForecastError::NoResult`].
    pub fn result(&self, id: &JobId) -> Result<Arc<ForecastResult>> {
        let jobs = self.inner.jobs.lock();
        let entry = jobs.get(id).ok_or(ForecastError::JobNotFound(*id))?;
        let status = entry.job.status();
        match (status, entry.job.result()) {
            (JobStatus::Succeeded, Some(result)) => Ok(Arc::clone(result)),
            (JobStatus::Queued | JobStatus::Running, _) => {
                Err(ForecastError::ResultNotReady { id: *id, status })
            }
            _ => Err(ForecastError::NoResult { id: *id, status }),
        }
    }

    /// Attach a reader to the job's progress stream.
    ///
    /// The first event delivered is the latest one already published.
    pub fn subscribe(&self, id: &JobId) -> Result<Subscription> {
        let jobs = self.inner.jobs.lock();
        let entry = jobs.get(id).ok_or(ForecastError::JobNotFound(*id))?;
        Ok(entry.channel.subscribe())
    }

    /// Snapshots of all known jobs, oldest first.
    pub fn list(&self) -> Vec<JobSnapshot> {
        let mut out: Vec<JobSnapshot> = self
            .inner
            .jobs
            .lock()
            .values()
            .map(|e| e.job.snapshot().clone())
            .collect();
        out.sort_by_key(|s| s.queued_at);
        out
    }

    /// Request cancellation. Terminal jobs are left unchanged and their
    /// snapshot is returned as is.
    pub async fn cancel(&self, id: &JobId) -> Result<JobSnapshot> {
        let (snapshot, record) = {
            let mut jobs = self.inner.jobs.lock();
            let entry = jobs.get_mut(id).ok_or(ForecastError::JobNotFound(*id))?;
            let transition = entry.job.cancel();
            if transition.applied {
                let snap = entry.job.snapshot();
                entry.channel.publish(ProgressEvent::Canceled {
                    job_id: *id,
                    completed_runs: snap.completed_runs,
                    total_runs: snap.total_runs,
                });
                entry.cancel.send_replace(true);
                METRICS.inc_jobs_canceled();
                obs::emit_job_canceled(id, snap.completed_runs);
                let snapshot = snap.clone();
                entry.mark_finished();
                (snapshot, Some(entry.record()))
            } else {
                debug!(job_id = %id, status = %transition.status, "cancel on terminal job ignored");
                (entry.job.snapshot().clone(), None)
            }
        };
        if let Some(record) = record {
            self.inner.persist(record).await;
        }
        Ok(snapshot)
    }

    /// Fail every non-terminal job older than the stuck-job timeout as of
    /// `now`. Returns the ids that were timed out.
    pub async fn reap_stuck_jobs(&self, now: Instant) -> Vec<JobId> {
        self.inner.reap_stuck_jobs(now).await
    }

    /// Drop finished jobs past their retention as of `now`, then the oldest
    /// finished jobs beyond `max_retained_jobs`. Returns the evicted ids.
    pub fn evict_finished_jobs(&self, now: Instant) -> Vec<JobId> {
        self.inner.evict_finished(now)
    }

    /// Wait until the job reaches a terminal state.
    pub async fn wait(&self, id: &JobId) -> Result<JobSnapshot> {
        let mut sub = self.subscribe(id)?;
        while let Some(event) = sub.next().await {
            if event.is_terminal() {
                break;
            }
        }
        match self.status(id) {
            Err(ForecastError::JobNotFound(_)) => Ok(self.inner.store.get(id).await?.snapshot),
            other => other,
        }
    }

    fn ensure_watchdog(&self) {
        let mut watchdog = self.inner.watchdog.lock();
        if watchdog.is_some() {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.watchdog_interval;
        *watchdog = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.reap_stuck_jobs(Instant::now()).await;
                inner.evict_finished(Instant::now());
            }
        }));
        debug!(interval_ms = period.as_millis() as u64, "watchdog started");
    }
}

impl Inner {
    async fn persist(&self, record: JobRecord) {
        let id = record.snapshot.id;
        if let Err(e) = self.store.put(&record).await {
            obs::emit_store_error(&id, &e);
        }
    }

    /// `queued -> running`. Returns false if the job left `queued` meanwhile.
    async fn mark_started(&self, id: &JobId) -> bool {
        let record = {
            let mut jobs = self.jobs.lock();
            let Some(entry) = jobs.get_mut(id) else {
                return false;
            };
            if !entry.job.start().applied {
                return false;
            }
            let now = Instant::now();
            let queued_ms = now.saturating_duration_since(entry.submitted).as_millis() as u64;
            entry.started = Some(now);
            entry.channel.publish(entry.progress_event(None));
            obs::emit_job_started(id, queued_ms);
            entry.record()
        };
        self.persist(record).await;
        true
    }

    fn record_progress(&self, id: &JobId, update: ProgressUpdate) {
        let mut jobs = self.jobs.lock();
        let Some(entry) = jobs.get_mut(id) else {
            return;
        };
        // The final count is only ever carried by the terminal event.
        if update.completed >= update.total {
            return;
        }
        if entry.job.record_progress(update.completed).applied {
            let event = entry.progress_event(update.partial.map(Arc::new));
            entry.channel.publish(event);
            obs::emit_job_progress(id, update.completed, update.total);
        }
    }

    async fn complete(&self, id: &JobId, outcome: Result<ForecastResult>) {
        let record = {
            let mut jobs = self.jobs.lock();
            let Some(entry) = jobs.get_mut(id) else {
                return;
            };
            let elapsed_ms = entry.elapsed_ms();

            match outcome {
                Ok(result) => {
                    let result = Arc::new(result);
                    if !entry.job.succeed(Arc::clone(&result)).applied {
                        obs::emit_late_outcome(id, entry.job.status().as_str());
                        return;
                    }
                    let snap = entry.job.snapshot();
                    entry.channel.publish(ProgressEvent::Succeeded {
                        job_id: *id,
                        completed_runs: snap.completed_runs,
                        total_runs: snap.total_runs,
                        result,
                    });
                    entry.mark_finished();
                    METRICS.inc_jobs_succeeded();
                    obs::emit_job_finished(id, JobStatus::Succeeded.as_str(), elapsed_ms, None);
                }
                Err(ForecastError::Canceled) => {
                    debug!(job_id = %id, status = %entry.job.status(), "driver stopped on cancel");
                    return;
                }
                Err(err) => {
                    let failure = JobFailure::from(&err);
                    if !entry.job.fail(failure.clone()).applied {
                        obs::emit_late_outcome(id, entry.job.status().as_str());
                        return;
                    }
                    let snap = entry.job.snapshot();
                    entry.channel.publish(ProgressEvent::Failed {
                        job_id: *id,
                        completed_runs: snap.completed_runs,
                        total_runs: snap.total_runs,
                        error: failure.clone(),
                    });
                    entry.cancel.send_replace(true);
                    entry.mark_finished();
                    METRICS.inc_jobs_failed();
                    obs::emit_job_finished(
                        id,
                        JobStatus::Failed.as_str(),
                        elapsed_ms,
                        Some(&failure.message),
                    );
                }
            }
            entry.record()
        };
        self.persist(record).await;
    }

    fn evict_finished(&self, now: Instant) -> Vec<JobId> {
        let retention = self.config.job_retention;
        let mut jobs = self.jobs.lock();
        let mut finished: Vec<(Instant, JobId)> = jobs
            .iter()
            .filter_map(|(id, entry)| entry.finished.map(|at| (at, *id)))
            .collect();
        finished.sort_by_key(|&(at, _)| at);
        let overflow = finished.len().saturating_sub(self.config.max_retained_jobs);

        let mut evicted = Vec::new();
        for (rank, (at, id)) in finished.into_iter().enumerate() {
            let age = now.saturating_duration_since(at);
            if rank < overflow || age >= retention {
                jobs.remove(&id);
                obs::emit_job_evicted(&id, age.as_millis() as u64);
                evicted.push(id);
            }
        }
        evicted
    }

    async fn reap_stuck_jobs(&self, now: Instant) -> Vec<JobId> {
        let timeout = self.config.stuck_job_timeout;
        let mut reaped = Vec::new();
        let mut records = Vec::new();
        {
            let mut jobs = self.jobs.lock();
            for (id, entry) in jobs.iter_mut() {
                if entry.job.status().is_terminal() {
                    continue;
                }
                let since = entry.started.unwrap_or(entry.submitted);
                let elapsed = now.saturating_duration_since(since);
                if elapsed < timeout {
                    continue;
                }

                let err = ForecastError::Timeout {
                    timeout_secs: timeout.as_secs(),
                };
                let failure = JobFailure::from(&err);
                if !entry.job.fail(failure.clone()).applied {
                    continue;
                }
                let snap = entry.job.snapshot();
                entry.channel.publish(ProgressEvent::Failed {
                    job_id: *id,
                    completed_runs: snap.completed_runs,
                    total_runs: snap.total_runs,
                    error: failure,
                });
                entry.cancel.send_replace(true);
                entry.mark_finished();
                METRICS.inc_jobs_timed_out();
                obs::emit_job_timeout(id, elapsed.as_secs(), timeout.as_secs());
                reaped.push(*id);
                records.push(entry.record());
            }
        }
        for record in records {
            self.persist(record).await;
        }
        reaped
    }
}

/// Drive one job from `queued` to a terminal state.
async fn drive(
    inner: Arc<Inner>,
    id: JobId,
    roster: Arc<HerdRoster>,
    scenario: Scenario,
    mut cancel: watch::Receiver<bool>,
) {
    let slot = tokio::select! {
        permit = Arc::clone(&inner.job_slots).acquire_owned() => permit,
        _ = canceled(&mut cancel) => {
            debug!("job left the queue before a slot was free");
            return;
        }
    };
    let _slot = match slot {
        Ok(permit) => permit,
        Err(e) => {
            inner
                .complete(&id, Err(ForecastError::Pool(e.to_string())))
                .await;
            return;
        }
    };

    if !inner.mark_started(&id).await {
        return;
    }

    let prepared =
        tokio::task::spawn_blocking(move || Engine::prepare(&roster, scenario)).await;
    let engine = match prepared {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            inner
                .complete(&id, Err(ForecastError::Pool(e.to_string())))
                .await;
            return;
        }
    };
    info!(
        warnings = engine.warnings().len(),
        months = engine.scenario().months().len(),
        "engine prepared"
    );

    let outcome = inner
        .runner
        .run(engine, cancel, |update| inner.record_progress(&id, update))
        .await;
    inner.complete(&id, outcome).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use chrono::NaiveDate;
    use herd_sim::{Animal, AnimalId};
    use std::time::Duration;

    fn roster(n: u64) -> Arc<HerdRoster> {
        let d = |y, m, day| NaiveDate::from_ymd_opt(y, m, day).unwrap();
        let animals = (1..=n)
            .map(|i| Animal::milking_cow(AnimalId(i), d(2019, 4, 1), 2, d(2023, 12, 1)))
            .collect();
        Arc::new(HerdRoster::new(d(2024, 1, 1), animals))
    }

    fn config() -> ForecastConfig {
        ForecastConfig::default()
            .with_workers(2)
            .with_batch_size(4)
            .with_heartbeat_interval(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_submit_runs_to_success() {
        let manager = JobManager::new(config()).unwrap();
        let params = ScenarioParams {
            horizon_months: 6,
            mc_runs: 5,
            ..Default::default()
        };
        let id = manager
            .submit(roster(30), params, RequestContext::default())
            .await
            .unwrap();

        let snap = manager.wait(&id).await.unwrap();
        assert_eq!(snap.status, JobStatus::Succeeded);
        assert_eq!(snap.completed_runs, 5);
        let result = manager.result(&id).unwrap();
        assert_eq!(result.meta.completed_runs, 5);

        let record = manager.store().get(&id).await.unwrap();
        assert_eq!(record.snapshot.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_invalid_params_never_queue() {
        let manager = JobManager::new(config()).unwrap();
        let params = ScenarioParams {
            horizon_months: 0,
            ..Default::default()
        };
        let err = manager
            .submit(roster(5), params, RequestContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::Validation(_)));
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let manager = JobManager::new(config()).unwrap();
        let id = JobId::new();
        assert!(matches!(manager.status(&id), Err(ForecastError::JobNotFound(_))));
        assert!(matches!(
            manager.cancel(&id).await,
            Err(ForecastError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reaper_times_out_queued_job() {
        let manager = JobManager::new(
            config()
                .with_max_concurrent_jobs(1)
                .with_stuck_job_timeout(Duration::from_secs(60)),
        )
        .unwrap();
        let params = ScenarioParams {
            horizon_months: 120,
            mc_runs: 200,
            ..Default::default()
        };
        let id = manager
            .submit(roster(50), params, RequestContext::default())
            .await
            .unwrap();

        let reaped = manager
            .reap_stuck_jobs(Instant::now() + Duration::from_secs(3600))
            .await;
        assert_eq!(reaped, vec![id]);

        let snap = manager.status(&id).unwrap();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error.unwrap().kind, FailureKind::Timeout);

        // A second sweep finds nothing.
        assert!(manager
            .reap_stuck_jobs(Instant::now() + Duration::from_secs(7200))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_failing_run_fails_the_job() {
        let runner = MonteCarloRunner::new(WorkerPool::new(2), 2, "test").with_run_fn(Arc::new(
            |engine: &Engine, index: u32, seed: u64| {
                if index == 3 {
                    return Err(herd_sim::SimError::Sampler("empty service periods".into()));
                }
                engine.run(seed)
            },
        ));
        let manager =
            JobManager::with_runner(config(), Arc::new(MemoryJobStore::new()), runner).unwrap();
        let params = ScenarioParams {
            horizon_months: 3,
            mc_runs: 6,
            ..Default::default()
        };
        let id = manager
            .submit(roster(20), params, RequestContext::default())
            .await
            .unwrap();

        let mut sub = manager.subscribe(&id).unwrap();
        let mut events = Vec::new();
        while let Some(event) = sub.next().await {
            events.push(event);
        }
        assert!(events
            .iter()
            .all(|e| !matches!(**e, ProgressEvent::Succeeded { .. })));
        assert!(events.iter().all(|e| e.completed_runs() < 6));
        match &**events.last().unwrap() {
            ProgressEvent::Failed { error, .. } => {
                assert_eq!(error.kind, FailureKind::Run);
                assert!(error.message.contains("empty service periods"));
            }
            other => panic!("expected failed, got {other:?}"),
        }

        let snap = manager.status(&id).unwrap();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error.unwrap().kind, FailureKind::Run);
        assert!(matches!(
            manager.result(&id),
            Err(ForecastError::NoResult { .. })
        ));
    }

    #[tokio::test]
    async fn test_retained_job_cap_drops_oldest() {
        let manager = JobManager::new(config().with_max_retained_jobs(3)).unwrap();
        let params = ScenarioParams {
            horizon_months: 2,
            mc_runs: 1,
            ..Default::default()
        };
        let mut ids = Vec::new();
        for _ in 0..5 {
            let id = manager
                .submit(roster(10), params.clone(), RequestContext::default())
                .await
                .unwrap();
            manager.wait(&id).await.unwrap();
            ids.push(id);
        }
        manager.evict_finished_jobs(Instant::now());

        assert_eq!(manager.list().len(), 3);
        assert!(manager.status(&ids[4]).is_ok());
        assert!(matches!(
            manager.status(&ids[0]),
            Err(ForecastError::JobNotFound(_))
        ));
        // The store still answers for evicted jobs.
        let record = manager.store().get(&ids[0]).await.unwrap();
        assert_eq!(record.snapshot.status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_running_jobs_are_never_evicted() {
        let manager = JobManager::new(
            config()
                .with_max_concurrent_jobs(1)
                .with_job_retention(Duration::ZERO)
                .with_max_retained_jobs(0),
        )
        .unwrap();
        let params = ScenarioParams {
            horizon_months: 120,
            mc_runs: 200,
            ..Default::default()
        };
        let id = manager
            .submit(roster(50), params, RequestContext::default())
            .await
            .unwrap();

        assert!(manager
            .evict_finished_jobs(Instant::now() + Duration::from_secs(3600))
            .is_empty());
        manager.cancel(&id).await.unwrap();
        assert_eq!(manager.evict_finished_jobs(Instant::now()), vec![id]);
        assert!(manager.list().is_empty());
    }
}
