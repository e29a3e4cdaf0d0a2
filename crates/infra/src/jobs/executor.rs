//! Job executor with retry, backoff and lease renewal.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, JobKind, JobResult};

/// Runs one job. Called once per claimed try.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult;
}

/// Adapts an async closure into a `JobHandler`.
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn JobHandler>
where
    F: Fn(Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobResult> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = JobResult> + Send,
{
    async fn handle(&self, job: &Job) -> JobResult {
        (self.0)(job.clone()).await
    }
}

/// Observable queue events, broadcast to in-process subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    Completed {
        job_id: JobId,
        attempt: u32,
    },
    /// A try failed and another one is scheduled.
    Retrying {
        job_id: JobId,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The job was parked in the failed set. No more tries.
    Failed {
        job_id: JobId,
        attempts: u32,
        error: String,
    },
    /// The queue itself misbehaved (claim or store write failed).
    Error { message: String },
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How often an idle loop polls for new jobs
    pub poll_interval: Duration,
    /// Number of claim loops
    pub max_concurrent: usize,
    /// Name for logging
    pub name: String,
    /// Lease taken on each claimed job; renewed while the handler runs
    pub lease: Duration,
    /// How often expired leases are swept back to the wait list
    pub stalled_interval: Duration,
    /// Cap on the poll backoff after consecutive queue errors
    pub max_error_backoff: Duration,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_concurrent: 4,
            name: "job-executor".to_string(),
            lease: Duration::from_secs(30),
            stalled_interval: Duration::from_secs(30),
            max_error_backoff: Duration::from_secs(30),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Also sets the stalled sweep to run once per lease.
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self.stalled_interval = lease;
        self
    }

    /// Idle wait after `consecutive_errors` queue errors in a row.
    pub fn error_backoff(&self, consecutive_errors: u32) -> Duration {
        let factor = 2_u32.saturating_pow(consecutive_errors);
        self.poll_interval
            .saturating_mul(factor)
            .min(self.max_error_backoff)
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub queue_errors: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to control a running executor.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
    events: broadcast::Sender<QueueEvent>,
    started: Instant,
}

impl JobExecutorHandle {
    /// Stop claiming, let in-flight jobs finish, and wait for every loop.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            let _ = join.await;
        }
    }

    pub fn stats(&self) -> ExecutorStats {
        let mut stats = self.stats.lock().unwrap().clone();
        stats.uptime_secs = self.started.elapsed().as_secs();
        stats
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }
}

/// What happened to one claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying,
    Failed,
}

/// Background job executor.
///
/// Claims jobs from a shared store, runs them with registered handlers, and
/// applies each job's retry policy. Any number of executors may share a store.
pub struct JobExecutor {
    store: Arc<dyn JobStore>,
    handlers: HashMap<String, Arc<dyn JobHandler>>,
    events: broadcast::Sender<QueueEvent>,
}

impl JobExecutor {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            handlers: HashMap::new(),
            events,
        }
    }

    /// Register a handler for a job kind. `"prefix.*"` and `"*"` patterns are
    /// matched after exact names.
    pub fn register_handler(&mut self, kind_pattern: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind_pattern.into(), handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn get_handler(&self, kind: &JobKind) -> Option<Arc<dyn JobHandler>> {
        let type_name = kind.type_name();
        if let Some(h) = self.handlers.get(type_name) {
            return Some(h.clone());
        }

        for (pattern, handler) in &self.handlers {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if type_name.starts_with(prefix) {
                    return Some(handler.clone());
                }
            }
        }

        self.handlers.get("*").cloned()
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Run one claimed job to its next state and persist it.
    pub async fn execute(&self, job: Job, lease: Duration) -> Result<JobOutcome, JobStoreError> {
        let started = Utc::now();

        let Some(handler) = self.get_handler(&job.kind) else {
            let error = format!("no handler for job kind: {}", job.kind.type_name());
            return self.park(job, error, started).await;
        };

        let result = {
            let work = handler.handle(&job);
            tokio::pin!(work);
            let mut renew = tokio::time::interval((lease / 3).max(Duration::from_millis(10)));
            renew.tick().await;
            loop {
                tokio::select! {
                    result = &mut work => break result,
                    _ = renew.tick() => {
                        if let Err(e) = self.store.extend_lease(job.id, lease).await {
                            warn!(job_id = %job.id, error = %e, "lease renewal failed");
                        }
                    }
                }
            }
        };

        match result {
            JobResult::Success => {
                let mut job = job;
                job.mark_completed(started);
                self.store.complete(&job).await?;
                info!(job_id = %job.id, attempt = job.attempt, "job completed");
                self.emit(QueueEvent::Completed {
                    job_id: job.id,
                    attempt: job.attempt,
                });
                Ok(JobOutcome::Completed)
            }
            JobResult::Fatal(error) => self.park(job, error, started).await,
            JobResult::Failure(error) => self.retry_or_park(job, error, started).await,
        }
    }

    async fn retry_or_park(
        &self,
        mut job: Job,
        error: String,
        started: chrono::DateTime<Utc>,
    ) -> Result<JobOutcome, JobStoreError> {
        if !job.retry_policy.should_retry(job.attempt) {
            return self.park(job, error, started).await;
        }

        let delay = job.retry_policy.delay_for_attempt(job.attempt);
        job.mark_retrying(error.clone(), started, delay);
        self.store.schedule_retry(&job).await?;
        warn!(
            job_id = %job.id,
            attempt = job.attempt,
            delay_ms = delay.as_millis() as u64,
            payload = %job.payload,
            error = %error,
            "job failed, retry scheduled"
        );
        self.emit(QueueEvent::Retrying {
            job_id: job.id,
            attempt: job.attempt,
            delay,
            error,
        });
        Ok(JobOutcome::Retrying)
    }

    async fn park(
        &self,
        mut job: Job,
        error: String,
        started: chrono::DateTime<Utc>,
    ) -> Result<JobOutcome, JobStoreError> {
        job.mark_failed(error.clone(), started);
        self.store.fail(&job).await?;
        error!(
            job_id = %job.id,
            attempts = job.attempt,
            payload = %job.payload,
            error = %error,
            "job failed permanently"
        );
        self.emit(QueueEvent::Failed {
            job_id: job.id,
            attempts: job.attempt,
            error,
        });
        Ok(JobOutcome::Failed)
    }

    /// Spawn the claim loops and the stalled-job sweep on the current runtime.
    pub fn spawn(self, config: JobExecutorConfig) -> JobExecutorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let events = self.events.clone();
        let executor = Arc::new(self);

        let mut joins = Vec::with_capacity(config.max_concurrent + 1);
        for index in 0..config.max_concurrent.max(1) {
            joins.push(tokio::spawn(claim_loop(
                executor.clone(),
                config.clone(),
                index,
                shutdown_rx.clone(),
                stats.clone(),
            )));
        }
        joins.push(tokio::spawn(stalled_sweep(
            executor,
            config,
            shutdown_rx,
            stats.clone(),
        )));

        JobExecutorHandle {
            shutdown: shutdown_tx,
            joins,
            stats,
            events,
            started: Instant::now(),
        }
    }
}

/// Sleep for `wait` unless shutdown is requested first. Returns false on shutdown.
async fn idle(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(wait) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}

async fn claim_loop(
    executor: Arc<JobExecutor>,
    config: JobExecutorConfig,
    index: usize,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    info!(executor = %config.name, index, "job executor loop started");
    let mut consecutive_errors = 0_u32;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let wait = match executor.store.claim_next(config.lease).await {
            Ok(Some(job)) => {
                consecutive_errors = 0;
                debug!(executor = %config.name, job_id = %job.id, kind = job.kind.type_name(), attempt = job.attempt, "claimed job");
                stats.lock().unwrap().current_running += 1;

                let job_id = job.id;
                let outcome = executor.execute(job, config.lease).await;

                let mut s = stats.lock().unwrap();
                s.current_running = s.current_running.saturating_sub(1);
                s.jobs_processed += 1;
                match outcome {
                    Ok(JobOutcome::Completed) => s.jobs_succeeded += 1,
                    Ok(JobOutcome::Retrying) => s.jobs_retried += 1,
                    Ok(JobOutcome::Failed) => s.jobs_failed += 1,
                    Err(e) => {
                        s.queue_errors += 1;
                        // The lease will lapse and the sweep will hand the job out again.
                        error!(executor = %config.name, job_id = %job_id, error = %e, "failed to record job result");
                        executor.emit(QueueEvent::Error {
                            message: format!("recording result of job {job_id}: {e}"),
                        });
                    }
                }
                None
            }
            Ok(None) => {
                consecutive_errors = 0;
                Some(config.poll_interval)
            }
            Err(e) => {
                consecutive_errors = consecutive_errors.saturating_add(1);
                let backoff = config.error_backoff(consecutive_errors);
                stats.lock().unwrap().queue_errors += 1;
                error!(
                    executor = %config.name,
                    error = %e,
                    consecutive_errors,
                    backoff_ms = backoff.as_millis() as u64,
                    "failed to claim job"
                );
                executor.emit(QueueEvent::Error {
                    message: format!("claiming job: {e}"),
                });
                Some(backoff)
            }
        };

        if let Some(wait) = wait {
            if !idle(wait, &mut shutdown).await {
                break;
            }
        }
    }

    info!(executor = %config.name, index, "job executor loop stopped");
}

async fn stalled_sweep(
    executor: Arc<JobExecutor>,
    config: JobExecutorConfig,
    mut shutdown: watch::Receiver<bool>,
    stats: Arc<Mutex<ExecutorStats>>,
) {
    while idle(config.stalled_interval, &mut shutdown).await {
        match executor.store.recover_stalled().await {
            Ok(0) => {}
            Ok(n) => warn!(executor = %config.name, recovered = n, "recovered stalled jobs"),
            Err(e) => {
                stats.lock().unwrap().queue_errors += 1;
                error!(executor = %config.name, error = %e, "stalled job sweep failed");
                executor.emit(QueueEvent::Error {
                    message: format!("recovering stalled jobs: {e}"),
                });
            }
        }
    }
}
