//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use super::types::{Job, JobId, JobStatus, QueueCounts, to_chrono};

/// Job store abstraction.
///
/// Several executors may share one store: `claim_next` must hand a ready job
/// to exactly one caller.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Enqueue a new job. Never waits on consumers.
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Claim the oldest ready job and lease it for `lease`.
    /// Returns None if no jobs are available.
    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError>;

    /// Push the lease of a running job `lease` into the future.
    async fn extend_lease(&self, job_id: JobId, lease: Duration) -> Result<(), JobStoreError>;

    /// Persist a job the executor marked completed.
    async fn complete(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Persist a job the executor marked for a delayed retry.
    async fn schedule_retry(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Persist a job the executor parked as failed.
    async fn fail(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Return running jobs whose lease has expired to the waiting list, or park
    /// them when the expired try was their last. Returns how many were settled.
    async fn recover_stalled(&self) -> Result<usize, JobStoreError>;

    /// Parked jobs, oldest first.
    async fn list_failed(&self, limit: usize) -> Result<Vec<Job>, JobStoreError>;

    /// Move a parked job back to the waiting list with a fresh attempt budget.
    async fn retry_failed(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    async fn remove_failed(&self, job_id: JobId) -> Result<(), JobStoreError>;

    async fn counts(&self) -> Result<QueueCounts, JobStoreError>;
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job {0} is not in the failed set")]
    NotFailed(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Every retained job, oldest first.
    pub fn snapshot(&self) -> Vec<Job> {
        let mut jobs: Vec<_> = self.jobs.read().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    fn settle(&self, job: &Job, remove: bool) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if !jobs.contains_key(&job.id) {
            return Err(JobStoreError::NotFound(job.id));
        }
        if remove {
            jobs.remove(&job.id);
        } else {
            jobs.insert(job.id, job.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.read().unwrap().get(&job_id).cloned())
    }

    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let now = Utc::now();

        // FIFO by the time each job became ready
        let next = jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| (j.scheduled_at.unwrap_or(j.created_at), j.created_at))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running(lease, now);
                job.clone()
            })
        }))
    }

    async fn extend_lease(&self, job_id: JobId, lease: Duration) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if job.status == JobStatus::Running {
            job.lease_until = Some(Utc::now() + to_chrono(lease));
        }
        Ok(())
    }

    async fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
        self.settle(job, job.remove_on_complete)
    }

    async fn schedule_retry(&self, job: &Job) -> Result<(), JobStoreError> {
        self.settle(job, false)
    }

    async fn fail(&self, job: &Job) -> Result<(), JobStoreError> {
        self.settle(job, job.remove_on_fail)
    }

    async fn recover_stalled(&self) -> Result<usize, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let now = Utc::now();
        let mut recovered = 0;
        let mut dropped = Vec::new();
        for job in jobs.values_mut() {
            let expired = job.status == JobStatus::Running && job.lease_until.is_some_and(|t| t < now);
            if expired {
                let parked = job.mark_stalled(now);
                if parked && job.remove_on_fail {
                    dropped.push(job.id);
                }
                recovered += 1;
            }
        }
        for id in dropped {
            jobs.remove(&id);
        }
        Ok(recovered)
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Failed { .. }))
            .cloned()
            .collect();

        result.sort_by_key(|j| j.updated_at);
        result.truncate(limit);
        Ok(result)
    }

    async fn retry_failed(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;
        if !matches!(job.status, JobStatus::Failed { .. }) {
            return Err(JobStoreError::NotFailed(job_id));
        }
        job.reset_for_retry(Utc::now());
        Ok(job.clone())
    }

    async fn remove_failed(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap();
        match jobs.get(&job_id) {
            None => Err(JobStoreError::NotFound(job_id)),
            Some(job) if !matches!(job.status, JobStatus::Failed { .. }) => {
                Err(JobStoreError::NotFailed(job_id))
            }
            Some(_) => {
                jobs.remove(&job_id);
                Ok(())
            }
        }
    }

    async fn counts(&self) -> Result<QueueCounts, JobStoreError> {
        let jobs = self.jobs.read().unwrap();
        let mut counts = QueueCounts::default();
        for job in jobs.values() {
            match job.status {
                JobStatus::Pending => counts.waiting += 1,
                JobStatus::Running => counts.active += 1,
                JobStatus::Delayed => counts.delayed += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed { .. } => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
