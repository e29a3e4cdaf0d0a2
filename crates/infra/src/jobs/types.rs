//! Core job types and policies.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Handler name for dealer assignment jobs.
pub const DEALER_ASSIGNMENT: &str = "dealer-assignment";

/// Job kind, used to route a job to its handler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Assign every line of one order to a dealer. Payload: `{"order_id": ...}`.
    DealerAssignment,
    Custom { kind: String },
}

impl JobKind {
    pub fn custom(kind: impl Into<String>) -> Self {
        Self::Custom { kind: kind.into() }
    }

    pub fn type_name(&self) -> &str {
        match self {
            JobKind::DealerAssignment => DEALER_ASSIGNMENT,
            JobKind::Custom { kind } => kind,
        }
    }
}

/// Job execution status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed
    Pending,
    /// Claimed by a worker holding a lease
    Running,
    /// Waiting for a backoff or an initial delay to elapse
    Delayed,
    Completed,
    /// Parked in the failed set; only a manual retry revives it
    Failed { error: String, attempts: u32 },
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Delayed => "delayed",
            JobStatus::Completed => "completed",
            JobStatus::Failed { .. } => "failed",
        }
    }
}

/// Backoff strategy for retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,
    /// Exponential backoff: base * 2^(attempt - 1)
    #[default]
    Exponential,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of tries, the first one included
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0) to add randomness
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Policy for dealer assignment: 5 tries, exponential from 1s, no jitter.
    pub fn dealer_assignment() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }

    /// A single try, no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    /// Delay before the try that follows failed attempt `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let delay_ms = match self.strategy {
            BackoffStrategy::Fixed => base_ms,
            BackoffStrategy::Exponential => {
                let exp = 2_f64.powi((attempt - 1) as i32);
                (base_ms * exp).min(max_ms)
            }
        };

        let jitter_range = delay_ms * self.jitter;
        let jitter = if jitter_range > 0.0 {
            // Deterministic spread keyed on the attempt number
            let pseudo_random = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            jitter_range * (pseudo_random - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay_ms + jitter).max(0.0) as u64)
    }

    /// Whether a job that just finished try `attempt` may run again.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// How a job is queued and what happens to it once it settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueOptions {
    pub retry: RetryPolicy,
    /// Drop the job document once it completes
    pub remove_on_complete: bool,
    /// Drop the job document once it is parked as failed
    pub remove_on_fail: bool,
    /// Hold the job back before its first try
    pub delay: Option<Duration>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            remove_on_complete: true,
            remove_on_fail: false,
            delay: None,
        }
    }
}

impl EnqueueOptions {
    pub fn dealer_assignment() -> Self {
        Self {
            retry: RetryPolicy::dealer_assignment(),
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Error recorded on a job parked because its final try never reported back.
pub const LEASE_EXPIRED_ON_LAST_TRY: &str = "lease expired on final attempt";

/// A background job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_policy: RetryPolicy,
    pub remove_on_complete: bool,
    pub remove_on_fail: bool,
    /// Tries started so far (starts at 0)
    pub attempt: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Earliest time the job may be claimed
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Set while running; the job is stalled once this passes
    pub lease_until: Option<DateTime<Utc>>,
    pub history: Vec<JobAttemptRecord>,
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl Job {
    pub fn new(kind: JobKind, payload: serde_json::Value, options: EnqueueOptions) -> Self {
        let now = Utc::now();
        let scheduled_at = options.delay.map(|d| now + to_chrono(d));
        Self {
            id: JobId::new(),
            kind,
            payload,
            status: if scheduled_at.is_some() {
                JobStatus::Delayed
            } else {
                JobStatus::Pending
            },
            retry_policy: options.retry,
            remove_on_complete: options.remove_on_complete,
            remove_on_fail: options.remove_on_fail,
            attempt: 0,
            created_at: now,
            updated_at: now,
            scheduled_at,
            lease_until: None,
            history: Vec::new(),
        }
    }

    /// Check if the job may be claimed at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Pending => true,
            JobStatus::Delayed => self.scheduled_at.is_none_or(|at| now >= at),
            _ => false,
        }
    }

    /// Start a new try, held for `lease`.
    pub fn mark_running(&mut self, lease: Duration, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.scheduled_at = None;
        self.lease_until = Some(now + to_chrono(lease));
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.lease_until = None;
        self.updated_at = now;
        self.record_attempt(started_at, now, None);
    }

    /// Record a failed try and hold the job back for `delay`.
    pub fn mark_retrying(&mut self, error: String, started_at: DateTime<Utc>, delay: Duration) {
        let now = Utc::now();
        self.status = JobStatus::Delayed;
        self.lease_until = None;
        self.scheduled_at = Some(now + to_chrono(delay));
        self.updated_at = now;
        self.record_attempt(started_at, now, Some(error));
    }

    /// Record a failed try and park the job.
    pub fn mark_failed(&mut self, error: String, started_at: DateTime<Utc>) {
        let now = Utc::now();
        self.status = JobStatus::Failed {
            error: error.clone(),
            attempts: self.attempt,
        };
        self.lease_until = None;
        self.scheduled_at = None;
        self.updated_at = now;
        self.record_attempt(started_at, now, Some(error));
    }

    /// Settle a job whose lease expired. The attempt it was on stays counted:
    /// the job goes back to the waiting list, or is parked if that was its
    /// last try. Returns true when parked.
    pub fn mark_stalled(&mut self, now: DateTime<Utc>) -> bool {
        // Still the claim time; lease renewals only move `lease_until`.
        let claimed_at = self.updated_at;
        self.lease_until = None;
        self.updated_at = now;
        if self.retry_policy.should_retry(self.attempt) {
            self.status = JobStatus::Pending;
            return false;
        }

        self.status = JobStatus::Failed {
            error: LEASE_EXPIRED_ON_LAST_TRY.to_string(),
            attempts: self.attempt,
        };
        self.scheduled_at = None;
        self.record_attempt(claimed_at, now, Some(LEASE_EXPIRED_ON_LAST_TRY.to_string()));
        true
    }

    /// Revive a parked job with a fresh attempt budget.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempt = 0;
        self.scheduled_at = None;
        self.lease_until = None;
        self.updated_at = now;
    }

    fn record_attempt(
        &mut self,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        error: Option<String>,
    ) {
        self.history.push(JobAttemptRecord {
            attempt: self.attempt,
            started_at,
            finished_at,
            success: error.is_none(),
            error,
            duration_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        });
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_default()
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Success,
    /// Transient failure; retried per the job's policy
    Failure(String),
    /// Permanent failure; parked without further tries
    Fatal(String),
}

/// Number of jobs in each queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
}
