//! Background job queue with retry, backoff, leases and a failed set.
//!
//! ## Design
//!
//! - Jobs are typed by `JobKind` and routed to a registered `JobHandler`
//! - Retry policy with exponential backoff, counted in total tries
//! - Claimed jobs carry a lease; expired leases are swept back to the wait list
//!   (at-least-once delivery)
//! - Jobs that exhaust their tries (or fail fatally) are parked in the failed
//!   set for inspection and manual replay
//!
//! ## Components
//!
//! - `Job`: core job abstraction with payload and metadata
//! - `JobStore`: persistence (`InMemoryJobStore`, `RedisJobStore` behind the `redis` feature)
//! - `JobExecutor`: claim loops that run handlers and apply retry policy

pub mod executor;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;
pub mod types;

pub use executor::{
    handler_fn, ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler,
    JobOutcome, QueueEvent,
};
#[cfg(feature = "redis")]
pub use redis_store::RedisJobStore;
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use types::{
    BackoffStrategy, EnqueueOptions, Job, JobAttemptRecord, JobId, JobKind, JobResult, JobStatus,
    QueueCounts, RetryPolicy, DEALER_ASSIGNMENT, LEASE_EXPIRED_ON_LAST_TRY,
};
