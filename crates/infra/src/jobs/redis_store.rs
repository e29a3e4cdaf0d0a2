//! Redis-backed job store (durable, shared between worker processes).
//!
//! ## Key layout (under a configurable prefix, default `dealerflow:queue`)
//!
//! - `{prefix}:jobs`: hash of job id to job document (JSON)
//! - `{prefix}:wait`: list of ready job ids (LPUSH on enqueue, RPOP on claim)
//! - `{prefix}:delayed`: sorted set of job ids scored by ready time (ms)
//! - `{prefix}:active`: sorted set of claimed job ids scored by lease deadline (ms)
//! - `{prefix}:completed`, `{prefix}:failed`: sorted sets scored by settle time (ms)
//!
//! Moves between sets are either Lua scripts or `MULTI/EXEC` pipelines, so a
//! job id is never in two sets at once.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use tracing::{debug, instrument, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobId, JobStatus, QueueCounts};

const DEFAULT_PREFIX: &str = "dealerflow:queue";

const ENQUEUE_SCRIPT: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], ARGV[2]) == 0 then
  return 0
end
if ARGV[3] == '' then
  redis.call('LPUSH', KEYS[2], ARGV[1])
else
  redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
end
return 1
"#;

// Promote due delayed jobs, then pop the oldest waiting job and lease it.
const CLAIM_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[3], '-inf', ARGV[1])
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[3], id)
  redis.call('LPUSH', KEYS[2], id)
end
while true do
  local id = redis.call('RPOP', KEYS[2])
  if not id then
    return false
  end
  local doc = redis.call('HGET', KEYS[1], id)
  if doc then
    redis.call('ZADD', KEYS[4], tonumber(ARGV[1]) + tonumber(ARGV[2]), id)
    return {id, doc}
  end
end
"#;

// Expired leases go to the claim end of the wait list, unless the expired try
// was the job's last; those are parked (or dropped with remove_on_fail).
const RECOVER_SCRIPT: &str = r#"
local stalled = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', '(' .. ARGV[1])
local requeued = {}
local parked = {}
for _, id in ipairs(stalled) do
  redis.call('ZREM', KEYS[2], id)
  local doc = redis.call('HGET', KEYS[1], id)
  if doc then
    local job = cjson.decode(doc)
    if job.attempt >= job.retry_policy.max_attempts then
      if job.remove_on_fail then
        redis.call('HDEL', KEYS[1], id)
      else
        redis.call('ZADD', KEYS[4], ARGV[1], id)
      end
      table.insert(parked, id)
    else
      redis.call('RPUSH', KEYS[3], id)
      table.insert(requeued, id)
    end
  end
end
return {requeued, parked}
"#;

const RETRY_FAILED_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
redis.call('LPUSH', KEYS[3], ARGV[1])
return 1
"#;

const REMOVE_FAILED_SCRIPT: &str = r#"
if redis.call('ZREM', KEYS[1], ARGV[1]) == 0 then
  return 0
end
redis.call('HDEL', KEYS[2], ARGV[1])
return 1
"#;

#[derive(Debug, Clone)]
struct QueueKeys {
    jobs: String,
    wait: String,
    delayed: String,
    active: String,
    completed: String,
    failed: String,
}

impl QueueKeys {
    fn new(prefix: &str) -> Self {
        Self {
            jobs: format!("{prefix}:jobs"),
            wait: format!("{prefix}:wait"),
            delayed: format!("{prefix}:delayed"),
            active: format!("{prefix}:active"),
            completed: format!("{prefix}:completed"),
            failed: format!("{prefix}:failed"),
        }
    }
}

#[derive(Clone)]
pub struct RedisJobStore {
    conn: MultiplexedConnection,
    keys: QueueKeys,
}

impl std::fmt::Debug for RedisJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisJobStore").field("keys", &self.keys).finish()
    }
}

fn storage(context: &str, err: impl std::fmt::Display) -> JobStoreError {
    JobStoreError::Storage(format!("{context}: {err}"))
}

fn encode(job: &Job) -> Result<String, JobStoreError> {
    serde_json::to_string(job).map_err(|e| storage("serialize job", e))
}

fn decode(doc: &str) -> Result<Job, JobStoreError> {
    serde_json::from_str(doc).map_err(|e| storage("deserialize job", e))
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl RedisJobStore {
    /// Connect to Redis.
    ///
    /// * `redis_url` - e.g. "redis://localhost:6379"
    /// * `prefix` - key prefix (default: "dealerflow:queue")
    pub async fn connect(
        redis_url: impl AsRef<str>,
        prefix: Option<String>,
    ) -> Result<Self, JobStoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| storage("open", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| storage("connect", e))?;
        let prefix = prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        Ok(Self {
            conn,
            keys: QueueKeys::new(&prefix),
        })
    }

    async fn load(&self, job_id: &str) -> Result<Option<Job>, JobStoreError> {
        let mut conn = self.conn.clone();
        let doc: Option<String> = conn
            .hget(&self.keys.jobs, job_id)
            .await
            .map_err(|e| storage("HGET", e))?;
        doc.as_deref().map(decode).transpose()
    }

    async fn store(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(&self.keys.jobs, job.id.to_string(), encode(job)?)
            .await
            .map_err(|e| storage("HSET", e))?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id, kind = job.kind.type_name()), err)]
    async fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut conn = self.conn.clone();
        let ready_ms = match (&job.status, job.scheduled_at) {
            (JobStatus::Delayed, Some(at)) => at.timestamp_millis().to_string(),
            _ => String::new(),
        };

        let added: i64 = redis::Script::new(ENQUEUE_SCRIPT)
            .key(&self.keys.jobs)
            .key(&self.keys.wait)
            .key(&self.keys.delayed)
            .arg(job.id.to_string())
            .arg(encode(&job)?)
            .arg(ready_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| storage("enqueue script", e))?;

        if added == 0 {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        Ok(job.id)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<Job>, JobStoreError> {
        self.load(&job_id.to_string()).await
    }

    async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, JobStoreError> {
        let mut conn = self.conn.clone();
        let claimed: Option<(String, String)> = redis::Script::new(CLAIM_SCRIPT)
            .key(&self.keys.jobs)
            .key(&self.keys.wait)
            .key(&self.keys.delayed)
            .key(&self.keys.active)
            .arg(now_ms())
            .arg(lease.as_millis() as i64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| storage("claim script", e))?;

        let Some((id, doc)) = claimed else {
            return Ok(None);
        };

        let mut job = decode(&doc)?;
        job.mark_running(lease, Utc::now());
        self.store(&job).await?;
        debug!(job_id = %id, attempt = job.attempt, "claimed job");
        Ok(Some(job))
    }

    async fn extend_lease(&self, job_id: JobId, lease: Duration) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        let deadline = now_ms() + lease.as_millis() as i64;
        let _: i64 = redis::cmd("ZADD")
            .arg(&self.keys.active)
            .arg("XX")
            .arg(deadline)
            .arg(job_id.to_string())
            .query_async(&mut conn)
            .await
            .map_err(|e| storage("ZADD XX", e))?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn complete(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        let id = job.id.to_string();
        let mut pipe = redis::pipe();
        pipe.atomic().zrem(&self.keys.active, &id).ignore();
        if job.remove_on_complete {
            pipe.hdel(&self.keys.jobs, &id).ignore();
        } else {
            pipe.hset(&self.keys.jobs, &id, encode(job)?)
                .ignore()
                .zadd(&self.keys.completed, &id, now_ms())
                .ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| storage("complete", e))?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn schedule_retry(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        let id = job.id.to_string();
        let ready_ms = job
            .scheduled_at
            .map(|at| at.timestamp_millis())
            .unwrap_or_else(now_ms);
        let _: () = redis::pipe()
            .atomic()
            .zrem(&self.keys.active, &id)
            .ignore()
            .hset(&self.keys.jobs, &id, encode(job)?)
            .ignore()
            .zadd(&self.keys.delayed, &id, ready_ms)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| storage("schedule retry", e))?;
        Ok(())
    }

    #[instrument(skip(self, job), fields(job_id = %job.id), err)]
    async fn fail(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        let id = job.id.to_string();
        let mut pipe = redis::pipe();
        pipe.atomic().zrem(&self.keys.active, &id).ignore();
        if job.remove_on_fail {
            pipe.hdel(&self.keys.jobs, &id).ignore();
        } else {
            pipe.hset(&self.keys.jobs, &id, encode(job)?)
                .ignore()
                .zadd(&self.keys.failed, &id, now_ms())
                .ignore();
        }
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| storage("fail", e))?;
        Ok(())
    }

    async fn recover_stalled(&self) -> Result<usize, JobStoreError> {
        let mut conn = self.conn.clone();
        let (requeued, parked): (Vec<String>, Vec<String>) = redis::Script::new(RECOVER_SCRIPT)
            .key(&self.keys.jobs)
            .key(&self.keys.active)
            .key(&self.keys.wait)
            .key(&self.keys.failed)
            .arg(now_ms())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| storage("recover script", e))?;

        let now = Utc::now();
        for id in &requeued {
            warn!(job_id = %id, "lease expired, job returned to wait list");
        }
        for id in &parked {
            warn!(job_id = %id, "lease expired on final attempt, job parked");
        }
        for id in requeued.iter().chain(&parked) {
            if let Some(mut job) = self.load(id).await? {
                job.mark_stalled(now);
                self.store(&job).await?;
            }
        }
        Ok(requeued.len() + parked.len())
    }

    async fn list_failed(&self, limit: usize) -> Result<Vec<Job>, JobStoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .zrange(&self.keys.failed, 0, limit as isize - 1)
            .await
            .map_err(|e| storage("ZRANGE", e))?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let docs: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(&self.keys.jobs)
            .arg(&ids)
            .query_async(&mut conn)
            .await
            .map_err(|e| storage("HMGET", e))?;

        docs.into_iter().flatten().map(|doc| decode(&doc)).collect()
    }

    async fn retry_failed(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        let id = job_id.to_string();
        let mut job = self.load(&id).await?.ok_or(JobStoreError::NotFound(job_id))?;
        job.reset_for_retry(Utc::now());

        let mut conn = self.conn.clone();
        let moved: i64 = redis::Script::new(RETRY_FAILED_SCRIPT)
            .key(&self.keys.failed)
            .key(&self.keys.jobs)
            .key(&self.keys.wait)
            .arg(&id)
            .arg(encode(&job)?)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| storage("retry script", e))?;

        if moved == 0 {
            return Err(JobStoreError::NotFailed(job_id));
        }
        Ok(job)
    }

    async fn remove_failed(&self, job_id: JobId) -> Result<(), JobStoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = redis::Script::new(REMOVE_FAILED_SCRIPT)
            .key(&self.keys.failed)
            .key(&self.keys.jobs)
            .arg(job_id.to_string())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| storage("remove script", e))?;

        if removed == 0 {
            return Err(JobStoreError::NotFound(job_id));
        }
        Ok(())
    }

    async fn counts(&self) -> Result<QueueCounts, JobStoreError> {
        let mut conn = self.conn.clone();
        let (waiting, active, delayed, completed, failed): (u64, u64, u64, u64, u64) =
            redis::pipe()
                .llen(&self.keys.wait)
                .zcard(&self.keys.active)
                .zcard(&self.keys.delayed)
                .zcard(&self.keys.completed)
                .zcard(&self.keys.failed)
                .query_async(&mut conn)
                .await
                .map_err(|e| storage("counts", e))?;

        Ok(QueueCounts {
            waiting,
            active,
            delayed,
            completed,
            failed,
        })
    }
}

#[cfg(test)]
mod tests {
    //! These run only when `REDIS_URL` points at a live Redis.

    use super::*;
    use crate::jobs::types::{EnqueueOptions, JobKind, RetryPolicy, LEASE_EXPIRED_ON_LAST_TRY};

    const LEASE: Duration = Duration::from_secs(30);

    async fn store() -> Option<RedisJobStore> {
        let url = std::env::var("REDIS_URL").ok()?;
        let prefix = format!("dealerflow:test:{}", uuid::Uuid::now_v7());
        Some(RedisJobStore::connect(url, Some(prefix)).await.unwrap())
    }

    fn job() -> Job {
        Job::new(
            JobKind::DealerAssignment,
            serde_json::json!({"order_id": "ORD-1"}),
            EnqueueOptions::dealer_assignment(),
        )
    }

    #[tokio::test]
    async fn claim_moves_job_to_active() {
        let Some(store) = store().await else { return };

        let id = store.enqueue(job()).await.unwrap();
        assert_eq!(store.counts().await.unwrap().waiting, 1);

        let claimed = store.claim_next(LEASE).await.unwrap().unwrap();
        assert_eq!(claimed.id, id);
        assert_eq!(claimed.attempt, 1);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.waiting, 0);
        assert_eq!(counts.active, 1);
        assert!(store.claim_next(LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_job_is_retained_and_replayable() {
        let Some(store) = store().await else { return };

        store.enqueue(job()).await.unwrap();
        let mut claimed = store.claim_next(LEASE).await.unwrap().unwrap();
        claimed.mark_failed("order missing".to_string(), Utc::now());
        store.fail(&claimed).await.unwrap();

        let failed = store.list_failed(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(matches!(failed[0].status, JobStatus::Failed { .. }));

        store.retry_failed(claimed.id).await.unwrap();
        assert!(matches!(
            store.retry_failed(claimed.id).await,
            Err(JobStoreError::NotFailed(_))
        ));
        let again = store.claim_next(LEASE).await.unwrap().unwrap();
        assert_eq!(again.attempt, 1);
    }

    #[tokio::test]
    async fn completed_job_document_is_removed() {
        let Some(store) = store().await else { return };

        store.enqueue(job()).await.unwrap();
        let mut claimed = store.claim_next(LEASE).await.unwrap().unwrap();
        claimed.mark_completed(Utc::now());
        store.complete(&claimed).await.unwrap();

        assert!(store.get(claimed.id).await.unwrap().is_none());
        assert_eq!(store.counts().await.unwrap(), QueueCounts::default());
    }

    #[tokio::test]
    async fn expired_lease_is_recovered() {
        let Some(store) = store().await else { return };

        store.enqueue(job()).await.unwrap();
        store.claim_next(Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.recover_stalled().await.unwrap(), 1);
        let again = store.claim_next(LEASE).await.unwrap().unwrap();
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn expired_lease_on_last_try_parks_the_job() {
        let Some(store) = store().await else { return };

        let job = Job::new(
            JobKind::DealerAssignment,
            serde_json::json!({"order_id": "ORD-1"}),
            EnqueueOptions::default().with_retry(RetryPolicy::no_retry()),
        );
        let id = store.enqueue(job).await.unwrap();
        store.claim_next(Duration::ZERO).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(store.recover_stalled().await.unwrap(), 1);
        assert!(store.claim_next(LEASE).await.unwrap().is_none());
        let parked = store.get(id).await.unwrap().unwrap();
        assert_eq!(
            parked.status,
            JobStatus::Failed {
                error: LEASE_EXPIRED_ON_LAST_TRY.to_string(),
                attempts: 1,
            }
        );
        assert_eq!(store.list_failed(10).await.unwrap().len(), 1);
    }
}
