use serde::{Deserialize, Serialize};

use dealerflow_infra::jobs::{Job, JobId, JobStatus};

/// Gateway webhook envelope. Only the fields the trigger reads are modeled.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub payload: Option<WebhookPayload>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub payment: Option<PaymentWrapper>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentWrapper {
    pub entity: PaymentEntity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub amount: u64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub notes: serde_json::Value,
}

impl WebhookEvent {
    pub const PAYMENT_CAPTURED: &'static str = "payment.captured";

    pub fn payment(&self) -> Option<&PaymentEntity> {
        self.payload.as_ref()?.payment.as_ref().map(|p| &p.entity)
    }
}

#[derive(Debug, Deserialize)]
pub struct FailedJobsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct FailedJobDto {
    pub job_id: JobId,
    pub kind: String,
    pub payload: serde_json::Value,
    pub attempts: u32,
    pub error: Option<String>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Job> for FailedJobDto {
    fn from(job: Job) -> Self {
        let error = match &job.status {
            JobStatus::Failed { error, .. } => Some(error.clone()),
            _ => job.history.last().and_then(|r| r.error.clone()),
        };
        Self {
            job_id: job.id,
            kind: job.kind.type_name().to_string(),
            payload: job.payload,
            attempts: job.attempt,
            error,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EnqueuedDto {
    pub job_id: JobId,
}
