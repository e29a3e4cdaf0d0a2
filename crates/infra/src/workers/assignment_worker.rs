//! Job handler that runs the dealer assignment engine.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use dealerflow_assignment::{AssignmentEngine, AssignmentError};
use dealerflow_core::OrderId;

use crate::jobs::{
    EnqueueOptions, Job, JobHandler, JobId, JobKind, JobResult, JobStore, JobStoreError,
};

/// Payload of a `dealer-assignment` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealerAssignmentPayload {
    #[serde(alias = "orderId")]
    pub order_id: OrderId,
}

/// Queue a dealer assignment run for `order_id` with the standard policy.
pub async fn enqueue_dealer_assignment(
    store: &dyn JobStore,
    order_id: &OrderId,
) -> Result<JobId, JobStoreError> {
    let payload = DealerAssignmentPayload {
        order_id: order_id.clone(),
    };
    let payload = serde_json::to_value(payload)
        .map_err(|e| JobStoreError::Storage(format!("serialize payload: {e}")))?;
    store
        .enqueue(Job::new(
            JobKind::DealerAssignment,
            payload,
            EnqueueOptions::dealer_assignment(),
        ))
        .await
}

pub struct AssignmentJobHandler {
    engine: Arc<AssignmentEngine>,
}

impl AssignmentJobHandler {
    pub fn new(engine: Arc<AssignmentEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl JobHandler for AssignmentJobHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let payload: DealerAssignmentPayload = match serde_json::from_value(job.payload.clone()) {
            Ok(p) => p,
            Err(e) => return JobResult::Fatal(format!("invalid dealer-assignment payload: {e}")),
        };

        match self.engine.assign(&payload.order_id).await {
            Ok(report) => {
                info!(
                    job_id = %job.id,
                    order_id = %report.order_id,
                    status = report.status.as_str(),
                    assigned = report.assigned.len(),
                    unassigned = report.unassigned.len(),
                    "dealer assignment finished"
                );
                JobResult::Success
            }
            Err(err) if err.is_permanent() => JobResult::Fatal(err.to_string()),
            Err(err @ AssignmentError::Store(_)) => {
                warn!(job_id = %job.id, order_id = %payload.order_id, error = %err, "dealer assignment will be retried");
                JobResult::Failure(err.to_string())
            }
            Err(err) => JobResult::Failure(err.to_string()),
        }
    }
}
