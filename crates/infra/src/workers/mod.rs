//! Background workers hosted by the worker binary (and by the API in dev mode).

use std::sync::Arc;

use dealerflow_assignment::AssignmentEngine;

use crate::config::AppConfig;
use crate::jobs::{JobExecutor, JobExecutorConfig, JobExecutorHandle, JobStore, DEALER_ASSIGNMENT};

pub mod assignment_worker;

pub use assignment_worker::{enqueue_dealer_assignment, AssignmentJobHandler, DealerAssignmentPayload};

/// Start the dealer assignment consumer on the current runtime.
pub fn spawn_assignment_worker(
    jobs: Arc<dyn JobStore>,
    engine: Arc<AssignmentEngine>,
    config: &AppConfig,
) -> JobExecutorHandle {
    let mut executor = JobExecutor::new(jobs);
    executor.register_handler(DEALER_ASSIGNMENT, Arc::new(AssignmentJobHandler::new(engine)));

    let executor_config = JobExecutorConfig::default()
        .with_name(DEALER_ASSIGNMENT)
        .with_max_concurrent(config.worker_concurrency)
        .with_poll_interval(config.worker_poll_interval)
        .with_lease(config.job_lease);

    executor.spawn(executor_config)
}
