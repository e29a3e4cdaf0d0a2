//! Dealer assignment worker process. Replicas may run side by side against
//! the same Redis queue.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use dealerflow_infra::config::AppConfig;
use dealerflow_infra::runtime::{self, Stores};
use dealerflow_infra::workers::spawn_assignment_worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dealerflow_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    if !config.use_persistent_stores {
        warn!("in-memory stores: this worker only sees jobs enqueued in its own process");
    }

    let stores = Stores::from_config(&config)
        .await
        .context("failed to connect stores")?;
    let notifier = runtime::build_notifier(&config)?;
    let engine = runtime::build_engine(&config, stores.orders.clone(), notifier)?;

    let handle = spawn_assignment_worker(stores.jobs.clone(), Arc::new(engine), &config);
    info!(concurrency = config.worker_concurrency, "dealer assignment worker started");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown requested; draining in-flight jobs");

    handle.shutdown().await;
    info!("worker stopped");
    Ok(())
}
