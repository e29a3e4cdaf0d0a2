use std::sync::Arc;

use anyhow::Context;

use dealerflow_api::app::{self, AppServices};
use dealerflow_infra::config::AppConfig;
use dealerflow_infra::runtime;
use dealerflow_infra::workers::spawn_assignment_worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dealerflow_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        AppServices::from_config(&config)
            .await
            .context("failed to build services")?,
    );

    // With in-memory stores the queue lives in this process, so the worker has to as well.
    let worker = if config.use_persistent_stores {
        None
    } else {
        let engine = runtime::build_engine(
            &config,
            services.stores.orders.clone(),
            services.notifier.clone(),
        )?;
        tracing::info!("running embedded dealer assignment worker");
        Some(spawn_assignment_worker(
            services.stores.jobs.clone(),
            Arc::new(engine),
            &config,
        ))
    };

    let app = app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;

    if let Some(worker) = worker {
        worker.shutdown().await;
    }
    Ok(())
}
