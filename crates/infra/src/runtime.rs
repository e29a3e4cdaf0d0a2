//! Builds the stores and collaborators a process needs from `AppConfig`.

use std::sync::Arc;

use tracing::info;

use dealerflow_assignment::{AssignmentEngine, NoopNotifier, Notifier};
use dealerflow_orders::{
    CartStore, InMemoryCartStore, InMemoryOrderStore, OrderStore, StoreError,
};

use crate::config::AppConfig;
use crate::http::{HttpClientError, HttpInventoryClient, HttpNotifier};
use crate::jobs::{InMemoryJobStore, JobStore, JobStoreError};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] JobStoreError),
    #[error(transparent)]
    Http(#[from] HttpClientError),
    #[error("persistent stores need the `redis` feature")]
    RedisDisabled,
}

/// Order, cart and job stores shared by the trigger and the worker.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub carts: Arc<dyn CartStore>,
    pub jobs: Arc<dyn JobStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(InMemoryOrderStore::new()),
            carts: Arc::new(InMemoryCartStore::new()),
            jobs: Arc::new(InMemoryJobStore::new()),
        }
    }

    /// In-memory or Postgres + Redis, per `USE_PERSISTENT_STORES`.
    pub async fn from_config(config: &AppConfig) -> Result<Self, RuntimeError> {
        if !config.use_persistent_stores {
            info!("using in-memory stores");
            return Ok(Self::in_memory());
        }
        Self::persistent(config).await
    }

    #[cfg(feature = "redis")]
    async fn persistent(config: &AppConfig) -> Result<Self, RuntimeError> {
        use crate::db::{self, PostgresCartStore, PostgresOrderStore};
        use crate::jobs::RedisJobStore;

        let database_url = config.database_url.as_deref().unwrap_or_default();
        let pool = db::connect(database_url).await?;
        db::ensure_schema(&pool).await?;
        let jobs = RedisJobStore::connect(&config.redis_url, Some(config.queue_prefix.clone())).await?;
        info!(queue_prefix = %config.queue_prefix, "using postgres + redis stores");

        Ok(Self {
            orders: Arc::new(PostgresOrderStore::new(pool.clone())),
            carts: Arc::new(PostgresCartStore::new(pool)),
            jobs: Arc::new(jobs),
        })
    }

    #[cfg(not(feature = "redis"))]
    async fn persistent(_config: &AppConfig) -> Result<Self, RuntimeError> {
        Err(RuntimeError::RedisDisabled)
    }
}

/// The configured notifier: HTTP when a base URL is set, log-only otherwise.
pub fn build_notifier(config: &AppConfig) -> Result<Arc<dyn Notifier>, RuntimeError> {
    match &config.notification_base_url {
        Some(base) => Ok(Arc::new(HttpNotifier::new(base.clone(), config.http_timeout)?)),
        None => {
            info!("NOTIFICATION_BASE_URL not set; notifications are logged only");
            Ok(Arc::new(NoopNotifier))
        }
    }
}

/// Assignment engine wired to the HTTP inventory service.
pub fn build_engine(
    config: &AppConfig,
    orders: Arc<dyn OrderStore>,
    notifier: Arc<dyn Notifier>,
) -> Result<AssignmentEngine, RuntimeError> {
    let inventory = HttpInventoryClient::new(config.inventory_base_url.clone(), config.http_timeout)?;
    Ok(AssignmentEngine::new(orders, Arc::new(inventory), notifier))
}
