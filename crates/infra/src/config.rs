//! Configuration loading and representation.
//!
//! Everything comes from environment variables. Unset values fall back to dev
//! defaults; insecure defaults are logged.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be set")]
    Missing { name: &'static str },
    #[error("{name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Postgres + Redis when true, in-memory stores otherwise.
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub redis_url: String,
    pub queue_prefix: String,
    pub inventory_base_url: String,
    /// No notification service means notifications are only logged.
    pub notification_base_url: Option<String>,
    pub http_timeout: Duration,
    pub payment_webhook_secret: String,
    pub admin_token: String,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub job_lease: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let use_persistent_stores = parse_or(&get, "USE_PERSISTENT_STORES", false)?;
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing {
                name: "DATABASE_URL",
            });
        }

        let payment_webhook_secret = get("PAYMENT_WEBHOOK_SECRET").unwrap_or_else(|| {
            warn!("PAYMENT_WEBHOOK_SECRET not set; using insecure dev default");
            "dev-webhook-secret".to_string()
        });
        let admin_token = get("ADMIN_TOKEN").unwrap_or_else(|| {
            warn!("ADMIN_TOKEN not set; using insecure dev default");
            "dev-admin-token".to_string()
        });

        let worker_concurrency: usize = parse_or(&get, "WORKER_CONCURRENCY", 4)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_CONCURRENCY",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            bind_addr: parse_or(&get, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            use_persistent_stores,
            database_url,
            redis_url: get("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            queue_prefix: get("QUEUE_PREFIX").unwrap_or_else(|| "dealerflow:queue".to_string()),
            inventory_base_url: get("INVENTORY_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3001".to_string()),
            notification_base_url: get("NOTIFICATION_BASE_URL"),
            http_timeout: Duration::from_millis(parse_or(&get, "HTTP_TIMEOUT_MS", 5000)?),
            payment_webhook_secret,
            admin_token,
            worker_concurrency,
            worker_poll_interval: Duration::from_millis(parse_or(&get, "WORKER_POLL_INTERVAL_MS", 250)?),
            job_lease: Duration::from_secs(parse_or(&get, "JOB_LEASE_SECS", 30)?),
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            name,
            reason: e.to_string(),
            value,
        }),
    }
}
