use std::sync::Arc;

use dealerflow_assignment::Notifier;
use dealerflow_infra::config::AppConfig;
use dealerflow_infra::runtime::{self, RuntimeError, Stores};

/// Everything a request handler needs, shared behind an `Arc`.
pub struct AppServices {
    pub stores: Stores,
    pub notifier: Arc<dyn Notifier>,
    pub webhook_secret: String,
    pub admin_token: String,
}

impl AppServices {
    pub fn new(
        stores: Stores,
        notifier: Arc<dyn Notifier>,
        webhook_secret: impl Into<String>,
        admin_token: impl Into<String>,
    ) -> Self {
        Self {
            stores,
            notifier,
            webhook_secret: webhook_secret.into(),
            admin_token: admin_token.into(),
        }
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self, RuntimeError> {
        let stores = Stores::from_config(config).await?;
        let notifier = runtime::build_notifier(config)?;
        Ok(Self::new(
            stores,
            notifier,
            config.payment_webhook_secret.clone(),
            config.admin_token.clone(),
        ))
    }
}
