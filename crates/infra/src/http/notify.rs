//! HTTP client for the notification service.

use std::time::Duration;

use async_trait::async_trait;
use tracing::instrument;

use dealerflow_assignment::{Notification, Notifier, NotifyError};

use super::HttpClientError;

#[derive(Debug, Clone)]
pub struct HttpNotifier {
    base_url: String,
    client: reqwest::Client,
}

impl HttpNotifier {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, HttpClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpClientError::Build(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    fn notifications_url(&self) -> String {
        format!(
            "{}/notifications/v1/notifications",
            self.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[instrument(skip(self, notification), fields(audience = ?notification.audience), err)]
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.notifications_url())
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::Delivery(format!("notification service returned {status}: {body}")))
    }
}
