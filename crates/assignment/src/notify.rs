//! Notification port.
//!
//! Notifications are a side channel: callers go through `notify_best_effort`,
//! which logs failures and never returns them.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use dealerflow_core::{DealerId, UserId};

/// Who a notification is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Audience {
    User(UserId),
    Dealer(DealerId),
    /// Multicast to every admin.
    Admins,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub audience: Audience,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(audience: Audience, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            audience,
            title: title.into(),
            body: body.into(),
            data: serde_json::Value::Null,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Send and forget: a failure is logged, never propagated.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    if let Err(err) = notifier.send(&notification).await {
        warn!(
            audience = ?notification.audience,
            title = %notification.title,
            error = %err,
            "notification dropped"
        );
    }
}

/// Notifier that only logs. Used when no notification service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        debug!(audience = ?notification.audience, title = %notification.title, "notification (noop)");
        Ok(())
    }
}

/// In-memory notifier for tests/dev.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails (nothing is recorded).
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: true,
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing {
            return Err(NotifyError::Delivery("recording notifier set to fail".to_string()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}
