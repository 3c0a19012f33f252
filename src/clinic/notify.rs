use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    TaskAssigned,
    TaskCompleted,
}

impl NotificationTemplate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TaskAssigned => "task_assigned",
            Self::TaskCompleted => "task_completed",
        }
    }
}

/// Role-targeted email request: a template, one recipient and the values the
/// template interpolates (`patientName`, `doctorName`, `reportId`, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "templateName")]
    pub template: NotificationTemplate,
    #[serde(rename = "recipientEmail")]
    pub recipient: String,
    #[serde(rename = "templateData")]
    pub data: BTreeMap<String, String>,
}

impl Notification {
    pub fn new(template: NotificationTemplate, recipient: impl Into<String>) -> Self {
        Self {
            template,
            recipient: recipient.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("notification endpoint returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of delivering them.
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            template = notification.template.as_str(),
            recipient = %notification.recipient,
            data = ?notification.data,
            "notification"
        );
        Ok(())
    }
}

/// POSTs each notification as JSON to an email-sending endpoint.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status { status, body });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_serializes_email_request_shape() {
        let notification = Notification::new(NotificationTemplate::TaskCompleted, "p@example.com")
            .with("reportId", "task-1")
            .with("doctorName", "Dr. Grey");
        let value = serde_json::to_value(&notification).unwrap();
        assert_eq!(value["templateName"], "task_completed");
        assert_eq!(value["recipientEmail"], "p@example.com");
        assert_eq!(value["templateData"]["reportId"], "task-1");
    }
}
