use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

use pulse_core::{AlertState, NotifyError, Severity};

use crate::notification::Notification;

/// 通知器 trait
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 发送一条通知
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;

    /// 通知器名称
    fn name(&self) -> &str;

    /// 低于该级别的告警不发送
    fn min_severity(&self) -> Severity {
        Severity::Info
    }
}

/// Webhook 通知：JSON POST
pub struct WebhookNotifier {
    name: String,
    url: String,
    headers: BTreeMap<String, String>,
    min_severity: Severity,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(name: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pulse/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            min_severity: Severity::Info,
            client,
        })
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .json(notification)
            .send()
            .await
            .map_err(|e| NotifyError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn min_severity(&self) -> Severity {
        self.min_severity
    }
}

/// 日志通知：写入 tracing
pub struct LogNotifier {
    min_severity: Severity,
}

impl LogNotifier {
    pub fn new(min_severity: Severity) -> Self {
        Self { min_severity }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(Severity::Info)
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        match notification.state {
            AlertState::Firing => warn!(
                rule = %notification.rule_name,
                severity = %notification.severity,
                labels = %notification.labels,
                "{}",
                notification.summary()
            ),
            AlertState::Resolved => info!(
                rule = %notification.rule_name,
                severity = %notification.severity,
                labels = %notification.labels,
                "{}",
                notification.summary()
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }

    fn min_severity(&self) -> Severity {
        self.min_severity
    }
}
