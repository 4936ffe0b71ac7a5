//! 告警管理：去重、分发队列、重试与通知渠道

pub mod manager;
pub mod notification;
pub mod notifier;
pub mod retry;

pub use manager::{AlertManager, AlertManagerConfig};
pub use notification::Notification;
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use retry::{deliver_with_retry, RetryPolicy};
