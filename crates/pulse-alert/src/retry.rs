use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use pulse_core::NotifyError;

use crate::notification::Notification;
use crate::notifier::Notifier;

/// 通知重试策略：指数退避，延迟与次数均有上限
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 总尝试次数（含首次）
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,

    pub backoff_factor: u32,

    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,

    /// 单次尝试超时
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            backoff_factor: 2,
            max_backoff: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次失败（从 1 开始）之后的等待时间
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1).saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// 按策略投递一条通知，成功时返回所用的尝试次数
pub async fn deliver_with_retry(
    notifier: &dyn Notifier,
    notification: &Notification,
    policy: &RetryPolicy,
) -> Result<u32, NotifyError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.timeout, notifier.notify(notification)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::Timeout(policy.timeout)),
        };

        match result {
            Ok(()) => {
                debug!(notifier = notifier.name(), attempt, "Notification delivered");
                return Ok(attempt);
            }
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = policy.backoff_delay(attempt);
                warn!(
                    notifier = notifier.name(),
                    attempt,
                    error = %e,
                    retry_in = ?delay,
                    "Notification failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            ..Default::default()
        };
        let delays: Vec<u128> = (1..=6).map(|a| policy.backoff_delay(a).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
        assert_eq!(policy.backoff_delay(200), Duration::from_millis(1000));
    }
}
