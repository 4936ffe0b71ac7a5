use serde::{Deserialize, Serialize};
use std::time::Duration;

use pulse_core::Timestamp;

/// 保留策略
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// 每条序列最多保留的点数
    pub max_points: Option<usize>,
    /// 相对最新点的最大时间跨度
    #[serde(default, with = "humantime_serde")]
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn unbounded() -> Self {
        Self {
            max_points: None,
            max_age: None,
        }
    }

    pub fn with_max_points(mut self, max_points: usize) -> Self {
        self.max_points = Some(max_points.max(1));
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub(crate) fn max_age_ms(&self) -> Option<i64> {
        self.max_age.map(|age| age.as_millis() as i64)
    }

    /// 早于该时间的点应被淘汰
    pub(crate) fn cutoff(&self, newest: Timestamp) -> Option<Timestamp> {
        self.max_age_ms().map(|age| newest.saturating_sub(age))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_points: Some(10_000),
            max_age: Some(Duration::from_secs(6 * 3600)),
        }
    }
}

/// 过期清理结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PurgeStats {
    pub removed_series: usize,
    pub remaining_series: usize,
}
