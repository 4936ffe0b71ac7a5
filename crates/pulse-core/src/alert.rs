use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::labels::Labels;
use crate::sample::value_format;
use crate::Timestamp;

/// 告警级别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    #[default]
    Warning,
    Critical,
}

impl FromStr for Severity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(ConfigError::Invalid(format!("unknown severity '{}'", other))),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// 告警状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Firing,
    Resolved,
}

/// 告警实例：某条规则在一组标签上的触发
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub rule_name: String,
    pub labels: Labels,
    pub annotations: BTreeMap<String, String>,
    pub severity: Severity,
    #[serde(with = "value_format")]
    pub value: f64,
    pub fired_at: Timestamp,
    pub last_seen: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

impl Alert {
    pub fn fingerprint(&self) -> String {
        alert_fingerprint(&self.rule_name, &self.labels)
    }

    pub fn state(&self) -> AlertState {
        if self.resolved_at.is_some() {
            AlertState::Resolved
        } else {
            AlertState::Firing
        }
    }

    pub fn resolve(&mut self, at: Timestamp) {
        self.resolved_at = Some(at);
    }
}

/// 告警指纹：规则名 + 排序后的标签
pub fn alert_fingerprint(rule_name: &str, labels: &Labels) -> String {
    format!("{}:{}", rule_name, labels.fingerprint())
}

/// 规则评估产生的状态变化
#[derive(Debug, Clone, PartialEq)]
pub enum AlertEvent {
    /// PENDING -> FIRING
    Firing(Alert),
    /// FIRING -> INACTIVE
    Resolved(Alert),
    /// FIRING -> FIRING，仅刷新 last_seen
    Refresh {
        fingerprint: String,
        last_seen: Timestamp,
        value: f64,
    },
}

impl AlertEvent {
    pub fn fingerprint(&self) -> String {
        match self {
            AlertEvent::Firing(alert) | AlertEvent::Resolved(alert) => alert.fingerprint(),
            AlertEvent::Refresh { fingerprint, .. } => fingerprint.clone(),
        }
    }
}

/// 告警事件接收方，调用不得阻塞
pub trait AlertEventSink: Send + Sync {
    fn submit(&self, events: Vec<AlertEvent>);
}
