use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use pulse_core::sample::value_format;
use pulse_core::{Alert, AlertState, Labels, Severity, Timestamp};

/// 通知载荷
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub rule_name: String,
    pub labels: Labels,
    pub annotations: BTreeMap<String, String>,
    pub severity: Severity,
    pub state: AlertState,
    #[serde(with = "value_format")]
    pub value: f64,
    pub fired_at: Timestamp,
    /// 触发或解决的时刻
    pub timestamp: Timestamp,
}

impl Notification {
    pub fn from_alert(alert: &Alert) -> Self {
        let state = alert.state();
        let timestamp = match state {
            AlertState::Firing => alert.fired_at,
            AlertState::Resolved => alert.resolved_at.unwrap_or(alert.last_seen),
        };
        Self {
            rule_name: alert.rule_name.clone(),
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
            severity: alert.severity,
            state,
            value: alert.value,
            fired_at: alert.fired_at,
            timestamp,
        }
    }

    pub fn fingerprint(&self) -> String {
        pulse_core::alert_fingerprint(&self.rule_name, &self.labels)
    }

    /// 单行摘要，供日志使用
    pub fn summary(&self) -> String {
        let state = match self.state {
            AlertState::Firing => "FIRING",
            AlertState::Resolved => "RESOLVED",
        };
        match self.annotations.get("summary") {
            Some(summary) => format!("[{}] {} {}: {}", state, self.rule_name, self.labels, summary),
            None => format!("[{}] {} {}", state, self.rule_name, self.labels),
        }
    }
}
