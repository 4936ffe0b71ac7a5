use serde::Serialize;

use pulse_core::sample::value_format;
use pulse_core::{Labels, Timestamp};

/// 规则实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Inactive,
    Pending,
    Firing,
}

/// 一次观测引起的状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// 无变化（含 PENDING 持续中）
    Unchanged,
    /// INACTIVE -> PENDING
    Pending,
    /// -> FIRING
    Fired,
    /// FIRING -> FIRING
    Refreshed,
    /// PENDING -> INACTIVE，计时清零
    Reset,
    /// FIRING -> INACTIVE
    Resolved,
}

/// 规则在一组标签上的实例
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleInstance {
    pub labels: Labels,
    pub state: InstanceState,
    /// 条件首次为真的时刻
    pub active_since: Option<Timestamp>,
    pub fired_at: Option<Timestamp>,
    pub last_seen: Timestamp,
    #[serde(with = "value_format")]
    pub last_value: f64,
}

impl RuleInstance {
    pub fn new(labels: Labels) -> Self {
        Self {
            labels,
            state: InstanceState::Inactive,
            active_since: None,
            fired_at: None,
            last_seen: 0,
            last_value: f64::NAN,
        }
    }

    /// 条件为真；`for_ms` 从首次为真的评估时刻起算
    pub fn observe_true(&mut self, now: Timestamp, value: f64, for_ms: i64) -> Transition {
        self.last_seen = now;
        self.last_value = value;

        match self.state {
            InstanceState::Inactive => {
                self.active_since = Some(now);
                if for_ms <= 0 {
                    self.fire(now)
                } else {
                    self.state = InstanceState::Pending;
                    Transition::Pending
                }
            }
            InstanceState::Pending => {
                let since = self.active_since.unwrap_or(now);
                if now - since >= for_ms {
                    self.fire(now)
                } else {
                    Transition::Unchanged
                }
            }
            InstanceState::Firing => Transition::Refreshed,
        }
    }

    /// 条件为假
    pub fn observe_false(&mut self) -> Transition {
        let transition = match self.state {
            InstanceState::Inactive => return Transition::Unchanged,
            InstanceState::Pending => Transition::Reset,
            InstanceState::Firing => Transition::Resolved,
        };
        self.state = InstanceState::Inactive;
        self.active_since = None;
        transition
    }

    pub fn is_firing(&self) -> bool {
        self.state == InstanceState::Firing
    }

    fn fire(&mut self, now: Timestamp) -> Transition {
        self.state = InstanceState::Firing;
        self.fired_at = Some(now);
        Transition::Fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOR_MS: i64 = 30_000;

    #[test]
    fn test_pending_then_firing_at_exact_for() {
        let mut instance = RuleInstance::new(Labels::new());
        assert_eq!(instance.observe_true(0, 1.0, FOR_MS), Transition::Pending);
        assert_eq!(instance.observe_true(15_000, 1.0, FOR_MS), Transition::Unchanged);
        assert_eq!(instance.state, InstanceState::Pending);
        // 恰好满足 for 的那次评估触发
        assert_eq!(instance.observe_true(30_000, 1.0, FOR_MS), Transition::Fired);
        assert_eq!(instance.fired_at, Some(30_000));
        assert_eq!(instance.observe_true(45_000, 2.0, FOR_MS), Transition::Refreshed);
        assert_eq!(instance.last_value, 2.0);
        assert_eq!(instance.observe_false(), Transition::Resolved);
        assert_eq!(instance.state, InstanceState::Inactive);
    }

    #[test]
    fn test_false_while_pending_restarts_timer() {
        let mut instance = RuleInstance::new(Labels::new());
        instance.observe_true(0, 1.0, FOR_MS);
        assert_eq!(instance.observe_false(), Transition::Reset);
        assert_eq!(instance.observe_true(20_000, 1.0, FOR_MS), Transition::Pending);
        assert_eq!(instance.observe_true(40_000, 1.0, FOR_MS), Transition::Unchanged);
        assert_eq!(instance.observe_true(50_000, 1.0, FOR_MS), Transition::Fired);
    }

    #[test]
    fn test_zero_for_fires_immediately() {
        let mut instance = RuleInstance::new(Labels::new());
        assert_eq!(instance.observe_true(0, 1.0, 0), Transition::Fired);
        assert!(instance.is_firing());
        assert_eq!(RuleInstance::new(Labels::new()).observe_false(), Transition::Unchanged);
    }
}
