use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info};

use pulse_core::{
    Alert, AlertEvent, ErrorSink, EvaluationError, Labels, LogSink, PipelineError, Severity, Timestamp,
    ALERT_NAME_LABEL,
};
use pulse_metrics::PipelineMetrics;
use pulse_tsdb::TimeSeriesStore;

use crate::expr::{evaluate, EvalContext, Value};
use crate::model::{Rule, RuleGroup, RuleSet};
use crate::state::{InstanceState, RuleInstance, Transition};
use crate::template;

/// 默认即时选择器回看窗口
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(300);

/// 规则健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleHealth {
    Unknown,
    Ok,
    Err,
}

/// 规则状态快照（供 API 使用）
#[derive(Debug, Clone, Serialize)]
pub struct RuleStatus {
    pub name: String,
    pub group: String,
    pub expr: String,
    #[serde(rename = "for", with = "humantime_serde")]
    pub for_duration: Duration,
    pub severity: Severity,
    pub health: RuleHealth,
    pub last_error: Option<String>,
    pub last_evaluation: Option<Timestamp>,
    pub instances: Vec<RuleInstance>,
}

#[derive(Debug)]
struct RuleState {
    instances: HashMap<Labels, RuleInstance>,
    health: RuleHealth,
    last_error: Option<String>,
    last_evaluation: Option<Timestamp>,
}

impl RuleState {
    fn new() -> Self {
        Self {
            instances: HashMap::new(),
            health: RuleHealth::Unknown,
            last_error: None,
            last_evaluation: None,
        }
    }
}

/// 规则评估器
///
/// 规则集通过 `ArcSwap` 原子替换；实例状态按规则名保存。
pub struct RuleEvaluator {
    store: Arc<TimeSeriesStore>,
    rules: ArcSwap<RuleSet>,
    states: Mutex<HashMap<String, RuleState>>,
    /// 被删除规则遗留的告警，下一次评估时发出 resolved
    orphaned: Mutex<Vec<Alert>>,
    sink: Arc<dyn ErrorSink>,
    metrics: Option<Arc<PipelineMetrics>>,
    lookback: Duration,
    generation: watch::Sender<u64>,
}

impl RuleEvaluator {
    pub fn new(store: Arc<TimeSeriesStore>, rules: RuleSet) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            store,
            rules: ArcSwap::from_pointee(rules),
            states: Mutex::new(HashMap::new()),
            orphaned: Mutex::new(Vec::new()),
            sink: Arc::new(LogSink),
            metrics: None,
            lookback: DEFAULT_LOOKBACK,
            generation,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_lookback(mut self, lookback: Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }

    /// 规则集变更通知
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// 替换规则集
    ///
    /// 定义未变的规则保留实例状态；其余规则的状态丢弃，
    /// 其中处于 FIRING 的实例按旧规则在下一次评估时发出 resolved。
    pub fn replace_rules(&self, rules: RuleSet) {
        let mut states = self.states.lock();
        let mut dropped = Vec::new();

        states.retain(|name, state| {
            let old = self.rules.load().get(name).cloned();
            let keep = match (old, rules.get(name)) {
                (Some(old), Some(new)) => old.same_identity(new),
                _ => false,
            };
            if !keep {
                dropped.push((name.clone(), std::mem::take(&mut state.instances)));
            }
            keep
        });

        let current = self.rules.load_full();
        let mut orphaned = self.orphaned.lock();
        for (name, instances) in dropped {
            let Some(rule) = current.get(&name) else {
                continue;
            };
            for instance in instances.into_values().filter(|i| i.is_firing()) {
                orphaned.push(build_alert(rule, &instance));
            }
        }

        info!(rules = rules.len(), orphaned = orphaned.len(), "Rule set replaced");
        self.rules.store(Arc::new(rules));
        self.generation.send_modify(|g| *g += 1);
    }

    /// 取出被删除规则的遗留告警，标记为已解决
    pub fn take_orphaned(&self, now: Timestamp) -> Vec<AlertEvent> {
        std::mem::take(&mut *self.orphaned.lock())
            .into_iter()
            .map(|mut alert| {
                alert.resolve(now);
                AlertEvent::Resolved(alert)
            })
            .collect()
    }

    /// 评估单条规则并推进其实例状态机
    pub fn evaluate_rule(&self, rule: &Rule, now: Timestamp) -> Vec<AlertEvent> {
        let started = Instant::now();
        let ctx = EvalContext::new(&self.store, now, self.lookback.as_millis() as i64);

        let (active, error) = match evaluate(&rule.expr, &ctx) {
            Ok(value) => (active_instances(value), None),
            Err(e) => (HashMap::new(), Some(e)),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_rule_evaluation(&rule.name, error.is_none());
        }
        if let Some(e) = &error {
            self.sink.report(PipelineError::Evaluation {
                rule: rule.name.clone(),
                error: e.clone(),
            });
        }

        let mut states = self.states.lock();
        // 评估期间规则被删除或修改：丢弃结果
        let current = self.rules.load();
        if !current.get(&rule.name).map_or(false, |r| r.same_identity(rule)) {
            debug!(rule = %rule.name, "Discarding result of a replaced rule");
            return Vec::new();
        }

        let state = states.entry(rule.name.clone()).or_insert_with(RuleState::new);
        state.last_evaluation = Some(now);
        state.health = if error.is_some() { RuleHealth::Err } else { RuleHealth::Ok };
        state.last_error = error.as_ref().map(EvaluationError::to_string);

        let events = advance(rule, state, active, now);
        debug!(
            rule = %rule.name,
            instances = state.instances.len(),
            events = events.len(),
            elapsed = ?started.elapsed(),
            "Rule evaluated"
        );
        events
    }

    /// 顺序评估一个规则组
    pub fn evaluate_group(&self, group: &RuleGroup, now: Timestamp) -> Vec<AlertEvent> {
        group
            .rules
            .iter()
            .flat_map(|rule| self.evaluate_rule(rule, now))
            .collect()
    }

    /// 评估全部规则（含遗留告警），用于确定性驱动
    pub fn evaluate_at(&self, now: Timestamp) -> Vec<AlertEvent> {
        let rules = self.rules.load_full();
        let mut events = self.take_orphaned(now);
        for group in rules.groups() {
            events.extend(self.evaluate_group(group, now));
        }
        events
    }

    /// 当前规则与实例状态
    pub fn rule_states(&self) -> Vec<RuleStatus> {
        let rules = self.rules.load_full();
        let states = self.states.lock();

        rules
            .rules()
            .map(|rule| {
                let state = states.get(&rule.name);
                let mut instances: Vec<RuleInstance> = state
                    .map(|s| s.instances.values().cloned().collect())
                    .unwrap_or_default();
                instances.sort_by(|a, b| a.labels.cmp(&b.labels));

                RuleStatus {
                    name: rule.name.clone(),
                    group: rule.group.clone(),
                    expr: rule.expr_source.clone(),
                    for_duration: rule.for_duration,
                    severity: rule.severity,
                    health: state.map_or(RuleHealth::Unknown, |s| s.health),
                    last_error: state.and_then(|s| s.last_error.clone()),
                    last_evaluation: state.and_then(|s| s.last_evaluation),
                    instances,
                }
            })
            .collect()
    }
}

/// 把求值结果转换为 标签 -> 值；标量非零视为无标签的一个实例
fn active_instances(value: Value) -> HashMap<Labels, f64> {
    match value {
        Value::Vector(elements) => elements.into_iter().map(|e| (e.labels, e.value)).collect(),
        Value::Scalar(v) if v != 0.0 && !v.is_nan() => HashMap::from([(Labels::new(), v)]),
        Value::Scalar(_) => HashMap::new(),
    }
}

fn advance(
    rule: &Rule,
    state: &mut RuleState,
    mut active: HashMap<Labels, f64>,
    now: Timestamp,
) -> Vec<AlertEvent> {
    let for_ms = rule.for_duration.as_millis() as i64;
    let mut events = Vec::new();

    for (labels, instance) in state.instances.iter_mut() {
        let transition = match active.remove(labels) {
            Some(value) => instance.observe_true(now, value, for_ms),
            None => instance.observe_false(),
        };
        if let Some(event) = to_event(rule, instance, transition, now) {
            events.push(event);
        }
    }

    for (labels, value) in active {
        let mut instance = RuleInstance::new(labels.clone());
        let transition = instance.observe_true(now, value, for_ms);
        if let Some(event) = to_event(rule, &instance, transition, now) {
            events.push(event);
        }
        state.instances.insert(labels, instance);
    }

    state.instances.retain(|_, i| i.state != InstanceState::Inactive);
    events
}

fn to_event(rule: &Rule, instance: &RuleInstance, transition: Transition, now: Timestamp) -> Option<AlertEvent> {
    match transition {
        Transition::Fired => {
            info!(rule = %rule.name, labels = %instance.labels, "Alert firing");
            Some(AlertEvent::Firing(build_alert(rule, instance)))
        }
        Transition::Refreshed => Some(AlertEvent::Refresh {
            fingerprint: pulse_core::alert_fingerprint(&rule.name, &alert_labels(rule, &instance.labels)),
            last_seen: now,
            value: instance.last_value,
        }),
        Transition::Resolved => {
            info!(rule = %rule.name, labels = %instance.labels, "Alert resolved");
            let mut alert = build_alert(rule, instance);
            alert.resolve(now);
            Some(AlertEvent::Resolved(alert))
        }
        Transition::Pending => {
            debug!(rule = %rule.name, labels = %instance.labels, "Alert pending");
            None
        }
        Transition::Reset => {
            debug!(rule = %rule.name, labels = %instance.labels, "Pending alert reset");
            None
        }
        Transition::Unchanged => None,
    }
}

/// 告警标签：实例标签 + 规则标签（规则优先）+ alertname
fn alert_labels(rule: &Rule, instance: &Labels) -> Labels {
    let mut labels = instance.clone();
    labels.merge(&rule.labels);
    labels.insert(ALERT_NAME_LABEL, rule.name.as_str());
    labels
}

fn build_alert(rule: &Rule, instance: &RuleInstance) -> Alert {
    let labels = alert_labels(rule, &instance.labels);
    let annotations: BTreeMap<String, String> = rule
        .annotations
        .iter()
        .map(|(k, v)| (k.clone(), template::render(v, &labels, instance.last_value)))
        .collect();

    Alert {
        rule_name: rule.name.clone(),
        labels,
        annotations,
        severity: rule.severity,
        value: instance.last_value,
        fired_at: instance.fired_at.unwrap_or(instance.last_seen),
        last_seen: instance.last_seen,
        resolved_at: None,
    }
}
