use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pulse_core::{now_millis, AlertEvent, AlertEventSink, Timestamp};

use crate::evaluator::RuleEvaluator;
use crate::model::RuleGroup;

/// 规则调度器
///
/// 每个规则组一个计时任务，组内规则并行评估；规则集替换后重建任务。
pub struct RuleScheduler {
    evaluator: Arc<RuleEvaluator>,
    sink: Arc<dyn AlertEventSink>,
}

impl RuleScheduler {
    pub fn new(evaluator: Arc<RuleEvaluator>, sink: Arc<dyn AlertEventSink>) -> Self {
        Self { evaluator, sink }
    }

    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.supervise(cancel))
    }

    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        let mut changes = self.evaluator.subscribe();
        info!("Rule scheduler started");

        loop {
            changes.borrow_and_update();
            let orphaned = self.evaluator.take_orphaned(now_millis());
            if !orphaned.is_empty() {
                self.sink.submit(orphaned);
            }

            let groups = cancel.child_token();
            let rules = self.evaluator.rules();
            for group in rules.groups() {
                tokio::spawn(self.clone().run_group(group.clone(), groups.clone()));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = changes.changed() => {
                    groups.cancel();
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Rule scheduler stopped");
    }

    async fn run_group(self: Arc<Self>, group: RuleGroup, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(group.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(group = %group.name, interval = ?group.interval, rules = group.rules.len(), "Rule group started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // 已开始的评估总会完成
            let events = self.evaluate_group(&group, now_millis()).await;
            if !events.is_empty() {
                self.sink.submit(events);
            }
        }
        info!(group = %group.name, "Rule group stopped");
    }

    /// 并行评估组内规则
    pub async fn evaluate_group(&self, group: &RuleGroup, now: Timestamp) -> Vec<AlertEvent> {
        let mut events = self.evaluator.take_orphaned(now);
        let mut tasks = JoinSet::new();
        for rule in &group.rules {
            let evaluator = self.evaluator.clone();
            let rule = rule.clone();
            tasks.spawn_blocking(move || evaluator.evaluate_rule(&rule, now));
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(rule_events) => events.extend(rule_events),
                Err(e) => warn!(group = %group.name, error = %e, "Rule evaluation task failed"),
            }
        }
        events
    }
}
