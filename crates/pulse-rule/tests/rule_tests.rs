use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use pulse_core::{now_millis, AlertEvent, AlertEventSink, Labels, Sample};
use pulse_rule::{InstanceState, RuleEvaluator, RuleScheduler, RuleSet};
use pulse_tsdb::TimeSeriesStore;

const TICK: i64 = 1_000;

fn rules(yaml: &str) -> RuleSet {
    RuleSet::from_yaml(yaml, Duration::from_secs(1)).unwrap()
}

fn instance_labels() -> Labels {
    Labels::from_pairs([("instance", "a:9100"), ("job", "node")]).unwrap()
}

fn append_up(store: &TimeSeriesStore, tick: i64, value: f64) {
    store
        .append(&Sample::new("up", instance_labels(), tick * TICK, value))
        .unwrap();
}

fn instance_state(evaluator: &RuleEvaluator, rule: &str) -> InstanceState {
    evaluator
        .rule_states()
        .into_iter()
        .find(|s| s.name == rule)
        .and_then(|s| s.instances.first().map(|i| i.state))
        .unwrap_or(InstanceState::Inactive)
}

fn firing(events: &[AlertEvent]) -> usize {
    events.iter().filter(|e| matches!(e, AlertEvent::Firing(_))).count()
}

fn resolved(events: &[AlertEvent]) -> usize {
    events.iter().filter(|e| matches!(e, AlertEvent::Resolved(_))).count()
}

#[test]
fn target_down_fires_on_second_consecutive_bad_tick() {
    let store = Arc::new(TimeSeriesStore::default());
    let evaluator = RuleEvaluator::new(
        store.clone(),
        rules("groups: [{name: node, interval: 1s, rules: [{alert: TargetDown, expr: up == 0, for: 1s}]}]"),
    );

    let mut history = Vec::new();
    for tick in 1..=8 {
        append_up(&store, tick, if tick <= 5 { 1.0 } else { 0.0 });
        let events = evaluator.evaluate_at(tick * TICK);
        history.push((tick, instance_state(&evaluator, "TargetDown"), firing(&events)));
    }

    assert_eq!(
        history,
        vec![
            (1, InstanceState::Inactive, 0),
            (2, InstanceState::Inactive, 0),
            (3, InstanceState::Inactive, 0),
            (4, InstanceState::Inactive, 0),
            (5, InstanceState::Inactive, 0),
            (6, InstanceState::Pending, 0),
            (7, InstanceState::Firing, 1),
            (8, InstanceState::Firing, 0),
        ]
    );
}

#[test]
fn false_while_pending_restarts_the_for_timer() {
    let store = Arc::new(TimeSeriesStore::default());
    let evaluator = RuleEvaluator::new(
        store.clone(),
        rules("groups: [{name: node, rules: [{alert: TargetDown, expr: up == 0, for: 2s}]}]"),
    );

    let values = [0.0, 0.0, 1.0, 0.0, 0.0, 0.0];
    let mut fired_at = None;
    for (i, value) in values.iter().enumerate() {
        let tick = i as i64 + 1;
        append_up(&store, tick, *value);
        if firing(&evaluator.evaluate_at(tick * TICK)) > 0 {
            fired_at.get_or_insert(tick);
        }
    }
    // 第 4 个 tick 重新开始计时，2s 后即第 6 个 tick 触发
    assert_eq!(fired_at, Some(6));
}

#[test]
fn zero_for_fires_on_first_true_tick() {
    let store = Arc::new(TimeSeriesStore::default());
    let evaluator = RuleEvaluator::new(
        store.clone(),
        rules("groups: [{name: node, rules: [{alert: TargetDown, expr: up == 0}]}]"),
    );

    append_up(&store, 1, 0.0);
    let events = evaluator.evaluate_at(TICK);
    assert_eq!(firing(&events), 1);

    append_up(&store, 2, 0.0);
    let events = evaluator.evaluate_at(2 * TICK);
    assert_eq!(firing(&events), 0);
    assert!(matches!(&events[..], [AlertEvent::Refresh { last_seen, .. }] if *last_seen == 2 * TICK));

    append_up(&store, 3, 1.0);
    assert_eq!(resolved(&evaluator.evaluate_at(3 * TICK)), 1);
}

#[test]
fn independent_instances_per_label_set() {
    let store = Arc::new(TimeSeriesStore::default());
    let evaluator = RuleEvaluator::new(
        store.clone(),
        rules("groups: [{name: node, rules: [{alert: TargetDown, expr: up == 0}]}]"),
    );

    let other = Labels::from_pairs([("instance", "b:9100"), ("job", "node")]).unwrap();
    append_up(&store, 1, 0.0);
    store.append(&Sample::new("up", other.clone(), TICK, 1.0)).unwrap();
    assert_eq!(firing(&evaluator.evaluate_at(TICK)), 1);

    append_up(&store, 2, 0.0);
    store.append(&Sample::new("up", other, 2 * TICK, 0.0)).unwrap();
    let events = evaluator.evaluate_at(2 * TICK);
    assert_eq!(firing(&events), 1);
    assert_eq!(events.len(), 2);
}

#[test]
fn reload_keeps_state_of_unchanged_rules() {
    let store = Arc::new(TimeSeriesStore::default());
    let evaluator = RuleEvaluator::new(
        store.clone(),
        rules("groups: [{name: node, rules: [{alert: TargetDown, expr: up == 0}]}]"),
    );

    append_up(&store, 1, 0.0);
    assert_eq!(firing(&evaluator.evaluate_at(TICK)), 1);

    evaluator.replace_rules(rules(
        "groups: [{name: node, interval: 5s, rules: [{alert: TargetDown, expr: up == 0}, {alert: Other, expr: up == 1}]}]",
    ));

    append_up(&store, 2, 0.0);
    let events = evaluator.evaluate_at(2 * TICK);
    // 未变化的规则不会重复触发
    assert_eq!(firing(&events), 0);
    assert_eq!(resolved(&events), 0);
    assert_eq!(instance_state(&evaluator, "TargetDown"), InstanceState::Firing);
}

#[test]
fn removed_or_changed_rules_resolve_their_alerts() {
    let store = Arc::new(TimeSeriesStore::default());
    let evaluator = RuleEvaluator::new(
        store.clone(),
        rules("groups: [{name: node, rules: [{alert: TargetDown, expr: up == 0}, {alert: Changed, expr: up < 1}]}]"),
    );
    let mut generation = evaluator.subscribe();

    append_up(&store, 1, 0.0);
    assert_eq!(firing(&evaluator.evaluate_at(TICK)), 2);

    evaluator.replace_rules(rules(
        "groups: [{name: node, rules: [{alert: Changed, expr: up < 0.5}]}]",
    ));
    assert!(generation.has_changed().unwrap());
    generation.borrow_and_update();

    append_up(&store, 2, 0.0);
    let events = evaluator.evaluate_at(2 * TICK);
    assert_eq!(resolved(&events), 2);
    // 修改过表达式的规则重新开始
    assert_eq!(firing(&events), 1);

    assert!(evaluator.take_orphaned(3 * TICK).is_empty());
}

#[test]
fn relabelled_rule_resolves_the_alert_it_fired_under_old_labels() {
    let store = Arc::new(TimeSeriesStore::default());
    let evaluator = RuleEvaluator::new(
        store.clone(),
        rules("groups: [{name: node, rules: [{alert: TargetDown, expr: up == 0, labels: {severity: warning}}]}]"),
    );

    append_up(&store, 1, 0.0);
    let events = evaluator.evaluate_at(TICK);
    assert_eq!(firing(&events), 1);
    let fired = events[0].fingerprint();

    evaluator.replace_rules(rules(
        "groups: [{name: node, rules: [{alert: TargetDown, expr: up == 0, labels: {severity: critical}}]}]",
    ));

    let mut resolved_fingerprints = Vec::new();
    for tick in 2..=5 {
        append_up(&store, tick, 1.0);
        for event in evaluator.evaluate_at(tick * TICK) {
            match event {
                AlertEvent::Resolved(alert) => {
                    assert_eq!(alert.labels.get("severity"), Some("warning"));
                    resolved_fingerprints.push(alert.fingerprint());
                }
                other => panic!("unexpected event at tick {}: {:?}", tick, other),
            }
        }
    }
    assert_eq!(resolved_fingerprints, vec![fired]);
    assert_eq!(instance_state(&evaluator, "TargetDown"), InstanceState::Inactive);
}

struct ChannelSink(mpsc::UnboundedSender<AlertEvent>);

impl AlertEventSink for ChannelSink {
    fn submit(&self, events: Vec<AlertEvent>) {
        for event in events {
            let _ = self.0.send(event);
        }
    }
}

#[tokio::test]
async fn scheduler_evaluates_groups_and_follows_reloads() {
    let store = Arc::new(TimeSeriesStore::default());
    store
        .append(&Sample::new("up", instance_labels(), now_millis(), 0.0))
        .unwrap();

    let evaluator = Arc::new(RuleEvaluator::new(
        store,
        rules("groups: [{name: node, interval: 50ms, rules: [{alert: TargetDown, expr: up == 0}, {alert: Never, expr: up == 5}]}]"),
    ));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(RuleScheduler::new(evaluator.clone(), Arc::new(ChannelSink(tx))));
    let cancel = CancellationToken::new();
    let handle = scheduler.start(cancel.clone());

    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, AlertEvent::Firing(ref alert) if alert.rule_name == "TargetDown"));

    evaluator.replace_rules(RuleSet::empty());
    let resolved = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        if let AlertEvent::Resolved(alert) = event {
            break alert;
        }
    };
    assert_eq!(resolved.rule_name, "TargetDown");

    cancel.cancel();
    handle.await.unwrap();
}
