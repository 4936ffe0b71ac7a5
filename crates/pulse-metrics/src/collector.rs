use parking_lot::RwLock;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::collections::HashMap;

/// 流水线自身指标
pub struct PipelineMetrics {
    // 抓取
    scrapes_total: IntCounterVec,
    scrape_duration: HistogramVec,
    target_up: GaugeVec,
    samples_appended_total: IntCounter,
    out_of_order_total: IntCounter,
    parse_errors_total: IntCounterVec,

    // 规则
    rule_evaluations_total: IntCounterVec,
    evaluation_errors_total: IntCounterVec,

    // 告警
    notifications_total: IntCounterVec,
    notifications_dropped_total: IntCounter,
    active_alerts: IntGauge,

    // 存储
    series_count: IntGauge,

    errors_total: IntCounterVec,

    last_scrape_errors: RwLock<HashMap<String, String>>,
    registry: Registry,
}

impl PipelineMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("pulse".to_string()), None)?;

        // 抓取
        let scrapes_total = IntCounterVec::new(
            Opts::new("scrapes_total", "Total number of scrapes by result"),
            &["target", "result"],
        )?;
        registry.register(Box::new(scrapes_total.clone()))?;

        let scrape_duration = HistogramVec::new(
            HistogramOpts::new("scrape_duration_seconds", "Scrape duration")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
            &["target"],
        )?;
        registry.register(Box::new(scrape_duration.clone()))?;

        let target_up = GaugeVec::new(
            Opts::new("target_up", "Whether the last scrape of a target succeeded"),
            &["target"],
        )?;
        registry.register(Box::new(target_up.clone()))?;

        let samples_appended_total =
            IntCounter::new("samples_appended_total", "Samples appended to the store")?;
        registry.register(Box::new(samples_appended_total.clone()))?;

        let out_of_order_total = IntCounter::new(
            "out_of_order_samples_total",
            "Samples rejected for out-of-order timestamps",
        )?;
        registry.register(Box::new(out_of_order_total.clone()))?;

        let parse_errors_total = IntCounterVec::new(
            Opts::new("parse_errors_total", "Malformed exposition lines"),
            &["target"],
        )?;
        registry.register(Box::new(parse_errors_total.clone()))?;

        // 规则
        let rule_evaluations_total = IntCounterVec::new(
            Opts::new("rule_evaluations_total", "Rule evaluations by result"),
            &["rule", "result"],
        )?;
        registry.register(Box::new(rule_evaluations_total.clone()))?;

        let evaluation_errors_total = IntCounterVec::new(
            Opts::new("evaluation_errors_total", "Failed rule evaluations"),
            &["rule"],
        )?;
        registry.register(Box::new(evaluation_errors_total.clone()))?;

        // 告警
        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Notification delivery attempts by result"),
            &["notifier", "result"],
        )?;
        registry.register(Box::new(notifications_total.clone()))?;

        let notifications_dropped_total = IntCounter::new(
            "notifications_dropped_total",
            "Notifications dropped because the queue was full or retries ran out",
        )?;
        registry.register(Box::new(notifications_dropped_total.clone()))?;

        let active_alerts = IntGauge::new("active_alerts", "Currently firing alerts")?;
        registry.register(Box::new(active_alerts.clone()))?;

        let series_count = IntGauge::new("series", "Series held by the store")?;
        registry.register(Box::new(series_count.clone()))?;

        let errors_total = IntCounterVec::new(
            Opts::new("errors_total", "Errors reported by pipeline stages"),
            &["kind"],
        )?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            scrapes_total,
            scrape_duration,
            target_up,
            samples_appended_total,
            out_of_order_total,
            parse_errors_total,
            rule_evaluations_total,
            evaluation_errors_total,
            notifications_total,
            notifications_dropped_total,
            active_alerts,
            series_count,
            errors_total,
            last_scrape_errors: RwLock::new(HashMap::new()),
            registry,
        })
    }

    // 抓取指标记录
    pub fn record_scrape(&self, target: &str, up: bool, duration_secs: f64) {
        let result = if up { "success" } else { "failure" };
        self.scrapes_total.with_label_values(&[target, result]).inc();
        self.scrape_duration
            .with_label_values(&[target])
            .observe(duration_secs);
        self.target_up
            .with_label_values(&[target])
            .set(if up { 1.0 } else { 0.0 });
        if up {
            self.last_scrape_errors.write().remove(target);
        }
    }

    pub fn record_appended(&self, count: usize) {
        self.samples_appended_total.inc_by(count as u64);
    }

    pub fn record_out_of_order(&self) {
        self.out_of_order_total.inc();
    }

    pub fn record_parse_errors(&self, target: &str, count: usize) {
        self.parse_errors_total
            .with_label_values(&[target])
            .inc_by(count as u64);
    }

    pub fn record_scrape_error(&self, target: &str, cause: &str) {
        self.last_scrape_errors
            .write()
            .insert(target.to_string(), cause.to_string());
    }

    /// 目标最近一次抓取错误
    pub fn last_scrape_error(&self, target: &str) -> Option<String> {
        self.last_scrape_errors.read().get(target).cloned()
    }

    /// 目标移除后清理其指标
    pub fn forget_target(&self, target: &str) {
        let _ = self.target_up.remove_label_values(&[target]);
        self.last_scrape_errors.write().remove(target);
    }

    // 规则指标记录
    pub fn record_rule_evaluation(&self, rule: &str, ok: bool) {
        let result = if ok { "success" } else { "failure" };
        self.rule_evaluations_total
            .with_label_values(&[rule, result])
            .inc();
        if !ok {
            self.evaluation_errors_total.with_label_values(&[rule]).inc();
        }
    }

    // 告警指标记录
    pub fn record_notification(&self, notifier: &str, ok: bool) {
        let result = if ok { "success" } else { "failure" };
        self.notifications_total
            .with_label_values(&[notifier, result])
            .inc();
    }

    pub fn record_notification_dropped(&self) {
        self.notifications_dropped_total.inc();
    }

    pub fn set_active_alerts(&self, count: usize) {
        self.active_alerts.set(count as i64);
    }

    pub fn set_series_count(&self, count: usize) {
        self.series_count.set(count as i64);
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total.with_label_values(&[kind]).inc();
    }

    // 导出指标
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
