use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_core::{
    now_millis, ErrorSink, Labels, LogSink, MetricKind, ParseError, PipelineError, Sample,
    ScrapeError, Target, Timestamp,
};
use pulse_metrics::PipelineMetrics;
use pulse_tsdb::TimeSeriesStore;

use crate::error::FetchError;
use crate::exposition::parse_exposition;
use crate::fetcher::Fetcher;
use crate::registry::TargetRegistry;

const UP: &str = "up";
const SCRAPE_DURATION: &str = "scrape_duration_seconds";
const SCRAPE_SAMPLES: &str = "scrape_samples_scraped";

/// 单次抓取结果
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeReport {
    pub target: String,
    pub timestamp: Timestamp,
    pub up: bool,
    pub samples_scraped: usize,
    pub samples_appended: usize,
    pub out_of_order: usize,
    pub parse_errors: usize,
    pub duration: Duration,
}

/// 抓取引擎
///
/// 每个目标一个任务、各自计时；监督任务在注册表变更时增删任务。
pub struct ScrapeEngine {
    registry: Arc<TargetRegistry>,
    store: Arc<TimeSeriesStore>,
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn ErrorSink>,
    metrics: Option<Arc<PipelineMetrics>>,
    strict_parsing: bool,
}

impl ScrapeEngine {
    pub fn new(
        registry: Arc<TargetRegistry>,
        store: Arc<TimeSeriesStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            registry,
            store,
            fetcher,
            sink: Arc::new(LogSink),
            metrics: None,
            strict_parsing: false,
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

    /// 严格模式：任一坏行即丢弃整次抓取
    pub fn with_strict_parsing(mut self, strict: bool) -> Self {
        self.strict_parsing = strict;
        self
    }

    /// 抓取一个目标并写入存储，`now` 为本次抓取时间戳
    pub async fn scrape_target(&self, target: &Target, now: Timestamp) -> ScrapeReport {
        let address = target.address();
        let started = Instant::now();

        let fetched = match tokio::time::timeout(target.scrape_timeout, self.fetcher.fetch(target)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(target.scrape_timeout)),
        };
        let duration = started.elapsed();

        let mut report = ScrapeReport {
            target: address.clone(),
            timestamp: now,
            up: false,
            samples_scraped: 0,
            samples_appended: 0,
            out_of_order: 0,
            parse_errors: 0,
            duration,
        };

        let mut scraped = Vec::new();
        match fetched {
            Ok(body) => match String::from_utf8(body) {
                Ok(text) => {
                    let parsed = parse_exposition(&text, now);
                    report.parse_errors = parsed.errors.len();
                    for error in parsed.errors {
                        self.sink.report(PipelineError::Parse {
                            target: address.clone(),
                            error,
                        });
                    }

                    if self.strict_parsing && report.parse_errors > 0 {
                        warn!(
                            target_address = %address,
                            errors = report.parse_errors,
                            "Discarding payload with malformed lines"
                        );
                    } else {
                        report.up = true;
                        scraped = parsed.samples;
                    }
                }
                Err(_) => {
                    report.parse_errors = 1;
                    self.sink.report(PipelineError::Parse {
                        target: address.clone(),
                        error: ParseError::new(0, "payload is not valid UTF-8"),
                    });
                }
            },
            Err(e) => {
                self.sink.report(PipelineError::Scrape(ScrapeError {
                    target: address.clone(),
                    cause: e.to_string(),
                    timestamp: now,
                }));
            }
        }
        report.samples_scraped = scraped.len();

        let base = target.instance_labels();
        let mut batch: Vec<Sample> = scraped
            .into_iter()
            .map(|sample| relabel(sample, &base))
            .filter(|sample| !is_synthetic(sample, &base))
            .collect();
        batch.extend(synthetic_samples(&base, now, &report));

        for sample in &batch {
            match self.store.append(sample) {
                Ok(()) => report.samples_appended += 1,
                Err(e) => {
                    report.out_of_order += 1;
                    self.sink.report(PipelineError::OutOfOrder(e));
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_scrape(&address, report.up, duration.as_secs_f64());
            metrics.record_appended(report.samples_appended);
        }

        debug!(
            target_address = %address,
            up = report.up,
            scraped = report.samples_scraped,
            appended = report.samples_appended,
            out_of_order = report.out_of_order,
            "Scrape finished"
        );
        report
    }

    /// 启动监督任务
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.supervise(cancel))
    }

    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        let mut changes = self.registry.subscribe();
        let mut workers: HashMap<String, (Target, CancellationToken)> = HashMap::new();
        info!("Scrape engine started");

        loop {
            changes.borrow_and_update();
            self.reconcile(&mut workers, &cancel).await;

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        for (_, (_, token)) in workers {
            token.cancel();
        }
        info!("Scrape engine stopped");
    }

    /// 按注册表内容增删目标任务；参数变化的目标重启
    async fn reconcile(
        self: &Arc<Self>,
        workers: &mut HashMap<String, (Target, CancellationToken)>,
        parent: &CancellationToken,
    ) {
        let desired: HashMap<String, Target> = self
            .registry
            .list_targets()
            .await
            .into_iter()
            .map(|t| (t.address(), t))
            .collect();

        workers.retain(|address, (running, token)| match desired.get(address) {
            Some(target) if target == running => true,
            _ => {
                token.cancel();
                if !desired.contains_key(address) {
                    if let Some(metrics) = &self.metrics {
                        metrics.forget_target(address);
                    }
                }
                false
            }
        });

        for (address, target) in desired {
            if workers.contains_key(&address) {
                continue;
            }
            let token = parent.child_token();
            tokio::spawn(self.clone().run_target(target.clone(), token.clone()));
            workers.insert(address, (target, token));
        }
    }

    async fn run_target(self: Arc<Self>, target: Target, cancel: CancellationToken) {
        let address = target.address();
        let mut ticker = tokio::time::interval(target.scrape_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(target_address = %address, interval = ?target.scrape_interval, "Scrape loop started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // 已开始的抓取总会完成
            self.scrape_target(&target, now_millis()).await;
        }
        info!(target_address = %address, "Scrape loop stopped");
    }
}

/// 附加目标标签；与目标标签冲突的抓取标签改名为 `exported_<name>`
fn relabel(mut sample: Sample, base: &Labels) -> Sample {
    let mut labels = Labels::new();
    for (name, value) in sample.labels.iter() {
        if base.contains(name) {
            // 已有 exported_ 前缀的同名标签时继续加前缀，不覆盖
            let mut exported = format!("exported_{}", name);
            while sample.labels.contains(&exported) || base.contains(&exported) {
                exported = format!("exported_{}", exported);
            }
            labels.insert(exported, value);
        } else {
            labels.insert(name, value);
        }
    }
    labels.merge(base);
    sample.labels = labels;
    sample
}

fn is_synthetic(sample: &Sample, base: &Labels) -> bool {
    matches!(sample.metric.as_str(), UP | SCRAPE_DURATION | SCRAPE_SAMPLES) && &sample.labels == base
}

fn synthetic_samples(base: &Labels, now: Timestamp, report: &ScrapeReport) -> [Sample; 3] {
    [
        Sample::new(UP, base.clone(), now, if report.up { 1.0 } else { 0.0 })
            .with_kind(MetricKind::Gauge),
        Sample::new(SCRAPE_DURATION, base.clone(), now, report.duration.as_secs_f64())
            .with_kind(MetricKind::Gauge),
        Sample::new(SCRAPE_SAMPLES, base.clone(), now, report.samples_scraped as f64)
            .with_kind(MetricKind::Gauge),
    ]
}
