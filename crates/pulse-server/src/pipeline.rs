use anyhow::Context;
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pulse_alert::{AlertManager, AlertManagerConfig, LogNotifier, RetryPolicy, WebhookNotifier};
use pulse_config::{AlertingConfig, AppConfig, ConfigManager};
use pulse_core::{now_millis, ConfigError, ErrorSink};
use pulse_metrics::PipelineMetrics;
use pulse_rule::{RuleEvaluator, RuleLoader, RuleScheduler};
use pulse_scrape::{
    DiscoveryManager, Fetcher, FileDiscovery, HttpFetcher, ScrapeEngine, StaticDiscovery, TargetRegistry,
};
use pulse_tsdb::{RetentionPolicy, TimeSeriesStore};

use crate::api;

/// `POST /-/reload` 的结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadOutcome {
    pub config_changed: bool,
    pub rules: usize,
}

/// 组装好的抓取-告警流水线
///
/// `build` 只构造组件，`run` 启动全部后台任务和 HTTP 服务，直到取消。
pub struct Pipeline {
    config: Arc<ConfigManager>,
    store: Arc<TimeSeriesStore>,
    registry: Arc<TargetRegistry>,
    metrics: Arc<PipelineMetrics>,
    engine: Arc<ScrapeEngine>,
    evaluator: Arc<RuleEvaluator>,
    alerts: Arc<AlertManager>,
}

impl Pipeline {
    /// 使用 HTTP 抓取构建流水线
    ///
    /// # 错误
    ///
    /// 快照损坏、初始规则无法加载或通知渠道无法创建时返回错误，进程应退出。
    pub async fn build(config: Arc<ConfigManager>) -> anyhow::Result<Self> {
        let fetcher = HttpFetcher::new().context("failed to create HTTP client")?;
        Self::build_with_fetcher(config, Arc::new(fetcher)).await
    }

    pub async fn build_with_fetcher(config: Arc<ConfigManager>, fetcher: Arc<dyn Fetcher>) -> anyhow::Result<Self> {
        let current = config.current();
        let metrics = Arc::new(PipelineMetrics::new().context("failed to register self metrics")?);
        let sink: Arc<dyn ErrorSink> = metrics.clone();

        let retention = RetentionPolicy::unbounded()
            .with_max_points(current.storage.max_points_per_series)
            .with_max_age(current.storage.max_age);
        let store = Arc::new(TimeSeriesStore::new(retention));
        if let Some(path) = &current.storage.snapshot_path {
            let restored = store
                .restore(path)
                .with_context(|| format!("failed to restore snapshot {}", path.display()))?;
            info!(path = %path.display(), series = restored, "Store restored from snapshot");
        }

        let registry = Arc::new(TargetRegistry::new());
        let engine = Arc::new(
            ScrapeEngine::new(registry.clone(), store.clone(), fetcher)
                .with_sink(sink.clone())
                .with_metrics(metrics.clone())
                .with_strict_parsing(current.scrape.strict_parsing),
        );

        let rules = rule_loader(&current).load().context("failed to load alert rules")?;
        let evaluator = Arc::new(
            RuleEvaluator::new(store.clone(), rules)
                .with_sink(sink.clone())
                .with_metrics(metrics.clone())
                .with_lookback(current.rules.lookback),
        );

        let alerts = Arc::new(alert_manager(&current.alerting, sink, metrics.clone())?);

        let pipeline = Self {
            config,
            store,
            registry,
            metrics,
            engine,
            evaluator,
            alerts,
        };

        // 发现失败时先只抓取静态目标
        if pipeline.discovery(&current)?.refresh().await.is_err() {
            pipeline.registry.replace_all(current.static_targets()?).await?;
        }
        info!(targets = pipeline.registry.len().await, "Pipeline initialised");
        Ok(pipeline)
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    pub fn store(&self) -> &Arc<TimeSeriesStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn engine(&self) -> &Arc<ScrapeEngine> {
        &self.engine
    }

    pub fn evaluator(&self) -> &Arc<RuleEvaluator> {
        &self.evaluator
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    fn discovery(&self, config: &AppConfig) -> Result<DiscoveryManager, ConfigError> {
        let mut manager = DiscoveryManager::new(self.registry.clone(), config.discovery.refresh_interval)
            .with_source(Box::new(StaticDiscovery::new(config.static_targets()?)));
        for file in &config.discovery.files {
            manager = manager.with_source(Box::new(FileDiscovery::new(
                file.clone(),
                config.scrape.target_defaults(),
            )));
        }
        Ok(manager)
    }

    /// 按配置重新加载规则文件；失败时保留当前规则集
    pub fn reload_rules(&self, config: &AppConfig) -> Result<usize, ConfigError> {
        let rules = rule_loader(config).load().map_err(|e| {
            warn!(error = %e, "Rule reload failed, keeping current rule set");
            e
        })?;
        let count = rules.len();
        self.evaluator.replace_rules(rules);
        Ok(count)
    }

    /// 重新读取配置文件与规则文件
    pub async fn reload(&self) -> Result<ReloadOutcome, ConfigError> {
        let config_changed = self.config.reload().await?;
        let rules = self.reload_rules(&self.config.current())?;
        Ok(ReloadOutcome { config_changed, rules })
    }

    /// 启动全部任务，阻塞直到取消；退出前写最终快照
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> anyhow::Result<()> {
        let current = self.config.current();
        let addr: SocketAddr = current
            .server
            .listen
            .parse()
            .with_context(|| format!("invalid listen address '{}'", current.server.listen))?;

        let mut tasks: Vec<JoinHandle<()>> = vec![
            self.alerts.clone().start(cancel.clone()),
            self.engine.clone().start(cancel.clone()),
            Arc::new(RuleScheduler::new(self.evaluator.clone(), self.alerts.clone())).start(cancel.clone()),
            self.config.clone().watch(current.server.reload_interval, cancel.clone()),
            tokio::spawn(self.clone().follow_config(cancel.clone())),
            tokio::spawn(self.clone().purge_loop(current.storage.purge_interval, cancel.clone())),
        ];
        if let Some(path) = current.storage.snapshot_path.clone() {
            tasks.push(tokio::spawn(self.clone().snapshot_loop(
                path,
                current.storage.snapshot_interval,
                cancel.clone(),
            )));
        }

        let app = api::create_router(self.clone());
        let shutdown = cancel.clone();
        let served = match axum::Server::try_bind(&addr) {
            Ok(builder) => {
                info!(listen = %addr, "HTTP API listening");
                builder
                    .serve(app.into_make_service())
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
                    .context("HTTP server failed")
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("failed to bind {}", addr))),
        };
        if let Err(e) = &served {
            error!(error = %e, "HTTP API stopped unexpectedly, shutting down");
        }

        cancel.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        if let Some(path) = &current.storage.snapshot_path {
            match self.store.snapshot(path) {
                Ok(series) => info!(path = %path.display(), series, "Final snapshot written"),
                Err(e) => error!(path = %path.display(), error = %e, "Final snapshot failed"),
            }
        }
        info!("Pipeline stopped");
        served
    }

    /// 跟随配置变更：重启发现任务并重新加载规则
    async fn follow_config(self: Arc<Self>, cancel: CancellationToken) {
        let mut changes = self.config.subscribe();
        let mut previous = changes.borrow_and_update().clone();

        loop {
            let discovery = cancel.child_token();
            match self.discovery(&previous) {
                Ok(manager) => {
                    tokio::spawn(manager.run(discovery.clone()));
                }
                Err(e) => error!(error = %e, "Invalid discovery configuration"),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = changes.changed() => {
                    discovery.cancel();
                    if changed.is_err() {
                        break;
                    }
                }
            }

            let config = changes.borrow_and_update().clone();
            warn_restart_required(&previous, &config);
            // 失败已记录日志
            let _ = self.reload_rules(&config);
            previous = config;
        }
    }

    async fn purge_loop(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let stats = self.store.purge_stale(now_millis());
            self.metrics.set_series_count(stats.remaining_series);
            if stats.removed_series > 0 {
                debug!(
                    removed = stats.removed_series,
                    remaining = stats.remaining_series,
                    "Stale series purged"
                );
            }
        }
    }

    async fn snapshot_loop(self: Arc<Self>, path: PathBuf, period: Duration, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + period;
        let mut ticker = tokio::time::interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let store = self.store.clone();
            let target = path.clone();
            match tokio::task::spawn_blocking(move || store.snapshot(&target)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Periodic snapshot failed"),
                Err(e) => error!(error = %e, "Snapshot task panicked"),
            }
        }
    }
}

fn rule_loader(config: &AppConfig) -> RuleLoader {
    RuleLoader::new(config.rules.files.clone(), config.rules.evaluation_interval)
}

fn alert_manager(
    alerting: &AlertingConfig,
    sink: Arc<dyn ErrorSink>,
    metrics: Arc<PipelineMetrics>,
) -> anyhow::Result<AlertManager> {
    let retry = RetryPolicy {
        max_attempts: alerting.max_attempts,
        initial_backoff: alerting.initial_backoff,
        max_backoff: alerting.max_backoff,
        timeout: alerting.timeout,
        ..Default::default()
    };
    let mut manager = AlertManager::new(AlertManagerConfig {
        queue_capacity: alerting.queue_capacity,
        history_limit: alerting.history_limit,
        retry,
    })
    .with_sink(sink)
    .with_metrics(metrics);

    if alerting.log_notifications {
        manager = manager.with_notifier(Arc::new(LogNotifier::default()));
    }
    for webhook in &alerting.webhooks {
        let notifier = WebhookNotifier::new(webhook.name.clone(), webhook.url.clone(), alerting.timeout)
            .with_context(|| format!("failed to create webhook '{}'", webhook.name))?
            .with_headers(webhook.headers.clone())
            .with_min_severity(webhook.min_severity);
        manager = manager.with_notifier(Arc::new(notifier));
    }
    Ok(manager)
}

/// 这些配置段只在启动时读取
fn warn_restart_required(old: &AppConfig, new: &AppConfig) {
    let sections = [
        ("server", old.server != new.server),
        ("storage", old.storage != new.storage),
        ("alerting", old.alerting != new.alerting),
        ("logging", old.logging != new.logging),
        ("scrape.strict_parsing", old.scrape.strict_parsing != new.scrape.strict_parsing),
        ("rules.lookback", old.rules.lookback != new.rules.lookback),
    ];
    for (section, changed) in sections {
        if changed {
            warn!(section, "Configuration change takes effect after restart");
        }
    }
}
