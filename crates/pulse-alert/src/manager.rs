use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use pulse_core::{Alert, AlertEvent, AlertEventSink, ErrorSink, LogSink, PipelineError};
use pulse_metrics::PipelineMetrics;

use crate::notification::Notification;
use crate::notifier::Notifier;
use crate::retry::{deliver_with_retry, RetryPolicy};

/// 告警管理器配置
#[derive(Debug, Clone)]
pub struct AlertManagerConfig {
    /// 分发队列容量，满时丢弃
    pub queue_capacity: usize,
    /// 保留的已解决告警数
    pub history_limit: usize,
    pub retry: RetryPolicy,
}

impl Default for AlertManagerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            history_limit: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

/// 告警管理器
///
/// 按指纹去重，状态变化通过有界队列交给分发任务；`submit` 从不阻塞。
pub struct AlertManager {
    config: AlertManagerConfig,
    active: RwLock<HashMap<String, Alert>>,
    history: Mutex<VecDeque<Alert>>,
    notifiers: Vec<Arc<dyn Notifier>>,
    queue: mpsc::Sender<Notification>,
    receiver: Mutex<Option<mpsc::Receiver<Notification>>>,
    sink: Arc<dyn ErrorSink>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl AlertManager {
    pub fn new(config: AlertManagerConfig) -> Self {
        let (queue, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            active: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            notifiers: Vec::new(),
            queue,
            receiver: Mutex::new(Some(receiver)),
            sink: Arc::new(LogSink),
            metrics: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        info!(notifier = notifier.name(), "Registered notifier");
        self.notifiers.push(notifier);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// 处理一批告警事件
    pub fn handle(&self, events: Vec<AlertEvent>) {
        for event in events {
            match event {
                AlertEvent::Firing(alert) => self.on_firing(alert),
                AlertEvent::Resolved(alert) => self.on_resolved(alert),
                AlertEvent::Refresh {
                    fingerprint,
                    last_seen,
                    value,
                } => {
                    if let Some(alert) = self.active.write().get_mut(&fingerprint) {
                        alert.last_seen = last_seen;
                        alert.value = value;
                    }
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.set_active_alerts(self.active.read().len());
        }
    }

    fn on_firing(&self, alert: Alert) {
        let fingerprint = alert.fingerprint();
        {
            let mut active = self.active.write();
            if let Some(existing) = active.get_mut(&fingerprint) {
                debug!(alert = %fingerprint, "Duplicate firing alert suppressed");
                existing.last_seen = alert.last_seen;
                existing.value = alert.value;
                return;
            }
            active.insert(fingerprint, alert.clone());
        }
        self.enqueue(Notification::from_alert(&alert));
    }

    fn on_resolved(&self, alert: Alert) {
        let fingerprint = alert.fingerprint();
        let Some(mut previous) = self.active.write().remove(&fingerprint) else {
            debug!(alert = %fingerprint, "Resolved alert was not active");
            return;
        };
        previous.last_seen = alert.last_seen.max(previous.last_seen);
        previous.resolved_at = alert.resolved_at;

        let notification = Notification::from_alert(&previous);
        {
            let mut history = self.history.lock();
            history.push_back(previous);
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }
        self.enqueue(notification);
    }

    fn enqueue(&self, notification: Notification) {
        match self.queue.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(
                    alert = %dropped.fingerprint(),
                    capacity = self.config.queue_capacity,
                    "Notification queue full, dropping notification"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_notification_dropped();
                }
            }
            Err(TrySendError::Closed(dropped)) => {
                warn!(alert = %dropped.fingerprint(), "Notification dispatcher stopped, dropping notification");
            }
        }
    }

    /// 当前活跃告警，按指纹排序
    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.active.read().values().cloned().collect();
        alerts.sort_by_key(|a| a.fingerprint());
        alerts
    }

    /// 最近解决的告警，旧的在前
    pub fn history(&self) -> Vec<Alert> {
        self.history.lock().iter().cloned().collect()
    }

    /// 启动分发任务；只能启动一次
    ///
    /// 每个通知器拥有独立的有界队列与投递任务，单个渠道阻塞或失败不影响其他渠道。
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let receiver = self.receiver.lock().take();
        tokio::spawn(async move {
            let Some(mut receiver) = receiver else {
                warn!("Alert dispatcher already started");
                return;
            };
            info!(notifiers = self.notifiers.len(), "Alert dispatcher started");

            let mut workers = JoinSet::new();
            let mut channels = Vec::with_capacity(self.notifiers.len());
            for notifier in &self.notifiers {
                let (tx, rx) = mpsc::channel(self.config.queue_capacity.max(1));
                workers.spawn(self.clone().deliver_loop(notifier.clone(), rx, cancel.clone()));
                channels.push((notifier.clone(), tx));
            }

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(notification) => self.fan_out(&channels, notification),
                        None => break,
                    }
                }
            }

            drop(channels);
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "Notifier worker panicked");
                }
            }
            info!("Alert dispatcher stopped");
        })
    }

    fn fan_out(&self, channels: &[(Arc<dyn Notifier>, mpsc::Sender<Notification>)], notification: Notification) {
        for (notifier, tx) in channels {
            if notification.severity < notifier.min_severity() {
                continue;
            }
            match tx.try_send(notification.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(dropped)) => {
                    warn!(
                        notifier = notifier.name(),
                        alert = %dropped.fingerprint(),
                        "Notifier queue full, dropping notification"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_notification_dropped();
                    }
                }
                Err(TrySendError::Closed(dropped)) => {
                    debug!(notifier = notifier.name(), alert = %dropped.fingerprint(), "Notifier worker stopped");
                }
            }
        }
    }

    /// 单个通知器的投递循环；取消时放弃进行中的重试
    async fn deliver_loop(
        self: Arc<Self>,
        notifier: Arc<dyn Notifier>,
        mut queue: mpsc::Receiver<Notification>,
        cancel: CancellationToken,
    ) {
        loop {
            let notification = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = queue.recv() => match next {
                    Some(notification) => notification,
                    None => break,
                }
            };

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(
                        notifier = notifier.name(),
                        alert = %notification.fingerprint(),
                        "Delivery abandoned on shutdown"
                    );
                    break;
                }
                result = deliver_with_retry(notifier.as_ref(), &notification, &self.config.retry) => result,
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_notification(notifier.name(), result.is_ok());
            }
            if let Err(e) = result {
                error!(
                    notifier = notifier.name(),
                    alert = %notification.fingerprint(),
                    attempts = self.config.retry.max_attempts,
                    error = %e,
                    "Notification delivery failed, giving up"
                );
                self.sink.report(PipelineError::Notify {
                    notifier: notifier.name().to_string(),
                    error: e,
                });
            }
        }
    }
}

impl AlertEventSink for AlertManager {
    fn submit(&self, events: Vec<AlertEvent>) {
        self.handle(events);
    }
}
