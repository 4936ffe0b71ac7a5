use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use pulse_core::{Labels, MetricKind, OutOfOrderError, Sample, Timestamp};

use crate::matcher::LabelMatcher;
use crate::query::{QueryResult, SeriesHandle, SeriesView, TimeRange};
use crate::retention::{PurgeStats, RetentionPolicy};
use crate::series::Series;

type SeriesFamily = Arc<DashMap<Labels, SeriesHandle>>;

/// 序列概要（API 展示用）
#[derive(Debug, Clone, Serialize)]
pub struct SeriesInfo {
    pub metric: String,
    pub labels: Labels,
    pub kind: MetricKind,
    pub points: usize,
    pub first_timestamp: Option<Timestamp>,
    pub last_timestamp: Option<Timestamp>,
}

/// 内存时序存储
///
/// 指标名 -> 标签集合 -> 序列，追加只锁单条序列。
pub struct TimeSeriesStore {
    metrics: DashMap<String, SeriesFamily>,
    retention: RetentionPolicy,
}

impl TimeSeriesStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            metrics: DashMap::new(),
            retention,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// 追加样本；乱序或重复时间戳返回 `OutOfOrderError`，序列不变
    pub fn append(&self, sample: &Sample) -> Result<(), OutOfOrderError> {
        let handle = self.series_handle(&sample.metric, &sample.labels, sample.kind);
        let mut series = handle.write();
        series.append(sample.timestamp, sample.value)
    }

    fn family(&self, metric: &str) -> SeriesFamily {
        if let Some(family) = self.metrics.get(metric) {
            return family.value().clone();
        }
        self.metrics
            .entry(metric.to_string())
            .or_insert_with(|| Arc::new(DashMap::new()))
            .value()
            .clone()
    }

    fn series_handle(&self, metric: &str, labels: &Labels, kind: MetricKind) -> SeriesHandle {
        let family = self.family(metric);
        if let Some(handle) = family.get(labels) {
            return handle.value().clone();
        }
        let retention = self.retention;
        let handle = family
            .entry(labels.clone())
            .or_insert_with(|| {
                debug!(metric = %metric, labels = %labels, "New series");
                Arc::new(RwLock::new(Series::new(
                    metric.to_string(),
                    labels.clone(),
                    kind,
                    retention,
                )))
            })
            .value()
            .clone();
        handle
    }

    /// 按指标名和匹配器查询；结果惰性读取
    pub fn query(&self, metric: &str, matchers: &[LabelMatcher], range: TimeRange) -> QueryResult {
        let family = match self.metrics.get(metric) {
            Some(family) => family.value().clone(),
            None => return QueryResult::default(),
        };

        let views = family
            .iter()
            .filter(|entry| matchers.iter().all(|m| m.matches(entry.key())))
            .map(|entry| {
                let kind = entry.value().read().kind();
                SeriesView::new(
                    metric.to_string(),
                    entry.key().clone(),
                    kind,
                    range,
                    entry.value().clone(),
                )
            })
            .collect();

        QueryResult::new(views)
    }

    pub fn series_count(&self) -> usize {
        self.metrics.iter().map(|family| family.value().len()).sum()
    }

    pub fn metric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.metrics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// 列出序列；`metric` 为空时列出全部
    pub fn list_series(&self, metric: Option<&str>) -> Vec<SeriesInfo> {
        let families: Vec<SeriesFamily> = match metric {
            Some(name) => self.metrics.get(name).map(|f| f.value().clone()).into_iter().collect(),
            None => self.metrics.iter().map(|f| f.value().clone()).collect(),
        };

        let mut infos: Vec<SeriesInfo> = families
            .iter()
            .flat_map(|family| {
                family
                    .iter()
                    .map(|entry| {
                        let series = entry.value().read();
                        SeriesInfo {
                            metric: series.metric().to_string(),
                            labels: series.labels().clone(),
                            kind: series.kind(),
                            points: series.len(),
                            first_timestamp: series.first_timestamp(),
                            last_timestamp: series.last_timestamp(),
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        infos.sort_by(|a, b| (&a.metric, &a.labels).cmp(&(&b.metric, &b.labels)));
        infos
    }

    /// 删除最新点早于 `now - max_age` 的序列
    ///
    /// 由维护任务周期调用，不在写入路径上执行。
    pub fn purge_stale(&self, now: Timestamp) -> PurgeStats {
        let cutoff = match self.retention.cutoff(now) {
            Some(cutoff) => cutoff,
            None => {
                return PurgeStats {
                    removed_series: 0,
                    remaining_series: self.series_count(),
                }
            }
        };

        let mut removed = 0;
        for family in self.metrics.iter() {
            family.value().retain(|_, handle| {
                let fresh = handle
                    .read()
                    .last_timestamp()
                    .map_or(false, |last| last >= cutoff);
                // 正在被写入或查询持有的序列留到下一轮
                let keep = fresh || Arc::strong_count(handle) > 1;
                if !keep {
                    removed += 1;
                }
                keep
            });
        }
        self.metrics
            .retain(|_, family| !family.is_empty() || Arc::strong_count(family) > 1);

        let stats = PurgeStats {
            removed_series: removed,
            remaining_series: self.series_count(),
        };
        if removed > 0 {
            info!(
                removed = stats.removed_series,
                remaining = stats.remaining_series,
                "Purged stale series"
            );
        }
        stats
    }

    /// 遍历全部序列（快照使用）
    pub(crate) fn for_each_series(&self, mut f: impl FnMut(&Series)) {
        let families: Vec<SeriesFamily> = self.metrics.iter().map(|f| f.value().clone()).collect();
        for family in families {
            for entry in family.iter() {
                f(&*entry.value().read());
            }
        }
    }

    /// 恢复时直接装入整条序列
    pub(crate) fn insert_series(&self, series: Series) {
        let family = self.family(series.metric());
        family.insert(series.labels().clone(), Arc::new(RwLock::new(series)));
    }
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new(RetentionPolicy::default())
    }
}
