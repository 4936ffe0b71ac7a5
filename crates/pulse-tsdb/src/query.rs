use parking_lot::RwLock;
use std::sync::Arc;

use pulse_core::{Labels, MetricKind, Point, Timestamp};

use crate::series::Series;

/// 闭区间 `[start, end]`（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// `[at - lookback, at]`
    pub fn lookback(at: Timestamp, lookback_ms: i64) -> Self {
        Self {
            start: at.saturating_sub(lookback_ms),
            end: at,
        }
    }

    pub fn all() -> Self {
        Self {
            start: Timestamp::MIN,
            end: Timestamp::MAX,
        }
    }
}

pub(crate) type SeriesHandle = Arc<RwLock<Series>>;

/// 查询结果，可重复遍历
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    series: Vec<SeriesView>,
}

impl QueryResult {
    pub(crate) fn new(mut series: Vec<SeriesView>) -> Self {
        series.sort_by(|a, b| a.labels.cmp(&b.labels));
        Self { series }
    }

    pub fn series(&self) -> impl Iterator<Item = &SeriesView> {
        self.series.iter()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// 单条序列在查询区间上的只读视图
#[derive(Debug, Clone)]
pub struct SeriesView {
    metric: String,
    labels: Labels,
    kind: MetricKind,
    range: TimeRange,
    handle: SeriesHandle,
}

impl SeriesView {
    pub(crate) fn new(metric: String, labels: Labels, kind: MetricKind, range: TimeRange, handle: SeriesHandle) -> Self {
        Self {
            metric,
            labels,
            kind,
            range,
            handle,
        }
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// 惰性遍历区间内的点；每次调用返回新的迭代器
    ///
    /// 上界固定为创建迭代器时序列的最后时间戳，保证有限。
    pub fn points(&self) -> PointIter {
        let end = {
            let series = self.handle.read();
            series
                .last_timestamp()
                .map_or(self.range.start.saturating_sub(1), |last| last.min(self.range.end))
        };
        PointIter {
            handle: self.handle.clone(),
            next_from: self.range.start,
            end,
            done: false,
        }
    }

    /// 区间内最后一个点
    pub fn latest(&self) -> Option<Point> {
        self.handle.read().last_in(self.range.start, self.range.end)
    }

    /// 一次性拷贝区间内所有点
    pub fn collect_points(&self) -> Vec<Point> {
        self.handle.read().points_in(self.range.start, self.range.end)
    }
}

/// 点迭代器，每步单独加读锁
#[derive(Debug)]
pub struct PointIter {
    handle: SeriesHandle,
    next_from: Timestamp,
    end: Timestamp,
    done: bool,
}

impl Iterator for PointIter {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        if self.done || self.next_from > self.end {
            return None;
        }
        let point = self.handle.read().first_from(self.next_from, self.end);
        match point {
            Some(p) => {
                match p.timestamp.checked_add(1) {
                    Some(next) => self.next_from = next,
                    None => self.done = true,
                }
                Some(p)
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}
