use std::collections::VecDeque;

use pulse_core::{Labels, MetricKind, OutOfOrderError, Point, Timestamp};

use crate::retention::RetentionPolicy;

/// 单条时间序列，时间戳严格递增
#[derive(Debug, Clone)]
pub struct Series {
    metric: String,
    labels: Labels,
    kind: MetricKind,
    points: VecDeque<Point>,
    retention: RetentionPolicy,
}

impl Series {
    pub fn new(metric: String, labels: Labels, kind: MetricKind, retention: RetentionPolicy) -> Self {
        Self {
            metric,
            labels,
            kind,
            points: VecDeque::new(),
            retention,
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

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.points.front().map(|p| p.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.points.back().map(|p| p.timestamp)
    }

    /// 追加数据点；时间戳不大于最后一个点时拒绝且不修改序列
    pub fn append(&mut self, timestamp: Timestamp, value: f64) -> Result<(), OutOfOrderError> {
        if let Some(last) = self.points.back() {
            if timestamp <= last.timestamp {
                return Err(OutOfOrderError {
                    series: format!("{}{}", self.metric, self.labels),
                    timestamp,
                    last: last.timestamp,
                });
            }
        }

        self.points.push_back(Point::new(timestamp, value));
        self.enforce_retention(timestamp);
        Ok(())
    }

    /// 写入时裁剪：先按点数，再按相对最新点的时间跨度
    fn enforce_retention(&mut self, newest: Timestamp) {
        if let Some(max_points) = self.retention.max_points {
            while self.points.len() > max_points {
                self.points.pop_front();
            }
        }
        if let Some(cutoff) = self.retention.cutoff(newest) {
            while matches!(self.points.front(), Some(p) if p.timestamp < cutoff) {
                self.points.pop_front();
            }
        }
    }

    /// 第一个时间戳 >= `from` 且 <= `until` 的点
    pub fn first_from(&self, from: Timestamp, until: Timestamp) -> Option<Point> {
        let idx = self.points.partition_point(|p| p.timestamp < from);
        self.points
            .get(idx)
            .copied()
            .filter(|p| p.timestamp <= until)
    }

    /// 区间内的最后一个点
    pub fn last_in(&self, start: Timestamp, end: Timestamp) -> Option<Point> {
        let idx = self.points.partition_point(|p| p.timestamp <= end);
        if idx == 0 {
            return None;
        }
        self.points
            .get(idx - 1)
            .copied()
            .filter(|p| p.timestamp >= start)
    }

    pub fn points_in(&self, start: Timestamp, end: Timestamp) -> Vec<Point> {
        let from = self.points.partition_point(|p| p.timestamp < start);
        let to = self.points.partition_point(|p| p.timestamp <= end);
        self.points.range(from..to.max(from)).copied().collect()
    }

    pub fn points(&self) -> impl Iterator<Item = &Point> {
        self.points.iter()
    }
}
