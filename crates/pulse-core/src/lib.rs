//! Pulse 公共模型：标签、样本、抓取目标、告警以及错误分类

pub mod alert;
pub mod error;
pub mod labels;
pub mod sample;
pub mod sink;
pub mod target;

pub use alert::{alert_fingerprint, Alert, AlertEvent, AlertEventSink, AlertState, Severity};
pub use error::{
    ConfigError, EvaluationError, NotifyError, OutOfOrderError, ParseError, PipelineError,
    ScrapeError, StoreError,
};
pub use labels::{Labels, ALERT_NAME_LABEL, INSTANCE_LABEL, METRIC_NAME_LABEL};
pub use sample::{MetricKind, Point, Sample};
pub use sink::{ErrorSink, LogSink, MemorySink};
pub use target::{Target, TargetDefaults};

/// 毫秒级 Unix 时间戳
pub type Timestamp = i64;

/// 当前墙钟时间（毫秒）
pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}
