use serde::{Deserialize, Serialize};

use crate::labels::Labels;
use crate::Timestamp;

/// 指标类型（取自 `# TYPE` 行）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
    #[default]
    Untyped,
}

impl MetricKind {
    pub fn from_type_hint(hint: &str) -> Self {
        match hint {
            "counter" => MetricKind::Counter,
            "gauge" => MetricKind::Gauge,
            _ => MetricKind::Untyped,
        }
    }
}

/// 单个样本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub metric: String,
    pub labels: Labels,
    pub timestamp: Timestamp,
    #[serde(with = "value_format")]
    pub value: f64,
    #[serde(default)]
    pub kind: MetricKind,
}

impl Sample {
    pub fn new(metric: impl Into<String>, labels: Labels, timestamp: Timestamp, value: f64) -> Self {
        Self {
            metric: metric.into(),
            labels,
            timestamp,
            value,
            kind: MetricKind::Untyped,
        }
    }

    pub fn with_kind(mut self, kind: MetricKind) -> Self {
        self.kind = kind;
        self
    }

    /// `metric{labels}` 形式的序列标识
    pub fn series_id(&self) -> String {
        format!("{}{}", self.metric, self.labels)
    }
}

/// 序列中的数据点
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub timestamp: Timestamp,
    #[serde(with = "value_format")]
    pub value: f64,
}

impl Point {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// 解析样本值，接受 `NaN`、`+Inf`、`-Inf`
pub fn parse_value(text: &str) -> Option<f64> {
    match text {
        "NaN" | "nan" => Some(f64::NAN),
        "+Inf" | "Inf" | "+inf" | "inf" => Some(f64::INFINITY),
        "-Inf" | "-inf" => Some(f64::NEG_INFINITY),
        other => other.parse::<f64>().ok(),
    }
}

pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// JSON 中非有限值以字符串表示
pub mod value_format {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::{format_value, parse_value};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_str(&format_value(*value))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(f64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(v) => Ok(v),
            Repr::Text(text) => parse_value(&text)
                .ok_or_else(|| de::Error::custom(format!("invalid sample value '{}'", text))),
        }
    }
}
