use std::time::Duration;
use thiserror::Error;

use crate::Timestamp;

/// 配置错误（目标地址、规则、表达式、配置文件）
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid target address '{address}': {reason}")]
    InvalidTarget { address: String, reason: String },

    #[error("invalid label name '{0}'")]
    InvalidLabelName(String),

    #[error("duplicate label '{0}'")]
    DuplicateLabel(String),

    #[error("invalid rule '{rule}': {reason}")]
    InvalidRule { rule: String, reason: String },

    #[error("unsupported function or operator '{0}'")]
    Unsupported(String),

    #[error("invalid expression at offset {offset}: {reason}")]
    Expression { offset: usize, reason: String },

    #[error("invalid matcher: {0}")]
    InvalidMatcher(String),

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid_rule(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRule {
            rule: rule.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.into(),
            reason: err.to_string(),
        }
    }
}

/// 抓取失败
#[derive(Debug, Clone, Error, PartialEq)]
#[error("scrape of {target} failed at {timestamp}: {cause}")]
pub struct ScrapeError {
    pub target: String,
    pub cause: String,
    pub timestamp: Timestamp,
}

/// 暴露格式解析失败
#[derive(Debug, Clone, Error, PartialEq)]
#[error("line {line}: {reason}")]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

impl ParseError {
    pub fn new(line: usize, reason: impl Into<String>) -> Self {
        Self {
            line,
            reason: reason.into(),
        }
    }
}

/// 时间戳不大于序列最后一个时间戳
#[derive(Debug, Clone, Error, PartialEq)]
#[error("out of order sample for {series}: timestamp {timestamp} <= last {last}")]
pub struct OutOfOrderError {
    pub series: String,
    pub timestamp: Timestamp,
    pub last: Timestamp,
}

/// 规则评估错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvaluationError {
    #[error("no series found for {0}")]
    MissingSeries(String),

    #[error("type error: {0}")]
    Type(String),
}

/// 通知投递错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("receiver responded with status {0}")]
    Status(u16),

    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    OutOfOrder(#[from] OutOfOrderError),

    #[error("snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 按目标、按规则隔离上报的流水线错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error(transparent)]
    Scrape(#[from] ScrapeError),

    #[error("parse error from {target}: {error}")]
    Parse { target: String, error: ParseError },

    #[error(transparent)]
    OutOfOrder(#[from] OutOfOrderError),

    #[error("evaluation of rule {rule} failed: {error}")]
    Evaluation { rule: String, error: EvaluationError },

    #[error("notification via {notifier} failed: {error}")]
    Notify { notifier: String, error: NotifyError },
}
