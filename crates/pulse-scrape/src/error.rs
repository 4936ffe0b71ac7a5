use std::time::Duration;
use thiserror::Error;

/// 拉取失败原因
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid target URL: {0}")]
    Url(String),
}
