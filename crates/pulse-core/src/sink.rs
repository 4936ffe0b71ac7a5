use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::error::PipelineError;

/// 错误上报接口，调度循环通过它隔离单个目标或规则的失败
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: PipelineError);
}

/// 只写日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ErrorSink for LogSink {
    fn report(&self, error: PipelineError) {
        match &error {
            PipelineError::OutOfOrder(_) => debug!(error = %error, "Pipeline error"),
            _ => warn!(error = %error, "Pipeline error"),
        }
    }
}

/// 保留最近 N 条错误
pub struct MemorySink {
    errors: Mutex<VecDeque<PipelineError>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new(capacity: usize) -> Self {
        Self {
            errors: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn errors(&self) -> Vec<PipelineError> {
        self.errors.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }

    pub fn clear(&self) {
        self.errors.lock().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ErrorSink for MemorySink {
    fn report(&self, error: PipelineError) {
        let mut errors = self.errors.lock();
        if errors.len() >= self.capacity {
            errors.pop_front();
        }
        errors.push_back(error);
    }
}
