//! Pulse 服务端：组装流水线、HTTP API、日志与关闭信号

pub mod api;
pub mod logging;
pub mod pipeline;
pub mod shutdown;

pub use api::create_router;
pub use pipeline::{Pipeline, ReloadOutcome};
