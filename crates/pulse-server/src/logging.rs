use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

use pulse_config::{LogFormat, LoggingConfig};

/// 日志过滤器；设置了 `RUST_LOG` 时优先使用
pub fn env_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.level)?),
    }
}

/// 安装全局 tracing subscriber，只能调用一次
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config)?)
        .with_target(true);

    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    result.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
