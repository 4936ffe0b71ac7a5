use config::{Config, Environment, File, FileFormat};
use std::path::Path;
use tracing::debug;

use pulse_core::ConfigError;

use crate::app::AppConfig;

/// 环境变量前缀，层级以 `__` 分隔，如 `PULSE__SERVER__LISTEN`
pub const ENV_PREFIX: &str = "PULSE";

/// 加载配置：可选 TOML 文件，再叠加环境变量覆盖，最后校验
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::io(path.display().to_string(), "file not found"));
        }
        let name = path
            .to_str()
            .ok_or_else(|| ConfigError::Invalid(format!("invalid config path {:?}", path)))?;
        builder = builder.add_source(File::new(name, FileFormat::Toml));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config: AppConfig = builder
        .build()
        .and_then(|c| c.try_deserialize())
        .map_err(|e| ConfigError::Invalid(e.to_string()))?;
    config.validate()?;

    debug!(path = ?path, "Configuration loaded");
    Ok(config)
}
