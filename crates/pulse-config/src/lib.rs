//! 配置：TOML 文件 + `PULSE__` 环境变量覆盖，校验与热加载

pub mod app;
pub mod loader;
pub mod manager;

pub use app::{
    AlertingConfig, AppConfig, DiscoveryConfig, LogFormat, LoggingConfig, RulesConfig, ScrapeConfig,
    ServerConfig, StaticTargetGroup, StorageConfig, WebhookConfig,
};
pub use loader::{load_config, ENV_PREFIX};
pub use manager::ConfigManager;
