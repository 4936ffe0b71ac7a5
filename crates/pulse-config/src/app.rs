use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use pulse_core::{ConfigError, Labels, Severity, Target, TargetDefaults};

/// 应用配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub scrape: ScrapeConfig,
    pub discovery: DiscoveryConfig,
    pub rules: RulesConfig,
    pub alerting: AlertingConfig,
    pub logging: LoggingConfig,
}

/// HTTP 服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// 配置文件轮询间隔
    #[serde(with = "humantime_serde")]
    pub reload_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9464".to_string(),
            reload_interval: Duration::from_secs(10),
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub max_points_per_series: usize,
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,
    /// 快照文件；为空则不持久化
    pub snapshot_path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub snapshot_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_points_per_series: 10_000,
            max_age: Duration::from_secs(6 * 3600),
            snapshot_path: None,
            snapshot_interval: Duration::from_secs(300),
            purge_interval: Duration::from_secs(60),
        }
    }
}

/// 抓取配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub metrics_path: String,
    pub scheme: String,
    /// 任一坏行即丢弃整次抓取
    pub strict_parsing: bool,
    pub targets: Vec<StaticTargetGroup>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        let defaults = TargetDefaults::default();
        Self {
            interval: defaults.scrape_interval,
            timeout: defaults.scrape_timeout,
            metrics_path: defaults.metrics_path,
            scheme: defaults.scheme,
            strict_parsing: false,
            targets: Vec::new(),
        }
    }
}

impl ScrapeConfig {
    pub fn target_defaults(&self) -> TargetDefaults {
        TargetDefaults {
            scrape_interval: self.interval,
            scrape_timeout: self.timeout,
            metrics_path: self.metrics_path.clone(),
            scheme: self.scheme.clone(),
        }
    }
}

/// 一组静态目标，共享标签与可选的覆盖参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticTargetGroup {
    pub targets: Vec<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub metrics_path: Option<String>,
    #[serde(default)]
    pub scheme: Option<String>,
}

/// 文件发现配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub files: Vec<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            refresh_interval: Duration::from_secs(30),
        }
    }
}

/// 规则配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// 规则文件或目录
    pub files: Vec<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub evaluation_interval: Duration,
    /// 即时选择器回看窗口
    #[serde(with = "humantime_serde")]
    pub lookback: Duration,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            files: Vec::new(),
            evaluation_interval: Duration::from_secs(15),
            lookback: Duration::from_secs(300),
        }
    }
}

/// 告警分发配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub queue_capacity: usize,
    pub history_limit: usize,
    /// 是否把通知写入日志
    pub log_notifications: bool,
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            history_limit: 1000,
            log_notifications: true,
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            webhooks: Vec::new(),
        }
    }
}

/// Webhook 通知渠道
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
}

fn default_min_severity() -> Severity {
    Severity::Info
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// 日志配置；`RUST_LOG` 优先
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// 校验配置
    ///
    /// # 错误
    ///
    /// 第一个不合法的字段以 `ConfigError` 返回。
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .listen
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Invalid(format!("server.listen '{}' is not a socket address", self.server.listen)))?;
        non_zero("server.reload_interval", self.server.reload_interval)?;

        if self.storage.max_points_per_series == 0 {
            return Err(ConfigError::Invalid("storage.max_points_per_series must be > 0".into()));
        }
        non_zero("storage.max_age", self.storage.max_age)?;
        non_zero("storage.snapshot_interval", self.storage.snapshot_interval)?;
        non_zero("storage.purge_interval", self.storage.purge_interval)?;

        // 目标参数在解析时校验
        self.static_targets()?;
        non_zero("discovery.refresh_interval", self.discovery.refresh_interval)?;

        non_zero("rules.evaluation_interval", self.rules.evaluation_interval)?;
        non_zero("rules.lookback", self.rules.lookback)?;

        let alerting = &self.alerting;
        if alerting.queue_capacity == 0 {
            return Err(ConfigError::Invalid("alerting.queue_capacity must be > 0".into()));
        }
        if alerting.max_attempts == 0 {
            return Err(ConfigError::Invalid("alerting.max_attempts must be > 0".into()));
        }
        non_zero("alerting.timeout", alerting.timeout)?;
        if alerting.initial_backoff > alerting.max_backoff {
            return Err(ConfigError::Invalid(
                "alerting.initial_backoff must not exceed alerting.max_backoff".into(),
            ));
        }

        let mut names = HashSet::new();
        for webhook in &alerting.webhooks {
            if !names.insert(webhook.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate webhook '{}'", webhook.name)));
            }
            let url = url::Url::parse(&webhook.url)
                .map_err(|e| ConfigError::Invalid(format!("webhook '{}': {}", webhook.name, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "webhook '{}' must use http or https",
                    webhook.name
                )));
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level is empty".into()));
        }
        Ok(())
    }

    /// 展开静态目标组
    pub fn static_targets(&self) -> Result<Vec<Target>, ConfigError> {
        let base = self.scrape.target_defaults();
        let mut seen = HashSet::new();
        let mut targets = Vec::new();

        for group in &self.scrape.targets {
            let defaults = TargetDefaults {
                scrape_interval: group.interval.unwrap_or(base.scrape_interval),
                scrape_timeout: group.timeout.unwrap_or(base.scrape_timeout),
                metrics_path: group.metrics_path.clone().unwrap_or_else(|| base.metrics_path.clone()),
                scheme: group.scheme.clone().unwrap_or_else(|| base.scheme.clone()),
            };
            let labels = Labels::from_pairs(group.labels.clone())?;

            for address in &group.targets {
                let target = Target::parse_with(address, &defaults)?.with_labels(labels.clone());
                if !seen.insert(target.address()) {
                    return Err(ConfigError::InvalidTarget {
                        address: address.clone(),
                        reason: "listed more than once".to_string(),
                    });
                }
                targets.push(target);
            }
        }
        Ok(targets)
    }

    /// 序列化为 TOML（`--check-config` 输出生效配置）
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

fn non_zero(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::Invalid(format!("{} must be > 0", field)));
    }
    Ok(())
}
