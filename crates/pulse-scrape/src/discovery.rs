use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_core::{ConfigError, Labels, Target, TargetDefaults};

use crate::registry::{RegistryDiff, TargetRegistry};

/// 目标发现来源
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn name(&self) -> &str;
    async fn discover(&self) -> Result<Vec<Target>, ConfigError>;
}

/// 配置文件中的静态目标
pub struct StaticDiscovery {
    targets: Vec<Target>,
}

impl StaticDiscovery {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }
}

#[async_trait]
impl DiscoverySource for StaticDiscovery {
    fn name(&self) -> &str {
        "static"
    }

    async fn discover(&self) -> Result<Vec<Target>, ConfigError> {
        Ok(self.targets.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TargetGroup {
    targets: Vec<String>,
    #[serde(default)]
    labels: Labels,
}

/// 文件发现：`[{"targets": ["host:port"], "labels": {...}}]`
pub struct FileDiscovery {
    path: PathBuf,
    defaults: TargetDefaults,
}

impl FileDiscovery {
    pub fn new(path: impl Into<PathBuf>, defaults: TargetDefaults) -> Self {
        Self {
            path: path.into(),
            defaults,
        }
    }
}

#[async_trait]
impl DiscoverySource for FileDiscovery {
    fn name(&self) -> &str {
        "file"
    }

    async fn discover(&self) -> Result<Vec<Target>, ConfigError> {
        let path = self.path.display().to_string();
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConfigError::io(&path, e))?;
        let groups: Vec<TargetGroup> = serde_json::from_str(&body)
            .map_err(|e| ConfigError::Invalid(format!("{}: {}", path, e)))?;

        let mut targets = Vec::new();
        for group in groups {
            group.labels.validate()?;
            for address in group.targets {
                let target = Target::parse_with(&address, &self.defaults)?
                    .with_labels(group.labels.clone());
                targets.push(target);
            }
        }
        debug!(path = %path, count = targets.len(), "File discovery read targets");
        Ok(targets)
    }
}

/// 发现管理器：周期刷新并整体替换注册表内容
pub struct DiscoveryManager {
    registry: Arc<TargetRegistry>,
    sources: Vec<Box<dyn DiscoverySource>>,
    refresh_interval: Duration,
}

impl DiscoveryManager {
    pub fn new(registry: Arc<TargetRegistry>, refresh_interval: Duration) -> Self {
        Self {
            registry,
            sources: Vec::new(),
            refresh_interval,
        }
    }

    pub fn with_source(mut self, source: Box<dyn DiscoverySource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 汇总所有来源后替换注册表；任一来源失败则保持原目标集
    pub async fn refresh(&self) -> Result<RegistryDiff, ConfigError> {
        let mut targets = Vec::new();
        for source in &self.sources {
            let found = source.discover().await.map_err(|e| {
                warn!(source = source.name(), error = %e, "Discovery failed, keeping previous targets");
                e
            })?;
            targets.extend(found);
        }
        self.registry.replace_all(targets).await.map_err(|e| {
            warn!(error = %e, "Discovered targets rejected, keeping previous targets");
            e
        })
    }

    /// 周期刷新直至取消
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            sources = self.sources.len(),
            interval = ?self.refresh_interval,
            "Discovery started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.refresh().await {
                debug!(error = %e, "Discovery refresh skipped");
            }
        }
        info!("Discovery stopped");
    }
}
