use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_core::ConfigError;

use crate::app::AppConfig;
use crate::loader::load_config;

/// 配置管理器
///
/// 当前配置通过 watch 通道发布；重载失败时保留旧配置。
pub struct ConfigManager {
    path: Option<PathBuf>,
    current: watch::Sender<Arc<AppConfig>>,
    modified: Mutex<Option<SystemTime>>,
}

impl ConfigManager {
    /// 加载初始配置
    ///
    /// # 错误
    ///
    /// 初始配置无法加载或校验失败时返回 `ConfigError`。
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = load_config(path.as_deref())?;
        let modified = path.as_deref().and_then(modified_time);
        let (current, _) = watch::channel(Arc::new(config));
        Ok(Self {
            path,
            current,
            modified: Mutex::new(modified),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn current(&self) -> Arc<AppConfig> {
        self.current.borrow().clone()
    }

    /// 订阅配置变更
    pub fn subscribe(&self) -> watch::Receiver<Arc<AppConfig>> {
        self.current.subscribe()
    }

    /// 重新加载配置；内容变化时发布并返回 true
    pub async fn reload(&self) -> Result<bool, ConfigError> {
        let mut modified = self.modified.lock().await;
        let config = load_config(self.path.as_deref()).map_err(|e| {
            warn!(error = %e, "Configuration reload failed, keeping current configuration");
            e
        })?;
        *modified = self.path.as_deref().and_then(modified_time);

        let changed = self.current.send_if_modified(|current| {
            if **current == config {
                return false;
            }
            *current = Arc::new(config);
            true
        });
        if changed {
            info!("Configuration reloaded");
        } else {
            debug!("Configuration unchanged");
        }
        Ok(changed)
    }

    /// 轮询配置文件修改时间，变化时重载
    pub fn watch(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(path) = self.path.clone() else {
                return;
            };
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            info!(path = %path.display(), interval = ?interval, "Watching configuration file");

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let current = modified_time(&path);
                if current.is_none() || current == *self.modified.lock().await {
                    continue;
                }
                // 失败已记录日志，下一次文件变化时再试
                if self.reload().await.is_err() {
                    *self.modified.lock().await = current;
                }
            }
        })
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
