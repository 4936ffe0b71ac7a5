use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use pulse_core::{ConfigError, Target};

/// 一次整体替换的差异统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.removed == 0
    }
}

/// 目标注册表
///
/// 以 `host:port` 为键保存抓取目标，每次变更递增版本号并通过
/// watch 通道通知抓取调度器。
pub struct TargetRegistry {
    /// 地址 -> 目标
    targets: Arc<RwLock<HashMap<String, Target>>>,

    /// 变更版本号
    version: watch::Sender<u64>,
}

impl TargetRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            targets: Arc::new(RwLock::new(HashMap::new())),
            version,
        }
    }

    /// 插入或替换目标
    ///
    /// # 错误
    /// * `ConfigError::InvalidTarget` - 地址或参数不合法
    pub async fn upsert(&self, target: Target) -> Result<(), ConfigError> {
        target.validate()?;

        let address = target.address();
        let previous = {
            let mut targets = self.targets.write().await;
            targets.insert(address.clone(), target.clone())
        };

        match previous {
            Some(old) if old == target => {
                debug!(target_address = %address, "Target unchanged");
                return Ok(());
            }
            Some(_) => info!(target_address = %address, "Target updated"),
            None => info!(target_address = %address, "Target registered"),
        }
        self.bump();
        Ok(())
    }

    /// 移除目标；进行中的抓取不受影响
    pub async fn remove(&self, address: &str) -> Option<Target> {
        let removed = self.targets.write().await.remove(address);
        if removed.is_some() {
            info!(target_address = %address, "Target removed");
            self.bump();
        }
        removed
    }

    pub async fn get(&self, address: &str) -> Option<Target> {
        self.targets.read().await.get(address).cloned()
    }

    /// 列出所有目标（无顺序保证）
    pub async fn list_targets(&self) -> Vec<Target> {
        self.targets.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.targets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.targets.read().await.is_empty()
    }

    /// 用完整目标集合替换当前内容
    ///
    /// 先校验全部目标，任一不合法则整体拒绝、保持原状。
    /// 同一地址出现多次时以最后一个为准。
    pub async fn replace_all(&self, targets: Vec<Target>) -> Result<RegistryDiff, ConfigError> {
        for target in &targets {
            target.validate()?;
        }

        let desired: HashMap<String, Target> = targets
            .into_iter()
            .map(|t| (t.address(), t))
            .collect();

        let diff = {
            let mut current = self.targets.write().await;
            let mut diff = RegistryDiff::default();
            for (address, target) in &desired {
                match current.get(address) {
                    None => diff.added += 1,
                    Some(existing) if existing != target => diff.updated += 1,
                    Some(_) => {}
                }
            }
            diff.removed = current.keys().filter(|a| !desired.contains_key(*a)).count();
            *current = desired;
            diff
        };

        if !diff.is_empty() {
            info!(
                added = diff.added,
                updated = diff.updated,
                removed = diff.removed,
                "Target set replaced"
            );
            self.bump();
        }
        Ok(diff)
    }

    /// 订阅变更通知
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}
