use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use pulse_core::ConfigError;

use crate::model::{RuleFile, RuleSet};

/// 规则文件加载器
///
/// 路径可以是文件或目录（目录下的 `*.yml` / `*.yaml`）。所有文件解析并编译成功后
/// 才产出新的规则集，否则返回错误，调用方继续使用旧规则集。
#[derive(Debug, Clone)]
pub struct RuleLoader {
    paths: Vec<PathBuf>,
    default_interval: Duration,
}

impl RuleLoader {
    pub fn new(paths: Vec<PathBuf>, default_interval: Duration) -> Self {
        Self {
            paths,
            default_interval,
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn load(&self) -> Result<RuleSet, ConfigError> {
        let mut files = Vec::new();
        for path in self.expand()? {
            debug!(path = %path.display(), "Reading rule file");
            let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::io(path.display().to_string(), e))?;
            let file: RuleFile = serde_yaml::from_str(&text)
                .map_err(|e| ConfigError::Invalid(format!("{}: {}", path.display(), e)))?;
            files.push(file);
        }

        let set = RuleSet::compile(&files, self.default_interval)?;
        info!(files = files.len(), groups = set.groups().len(), rules = set.len(), "Rules loaded");
        Ok(set)
    }

    fn expand(&self) -> Result<Vec<PathBuf>, ConfigError> {
        let mut out = Vec::new();
        for path in &self.paths {
            if path.is_dir() {
                let entries =
                    std::fs::read_dir(path).map_err(|e| ConfigError::io(path.display().to_string(), e))?;
                let mut found = Vec::new();
                for entry in entries {
                    let entry = entry.map_err(|e| ConfigError::io(path.display().to_string(), e))?;
                    let candidate = entry.path();
                    if candidate.is_file() && is_rule_file(&candidate) {
                        found.push(candidate);
                    }
                }
                found.sort();
                out.extend(found);
            } else {
                out.push(path.clone());
            }
        }
        Ok(out)
    }
}

fn is_rule_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}
