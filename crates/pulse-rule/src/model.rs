use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use pulse_core::labels::is_valid_metric_name;
use pulse_core::{ConfigError, Labels, Severity};

use crate::expr::{parse_expr, Expr, ValueType};
use crate::template;

const SEVERITY_LABEL: &str = "severity";

/// 规则文件（YAML）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleFile {
    #[serde(default)]
    pub groups: Vec<RuleGroupDef>,
}

/// 规则组定义
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleGroupDef {
    pub name: String,

    /// 评估间隔，缺省使用全局间隔
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,

    #[serde(default)]
    pub rules: Vec<RuleDef>,
}

/// 单条告警规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleDef {
    pub alert: String,
    pub expr: String,

    #[serde(default, rename = "for", with = "humantime_serde")]
    pub for_duration: Option<Duration>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// 编译后的规则
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub name: String,
    pub group: String,
    pub expr: Expr,
    pub expr_source: String,
    pub interval: Duration,
    pub for_duration: Duration,
    pub labels: Labels,
    pub severity: Severity,
    pub annotations: BTreeMap<String, String>,
}

impl Rule {
    /// 编译一条规则定义
    ///
    /// # 错误
    ///
    /// 名称、表达式、标签或注解模板非法时返回 `ConfigError`。
    pub fn compile(def: &RuleDef, group: &str, interval: Duration) -> Result<Self, ConfigError> {
        if !is_valid_metric_name(&def.alert) {
            return Err(ConfigError::invalid_rule(&def.alert, "invalid alert name"));
        }

        let expr = parse_expr(&def.expr).map_err(|e| ConfigError::invalid_rule(&def.alert, e.to_string()))?;
        if expr.value_type() == ValueType::Range {
            return Err(ConfigError::invalid_rule(
                &def.alert,
                "expression must be an instant vector or scalar",
            ));
        }

        let labels = Labels::from_pairs(def.labels.clone())
            .map_err(|e| ConfigError::invalid_rule(&def.alert, e.to_string()))?;
        let severity = match labels.get(SEVERITY_LABEL) {
            Some(value) => value
                .parse()
                .map_err(|e: ConfigError| ConfigError::invalid_rule(&def.alert, e.to_string()))?,
            None => Severity::default(),
        };

        for (name, text) in &def.annotations {
            template::validate(text).map_err(|e| {
                ConfigError::invalid_rule(&def.alert, format!("annotation '{}': {}", name, e))
            })?;
        }

        Ok(Self {
            name: def.alert.clone(),
            group: group.to_string(),
            expr,
            expr_source: def.expr.trim().to_string(),
            interval,
            for_duration: def.for_duration.unwrap_or_default(),
            labels,
            severity,
            annotations: def.annotations.clone(),
        })
    }

    /// 名称、表达式、标签、持续时间与注解都相同才视为同一条规则（保留状态）
    ///
    /// 标签决定告警指纹，标签变化后旧实例必须按旧规则解决。
    pub fn same_identity(&self, other: &Rule) -> bool {
        self.name == other.name
            && self.expr_source == other.expr_source
            && self.labels == other.labels
            && self.severity == other.severity
            && self.for_duration == other.for_duration
            && self.annotations == other.annotations
    }
}

/// 规则组：同组规则共享一个评估计时器
#[derive(Debug, Clone, PartialEq)]
pub struct RuleGroup {
    pub name: String,
    pub interval: Duration,
    pub rules: Vec<Arc<Rule>>,
}

/// 一次加载得到的完整规则集
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    groups: Vec<RuleGroup>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// 编译全部规则文件；任一失败则整体失败
    pub fn compile(files: &[RuleFile], default_interval: Duration) -> Result<Self, ConfigError> {
        let mut group_names = HashSet::new();
        let mut rule_names = HashSet::new();
        let mut groups = Vec::new();

        for file in files {
            for def in &file.groups {
                if def.name.trim().is_empty() {
                    return Err(ConfigError::Invalid("rule group name is empty".to_string()));
                }
                if !group_names.insert(def.name.clone()) {
                    return Err(ConfigError::Invalid(format!("duplicate rule group '{}'", def.name)));
                }

                let interval = def.interval.unwrap_or(default_interval);
                if interval.is_zero() {
                    return Err(ConfigError::Invalid(format!(
                        "rule group '{}' has a zero interval",
                        def.name
                    )));
                }

                let mut rules = Vec::with_capacity(def.rules.len());
                for rule_def in &def.rules {
                    let rule = Rule::compile(rule_def, &def.name, interval)?;
                    if !rule_names.insert(rule.name.clone()) {
                        return Err(ConfigError::invalid_rule(&rule.name, "duplicate rule name"));
                    }
                    rules.push(Arc::new(rule));
                }

                groups.push(RuleGroup {
                    name: def.name.clone(),
                    interval,
                    rules,
                });
            }
        }

        Ok(Self { groups })
    }

    /// 从单个 YAML 文档编译
    pub fn from_yaml(text: &str, default_interval: Duration) -> Result<Self, ConfigError> {
        let file: RuleFile =
            serde_yaml::from_str(text).map_err(|e| ConfigError::Invalid(format!("invalid rule file: {}", e)))?;
        Self::compile(&[file], default_interval)
    }

    pub fn groups(&self) -> &[RuleGroup] {
        &self.groups
    }

    pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.groups.iter().flat_map(|g| g.rules.iter())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Rule>> {
        self.rules().find(|r| r.name == name)
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.rules.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
groups:
  - name: node
    interval: 30s
    rules:
      - alert: InstanceDown
        expr: up == 0
        for: 1m
        labels:
          severity: critical
        annotations:
          summary: "{{ $labels.instance }} is down"
      - alert: HighLoad
        expr: avg by (instance) (load1) > 4
  - name: api
    rules:
      - alert: ErrorRate
        expr: rate(errors_total[5m]) > 0.1
"#;

    #[test]
    fn test_compile_rule_file() {
        let set = RuleSet::from_yaml(RULES, Duration::from_secs(15)).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.groups().len(), 2);

        let down = set.get("InstanceDown").unwrap();
        assert_eq!(down.interval, Duration::from_secs(30));
        assert_eq!(down.for_duration, Duration::from_secs(60));
        assert_eq!(down.severity, Severity::Critical);
        assert_eq!(down.group, "node");

        let error_rate = set.get("ErrorRate").unwrap();
        assert_eq!(error_rate.interval, Duration::from_secs(15));
        assert_eq!(error_rate.for_duration, Duration::ZERO);
        assert_eq!(error_rate.severity, Severity::Warning);
    }

    #[test]
    fn test_rejects_bad_rules() {
        let interval = Duration::from_secs(15);
        let unknown_fn = "groups: [{name: g, rules: [{alert: A, expr: 'histogram_quantile(0.9, x)'}]}]";
        assert!(RuleSet::from_yaml(unknown_fn, interval).is_err());

        let duplicate = "groups: [{name: g, rules: [{alert: A, expr: up}, {alert: A, expr: up}]}]";
        assert!(matches!(
            RuleSet::from_yaml(duplicate, interval),
            Err(ConfigError::InvalidRule { .. })
        ));

        let bad_severity = "groups: [{name: g, rules: [{alert: A, expr: up, labels: {severity: loud}}]}]";
        assert!(RuleSet::from_yaml(bad_severity, interval).is_err());

        let bad_template = "groups: [{name: g, rules: [{alert: A, expr: up, annotations: {s: '{{ $foo }}'}}]}]";
        assert!(RuleSet::from_yaml(bad_template, interval).is_err());

        let range = "groups: [{name: g, rules: [{alert: A, expr: 'up[5m]'}]}]";
        assert!(RuleSet::from_yaml(range, interval).is_err());

        let unknown_field = "groups: [{name: g, rules: [{alert: A, expr: up, keep_firing_for: 1m}]}]";
        assert!(RuleSet::from_yaml(unknown_field, interval).is_err());
    }
}
