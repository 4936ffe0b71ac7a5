use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

pub const METRIC_NAME_LABEL: &str = "__name__";
pub const INSTANCE_LABEL: &str = "instance";
pub const ALERT_NAME_LABEL: &str = "alertname";

/// 标签集合
///
/// 键唯一并按键排序存储，因此相等性与哈希和插入顺序无关。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// 从键值对构建，校验标签名并拒绝重复键
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut labels = Self::new();
        for (name, value) in pairs {
            let name = name.into();
            if !is_valid_label_name(&name) {
                return Err(ConfigError::InvalidLabelName(name));
            }
            if labels.0.contains_key(&name) {
                return Err(ConfigError::DuplicateLabel(name));
            }
            labels.0.insert(name, value.into());
        }
        Ok(labels)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.0.keys().find(|name| !is_valid_label_name(name)) {
            Some(name) => Err(ConfigError::InvalidLabelName(name.clone())),
            None => Ok(()),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 合并另一组标签，冲突时以 `other` 为准
    pub fn merge(&mut self, other: &Labels) {
        for (name, value) in &other.0 {
            self.0.insert(name.clone(), value.clone());
        }
    }

    /// 仅保留指定标签（聚合 `by`）
    pub fn keep_only(&self, names: &[String]) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|(k, _)| names.iter().any(|n| n == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// 去掉指定标签（聚合 `without`）
    pub fn without(&self, names: &[String]) -> Labels {
        Labels(
            self.0
                .iter()
                .filter(|(k, _)| !names.iter().any(|n| n == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// 稳定指纹：`k1="v1",k2="v2"`
    pub fn fingerprint(&self) -> String {
        let mut out = String::new();
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(name);
            out.push_str("=\"");
            push_escaped(&mut out, value);
            out.push('"');
        }
        out
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.fingerprint())
    }
}

impl FromIterator<(String, String)> for Labels {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Labels(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, String>> for Labels {
    fn from(map: BTreeMap<String, String>) -> Self {
        Labels(map)
    }
}

fn push_escaped(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

/// 标签名：`[a-zA-Z_][a-zA-Z0-9_]*`
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// 指标名：`[a-zA-Z_:][a-zA-Z0-9_:]*`
pub fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_independent_equality() {
        let a = Labels::from_pairs([("job", "node"), ("env", "prod")]).unwrap();
        let b = Labels::from_pairs([("env", "prod"), ("job", "node")]).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.to_string(), r#"{env="prod",job="node"}"#);
    }

    #[test]
    fn test_rejects_duplicate_and_invalid_names() {
        assert_eq!(
            Labels::from_pairs([("job", "a"), ("job", "b")]),
            Err(ConfigError::DuplicateLabel("job".into()))
        );
        assert!(matches!(
            Labels::from_pairs([("1job", "a")]),
            Err(ConfigError::InvalidLabelName(_))
        ));
    }

    #[test]
    fn test_grouping_helpers() {
        let labels =
            Labels::from_pairs([("job", "node"), ("instance", "a:1"), ("env", "prod")]).unwrap();

        let by = labels.keep_only(&["job".to_string()]);
        assert_eq!(by.len(), 1);
        assert_eq!(by.get("job"), Some("node"));

        let without = labels.without(&["instance".to_string()]);
        assert!(!without.contains("instance"));
        assert_eq!(without.len(), 2);
    }

    #[test]
    fn test_fingerprint_escapes_values() {
        let labels = Labels::from_pairs([("path", "a\"b\\c")]).unwrap();
        assert_eq!(labels.fingerprint(), r#"path="a\"b\\c""#);
    }

    #[test]
    fn test_metric_name_rules() {
        assert!(is_valid_metric_name("node_cpu:rate5m"));
        assert!(!is_valid_metric_name("9lives"));
        assert!(!is_valid_label_name("a:b"));
    }
}
