use std::fmt;

use pulse_core::{ConfigError, Labels};

/// 匹配运算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    /// `=~"a|b"`
    In,
    /// `!~"a|b"`
    NotIn,
}

/// 标签匹配器
///
/// `=~` / `!~` 只支持字面量的 `|` 选择，不是完整的正则。
/// 缺失的标签按空字符串参与匹配。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub values: Vec<String>,
}

const REGEX_META: &[char] = &['.', '*', '+', '?', '(', ')', '[', ']', '{', '}', '^', '$', '\\'];

impl LabelMatcher {
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::Equal,
            values: vec![value.into()],
        }
    }

    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MatchOp::NotEqual,
            values: vec![value.into()],
        }
    }

    /// 解析 `a|b|c` 形式的集合；含正则元字符时报错
    pub fn set(name: impl Into<String>, pattern: &str, negate: bool) -> Result<Self, ConfigError> {
        let name = name.into();
        if let Some(c) = pattern.chars().find(|c| REGEX_META.contains(c)) {
            return Err(ConfigError::InvalidMatcher(format!(
                "{}: '{}' in \"{}\" is not supported, only literal alternation (a|b)",
                name, c, pattern
            )));
        }

        Ok(Self {
            name,
            op: if negate { MatchOp::NotIn } else { MatchOp::In },
            values: pattern.split('|').map(str::to_string).collect(),
        })
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        let value = labels.get(&self.name).unwrap_or("");
        let hit = self.values.iter().any(|v| v == value);
        match self.op {
            MatchOp::Equal | MatchOp::In => hit,
            MatchOp::NotEqual | MatchOp::NotIn => !hit,
        }
    }

    /// 等值匹配器可以确定结果序列上的标签值（`absent` 使用）
    pub fn equality_value(&self) -> Option<&str> {
        match (self.op, self.values.as_slice()) {
            (MatchOp::Equal, [v]) | (MatchOp::In, [v]) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            MatchOp::Equal => "=",
            MatchOp::NotEqual => "!=",
            MatchOp::In => "=~",
            MatchOp::NotIn => "!~",
        };
        write!(f, "{}{}{:?}", self.name, op, self.values.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Labels {
        Labels::from_pairs([("job", "node"), ("env", "prod")]).unwrap()
    }

    #[test]
    fn test_equality_matchers() {
        assert!(LabelMatcher::equal("job", "node").matches(&labels()));
        assert!(!LabelMatcher::not_equal("job", "node").matches(&labels()));
        // 缺失标签视为空值
        assert!(LabelMatcher::equal("zone", "").matches(&labels()));
    }

    #[test]
    fn test_set_membership() {
        let m = LabelMatcher::set("env", "dev|prod", false).unwrap();
        assert!(m.matches(&labels()));

        let m = LabelMatcher::set("env", "dev|staging", true).unwrap();
        assert!(m.matches(&labels()));
    }

    #[test]
    fn test_rejects_regex_constructs() {
        assert!(matches!(
            LabelMatcher::set("env", "pro.*", false),
            Err(ConfigError::InvalidMatcher(_))
        ));
    }

    #[test]
    fn test_display() {
        let m = LabelMatcher::set("env", "a|b", false).unwrap();
        assert_eq!(m.to_string(), r#"env=~"a|b""#);
    }
}
