use pulse_core::labels::is_valid_label_name;
use pulse_core::sample::format_value;
use pulse_core::{ConfigError, Labels};

/// 渲染注解模板，支持 `{{ $labels.<name> }}` 与 `{{ $value }}`
///
/// 缺失的标签渲染为空串。
pub fn render(template: &str, labels: &Labels, value: f64) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };
        match Placeholder::parse(after[..end].trim()) {
            Some(Placeholder::Value) => out.push_str(&format_value(value)),
            Some(Placeholder::Label(name)) => out.push_str(labels.get(name).unwrap_or("")),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

/// 加载期校验：未闭合或未知的占位符视为配置错误
pub fn validate(template: &str) -> Result<(), ConfigError> {
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| ConfigError::Invalid(format!("unterminated placeholder in '{}'", template)))?;
        let inner = after[..end].trim();
        if Placeholder::parse(inner).is_none() {
            return Err(ConfigError::Invalid(format!("unknown placeholder '{{{{ {} }}}}'", inner)));
        }
        rest = &after[end + 2..];
    }
    Ok(())
}

enum Placeholder<'a> {
    Value,
    Label(&'a str),
}

impl<'a> Placeholder<'a> {
    fn parse(inner: &'a str) -> Option<Self> {
        if inner == "$value" {
            return Some(Placeholder::Value);
        }
        inner
            .strip_prefix("$labels.")
            .filter(|name| is_valid_label_name(name))
            .map(Placeholder::Label)
    }
}
