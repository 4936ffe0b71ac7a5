//! 文本暴露格式解析
//!
//! 格式按行原子：坏行单独报错并跳过，其余行照常返回。

use std::collections::HashMap;

use pulse_core::labels::{is_valid_label_name, is_valid_metric_name};
use pulse_core::sample::parse_value;
use pulse_core::{Labels, MetricKind, ParseError, Sample, Timestamp};

/// 一次抓取的解析结果
#[derive(Debug, Default)]
pub struct ParsedPayload {
    pub samples: Vec<Sample>,
    pub errors: Vec<ParseError>,
}

/// 解析暴露格式；没有显式时间戳的样本使用 `default_timestamp`
pub fn parse_exposition(body: &str, default_timestamp: Timestamp) -> ParsedPayload {
    let mut types: HashMap<String, MetricKind> = HashMap::new();
    let mut payload = ParsedPayload::default();

    for (idx, raw) in body.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            if let Err(reason) = parse_metadata(comment, &mut types) {
                payload.errors.push(ParseError::new(line_no, reason));
            }
            continue;
        }

        match parse_sample_line(line, default_timestamp) {
            Ok(mut sample) => {
                sample.kind = kind_for(&types, &sample.metric);
                payload.samples.push(sample);
            }
            Err(reason) => payload.errors.push(ParseError::new(line_no, reason)),
        }
    }

    payload
}

/// `# TYPE name kind`；`# HELP` 和普通注释忽略
fn parse_metadata(comment: &str, types: &mut HashMap<String, MetricKind>) -> Result<(), String> {
    let mut parts = comment.split_whitespace();
    if parts.next() != Some("TYPE") {
        return Ok(());
    }
    let name = parts.next().ok_or("TYPE line without metric name")?;
    let kind = parts.next().ok_or("TYPE line without type")?;
    if !is_valid_metric_name(name) {
        return Err(format!("invalid metric name '{}' in TYPE line", name));
    }
    types.insert(name.to_string(), MetricKind::from_type_hint(kind));
    Ok(())
}

fn kind_for(types: &HashMap<String, MetricKind>, metric: &str) -> MetricKind {
    if let Some(kind) = types.get(metric) {
        return *kind;
    }
    metric
        .strip_suffix("_total")
        .and_then(|base| types.get(base))
        .copied()
        .unwrap_or_default()
}

fn parse_sample_line(line: &str, default_timestamp: Timestamp) -> Result<Sample, String> {
    let mut cursor = Cursor::new(line);

    let metric = cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
    if !is_valid_metric_name(metric) {
        return Err(format!("invalid metric name in '{}'", line));
    }

    let labels = if cursor.eat('{') {
        parse_labels(&mut cursor)?
    } else {
        Labels::new()
    };

    let rest = cursor.rest();
    if !rest.starts_with(char::is_whitespace) {
        return Err(format!("expected whitespace after '{}'", metric));
    }
    // 丢弃 exemplar
    let rest = rest.split(" # ").next().unwrap_or_default();

    let mut fields = rest.split_whitespace();
    let value_text = fields.next().ok_or("missing sample value")?;
    let value = parse_value(value_text).ok_or_else(|| format!("invalid value '{}'", value_text))?;
    let timestamp = match fields.next() {
        Some(ts) => ts
            .parse::<Timestamp>()
            .map_err(|_| format!("invalid timestamp '{}'", ts))?,
        None => default_timestamp,
    };
    if let Some(extra) = fields.next() {
        return Err(format!("unexpected trailing field '{}'", extra));
    }

    Ok(Sample::new(metric, labels, timestamp, value))
}

fn parse_labels(cursor: &mut Cursor<'_>) -> Result<Labels, String> {
    let mut labels = Labels::new();
    loop {
        cursor.skip_whitespace();
        if cursor.eat('}') {
            return Ok(labels);
        }

        let name = cursor.take_while(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_valid_label_name(name) {
            return Err(format!("invalid label name at column {}", cursor.pos + 1));
        }
        cursor.skip_whitespace();
        if !cursor.eat('=') {
            return Err(format!("expected '=' after label '{}'", name));
        }
        cursor.skip_whitespace();
        if !cursor.eat('"') {
            return Err(format!("expected '\"' to open value of label '{}'", name));
        }
        let value = read_quoted(cursor)?;

        if labels.contains(name) {
            return Err(format!("duplicate label '{}'", name));
        }
        // 空值等同于无此标签
        if !value.is_empty() {
            labels.insert(name, value);
        }

        cursor.skip_whitespace();
        if cursor.eat(',') {
            continue;
        }
        if cursor.eat('}') {
            return Ok(labels);
        }
        return Err(format!("expected ',' or '}}' after label '{}'", name));
    }
}

/// 读取引号内的值，支持 `\\` `\"` `\n`
fn read_quoted(cursor: &mut Cursor<'_>) -> Result<String, String> {
    let mut value = String::new();
    loop {
        match cursor.bump() {
            Some('"') => return Ok(value),
            Some('\\') => match cursor.bump() {
                Some('\\') => value.push('\\'),
                Some('"') => value.push('"'),
                Some('n') => value.push('\n'),
                Some(other) => return Err(format!("invalid escape '\\{}'", other)),
                None => return Err("unterminated label value".to_string()),
            },
            Some(c) => value.push(c),
            None => return Err("unterminated label value".to_string()),
        }
    }
}

struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.input[start..self.pos]
    }

    fn skip_whitespace(&mut self) {
        self.take_while(char::is_whitespace);
    }
}
