use pulse_core::ConfigError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    /// `[...]` 中的原始时长文本
    Range(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
    Assign,
    RegexEq,
    RegexNe,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

fn error(offset: usize, reason: impl Into<String>) -> ConfigError {
    ConfigError::Expression {
        offset,
        reason: reason.into(),
    }
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, ConfigError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let (token, width) = match c {
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '{' => (Token::LBrace, 1),
            '}' => (Token::RBrace, 1),
            ',' => (Token::Comma, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '*' => (Token::Star, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '=' => match next {
                Some('=') => (Token::EqEq, 2),
                Some('~') => (Token::RegexEq, 2),
                _ => (Token::Assign, 1),
            },
            '!' => match next {
                Some('=') => (Token::NotEq, 2),
                Some('~') => (Token::RegexNe, 2),
                _ => return Err(error(offset, "expected '=' or '~' after '!'")),
            },
            '>' => match next {
                Some('=') => (Token::Ge, 2),
                _ => (Token::Gt, 1),
            },
            '<' => match next {
                Some('=') => (Token::Le, 2),
                _ => (Token::Lt, 1),
            },
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|(_, c)| *c == ']')
                    .ok_or_else(|| error(offset, "unterminated range"))?;
                let text: String = chars[i + 1..i + close].iter().map(|(_, c)| c).collect();
                (Token::Range(text.trim().to_string()), close + 1)
            }
            '"' | '\'' => {
                let (text, width) = read_string(&chars[i..], c, offset)?;
                (Token::Str(text), width)
            }
            c if c.is_ascii_digit() || (c == '.' && next.map_or(false, |n| n.is_ascii_digit())) => {
                let width = number_width(&chars[i..]);
                let text: String = chars[i..i + width].iter().map(|(_, c)| c).collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| error(offset, format!("invalid number '{}'", text)))?;
                (Token::Number(value), width)
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
                let width = chars[i..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_' || *c == ':')
                    .count();
                let text: String = chars[i..i + width].iter().map(|(_, c)| c).collect();
                (Token::Ident(text), width)
            }
            other => return Err(error(offset, format!("unexpected character '{}'", other))),
        };

        tokens.push(Spanned { token, offset });
        i += width;
    }

    tokens.push(Spanned {
        token: Token::Eof,
        offset: input.len(),
    });
    Ok(tokens)
}

fn number_width(chars: &[(usize, char)]) -> usize {
    let mut width = 0;
    let mut seen_exp = false;
    while let Some((_, c)) = chars.get(width) {
        match c {
            '0'..='9' | '.' => width += 1,
            'e' | 'E' if !seen_exp => {
                seen_exp = true;
                width += 1;
                if let Some((_, '+' | '-')) = chars.get(width) {
                    width += 1;
                }
            }
            _ => break,
        }
    }
    width
}

fn read_string(chars: &[(usize, char)], quote: char, offset: usize) -> Result<(String, usize), ConfigError> {
    let mut value = String::new();
    let mut i = 1;
    while let Some((_, c)) = chars.get(i) {
        match c {
            c if *c == quote => return Ok((value, i + 1)),
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .map(|(_, c)| *c)
                    .ok_or_else(|| error(offset, "unterminated string"))?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                i += 2;
            }
            c => {
                value.push(*c);
                i += 1;
            }
        }
    }
    Err(error(offset, "unterminated string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_selector_tokens() {
        assert_eq!(
            kinds(r#"rate(http_total{code=~"5..|4"}[5m]) > 0.5"#),
            vec![
                Token::Ident("rate".into()),
                Token::LParen,
                Token::Ident("http_total".into()),
                Token::LBrace,
                Token::Ident("code".into()),
                Token::RegexEq,
                Token::Str("5..|4".into()),
                Token::RBrace,
                Token::Range("5m".into()),
                Token::RParen,
                Token::Gt,
                Token::Number(0.5),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers_and_operators() {
        assert_eq!(
            kinds("1e3 != 2.5 <= .5"),
            vec![
                Token::Number(1000.0),
                Token::NotEq,
                Token::Number(2.5),
                Token::Le,
                Token::Number(0.5),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_errors_carry_offset() {
        match tokenize("up == 0 $") {
            Err(ConfigError::Expression { offset, .. }) => assert_eq!(offset, 8),
            other => panic!("unexpected {:?}", other),
        }
        assert!(tokenize("up[5m").is_err());
        assert!(tokenize(r#"up{a="x}"#).is_err());
    }
}
