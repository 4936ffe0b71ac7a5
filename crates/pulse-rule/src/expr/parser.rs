use std::time::Duration;

use pulse_core::labels::is_valid_label_name;
use pulse_core::ConfigError;
use pulse_tsdb::LabelMatcher;

use super::ast::{AggregateOp, BinaryOp, Expr, Function, Grouping, Selector, ValueType};
use super::lexer::{tokenize, Spanned, Token};

/// 解析并做类型检查；不支持的函数或运算在此报 `ConfigError`
pub fn parse_expr(input: &str) -> Result<Expr, ConfigError> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let expr = parser.parse_or()?;
    if parser.peek() != &Token::Eof {
        return Err(parser.error("unexpected trailing input"));
    }
    if expr.value_type() == ValueType::Range {
        return Err(parser.error("range selector must be wrapped in a function"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, ahead: usize) -> &Token {
        &self.tokens[(self.pos + ahead).min(self.tokens.len() - 1)].token
    }

    fn offset(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].offset
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, reason: impl Into<String>) -> ConfigError {
        ConfigError::Expression {
            offset: self.offset(),
            reason: reason.into(),
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ConfigError> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Token::Ident(name) if name == keyword)
    }

    fn parse_or(&mut self) -> Result<Expr, ConfigError> {
        let mut lhs = self.parse_and()?;
        while self.is_keyword("or") {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = self.binary(BinaryOp::Or, lhs, rhs, false)?;
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConfigError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = if self.is_keyword("and") {
                BinaryOp::And
            } else if self.is_keyword("unless") {
                BinaryOp::Unless
            } else {
                break;
            };
            self.advance();
            let rhs = self.parse_comparison()?;
            lhs = self.binary(op, lhs, rhs, false)?;
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ConfigError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                Token::Gt => BinaryOp::Gt,
                Token::Lt => BinaryOp::Lt,
                Token::Ge => BinaryOp::Ge,
                Token::Le => BinaryOp::Le,
                _ => break,
            };
            self.advance();
            let return_bool = self.is_keyword("bool");
            if return_bool {
                self.advance();
            }
            let rhs = self.parse_additive()?;
            lhs = self.binary(op, lhs, rhs, return_bool)?;
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ConfigError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = self.binary(op, lhs, rhs, false)?;
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ConfigError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = self.binary(op, lhs, rhs, false)?;
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConfigError> {
        match self.peek() {
            Token::Minus => {
                self.advance();
                let inner = self.parse_unary()?;
                if inner.value_type() == ValueType::Range {
                    return Err(self.error("cannot negate a range selector"));
                }
                Ok(match inner {
                    Expr::Number(v) => Expr::Number(-v),
                    other => Expr::Negate(Box::new(other)),
                })
            }
            Token::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ConfigError> {
        match self.advance() {
            Token::Number(v) => Ok(Expr::Number(v)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) => self.parse_identifier(name),
            Token::LBrace => Err(self.error("selectors must start with a metric name")),
            other => Err(ConfigError::Expression {
                offset: self.tokens[self.pos.saturating_sub(1)].offset,
                reason: format!("unexpected token {:?}", other),
            }),
        }
    }

    fn parse_identifier(&mut self, name: String) -> Result<Expr, ConfigError> {
        match name.as_str() {
            "NaN" => return Ok(Expr::Number(f64::NAN)),
            "Inf" => return Ok(Expr::Number(f64::INFINITY)),
            _ => {}
        }

        if let Some(op) = AggregateOp::from_name(&name) {
            let next = self.peek();
            if matches!(next, Token::LParen)
                || matches!(next, Token::Ident(k) if k == "by" || k == "without")
            {
                return self.parse_aggregate(op);
            }
        }

        if self.peek() == &Token::LParen {
            let func = Function::from_name(&name).ok_or_else(|| ConfigError::Unsupported(name.clone()))?;
            self.advance();
            let arg = self.parse_or()?;
            self.expect(Token::RParen, "')' after function argument")?;
            if arg.value_type() != func.arg_type() {
                return Err(self.error(format!(
                    "{} expects a {} argument",
                    name,
                    if func.arg_type() == ValueType::Range { "range vector" } else { "instant vector" }
                )));
            }
            if func == Function::Absent && !matches!(arg, Expr::Selector(_)) {
                return Err(self.error("absent expects a selector"));
            }
            return Ok(Expr::Call {
                func,
                arg: Box::new(arg),
            });
        }

        self.parse_selector(name)
    }

    fn parse_selector(&mut self, metric: String) -> Result<Expr, ConfigError> {
        let mut matchers = Vec::new();
        if self.peek() == &Token::LBrace {
            self.advance();
            loop {
                if self.peek() == &Token::RBrace {
                    self.advance();
                    break;
                }
                matchers.push(self.parse_matcher()?);
                match self.advance() {
                    Token::Comma => continue,
                    Token::RBrace => break,
                    _ => return Err(self.error("expected ',' or '}' in selector")),
                }
            }
        }

        let selector = Selector { metric, matchers };
        if let Token::Range(text) = self.peek().clone() {
            self.advance();
            let range = humantime::parse_duration(&text)
                .map_err(|e| self.error(format!("invalid range '{}': {}", text, e)))?;
            if range.is_zero() {
                return Err(self.error("range must be positive"));
            }
            return Ok(Expr::Range {
                selector,
                range_ms: duration_ms(range),
            });
        }
        Ok(Expr::Selector(selector))
    }

    fn parse_matcher(&mut self) -> Result<LabelMatcher, ConfigError> {
        let name = match self.advance() {
            Token::Ident(name) if is_valid_label_name(&name) => name,
            _ => return Err(self.error("expected label name")),
        };
        if name == "__name__" {
            return Err(ConfigError::Unsupported("__name__ matcher".to_string()));
        }
        let op = self.advance();
        let value = match self.advance() {
            Token::Str(value) => value,
            _ => return Err(self.error("expected quoted label value")),
        };
        match op {
            Token::Assign => Ok(LabelMatcher::equal(name, value)),
            Token::NotEq => Ok(LabelMatcher::not_equal(name, value)),
            Token::RegexEq => LabelMatcher::set(name, &value, false),
            Token::RegexNe => LabelMatcher::set(name, &value, true),
            _ => Err(self.error("expected one of = != =~ !~")),
        }
    }

    fn parse_aggregate(&mut self, op: AggregateOp) -> Result<Expr, ConfigError> {
        let mut grouping = self.parse_grouping()?;
        self.expect(Token::LParen, "'(' after aggregation")?;
        let inner = self.parse_or()?;
        self.expect(Token::RParen, "')' after aggregation")?;
        if grouping == Grouping::All {
            grouping = self.parse_grouping()?;
        }
        if inner.value_type() != ValueType::Vector {
            return Err(self.error("aggregation expects an instant vector"));
        }
        Ok(Expr::Aggregate {
            op,
            grouping,
            expr: Box::new(inner),
        })
    }

    fn parse_grouping(&mut self) -> Result<Grouping, ConfigError> {
        let by = match self.peek() {
            Token::Ident(k) if k == "by" => true,
            Token::Ident(k) if k == "without" => false,
            _ => return Ok(Grouping::All),
        };
        // `sum by (a)` 与名为 by 的指标区分：后面必须是 '('
        if self.peek_at(1) != &Token::LParen {
            return Ok(Grouping::All);
        }
        self.advance();
        self.advance();

        let mut labels = Vec::new();
        loop {
            match self.advance() {
                Token::RParen => break,
                Token::Ident(name) if is_valid_label_name(&name) => {
                    labels.push(name);
                    match self.advance() {
                        Token::Comma => continue,
                        Token::RParen => break,
                        _ => return Err(self.error("expected ',' or ')' in grouping")),
                    }
                }
                _ => return Err(self.error("expected label name in grouping")),
            }
        }
        Ok(if by {
            Grouping::By(labels)
        } else {
            Grouping::Without(labels)
        })
    }

    fn binary(&self, op: BinaryOp, lhs: Expr, rhs: Expr, return_bool: bool) -> Result<Expr, ConfigError> {
        let (lt, rt) = (lhs.value_type(), rhs.value_type());
        if lt == ValueType::Range || rt == ValueType::Range {
            return Err(self.error("range selector must be wrapped in a function"));
        }
        if op.is_set() && (lt != ValueType::Vector || rt != ValueType::Vector) {
            return Err(self.error("and/or/unless require instant vectors on both sides"));
        }
        if return_bool && !op.is_comparison() {
            return Err(self.error("bool modifier only applies to comparisons"));
        }
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            return_bool,
        })
    }
}

fn duration_ms(d: Duration) -> i64 {
    d.as_millis().min(i64::MAX as u128) as i64
}
