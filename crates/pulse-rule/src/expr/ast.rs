use std::fmt;

use pulse_tsdb::LabelMatcher;

/// 表达式值类型（加载期检查用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Scalar,
    Vector,
    Range,
}

/// 序列选择器
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub metric: String,
    pub matchers: Vec<LabelMatcher>,
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.metric)?;
        if !self.matchers.is_empty() {
            let parts: Vec<String> = self.matchers.iter().map(|m| m.to_string()).collect();
            write!(f, "{{{}}}", parts.join(","))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    And,
    Or,
    Unless,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Gt | BinaryOp::Lt | BinaryOp::Ge | BinaryOp::Le
        )
    }

    pub fn is_set(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Unless)
    }

    /// 算术或比较；比较结果为 1/0，NaN 参与的比较恒为假
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
            BinaryOp::Mod => lhs % rhs,
            BinaryOp::Eq => truth(lhs == rhs),
            BinaryOp::Ne => truth(lhs != rhs && !lhs.is_nan() && !rhs.is_nan()),
            BinaryOp::Gt => truth(lhs > rhs),
            BinaryOp::Lt => truth(lhs < rhs),
            BinaryOp::Ge => truth(lhs >= rhs),
            BinaryOp::Le => truth(lhs <= rhs),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Unless => f64::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Rate,
    Increase,
    AvgOverTime,
    MinOverTime,
    MaxOverTime,
    SumOverTime,
    CountOverTime,
    Abs,
    Absent,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "rate" => Function::Rate,
            "increase" => Function::Increase,
            "avg_over_time" => Function::AvgOverTime,
            "min_over_time" => Function::MinOverTime,
            "max_over_time" => Function::MaxOverTime,
            "sum_over_time" => Function::SumOverTime,
            "count_over_time" => Function::CountOverTime,
            "abs" => Function::Abs,
            "absent" => Function::Absent,
            _ => return None,
        })
    }

    /// 参数类型
    pub fn arg_type(self) -> ValueType {
        match self {
            Function::Abs | Function::Absent => ValueType::Vector,
            _ => ValueType::Range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => AggregateOp::Sum,
            "avg" => AggregateOp::Avg,
            "min" => AggregateOp::Min,
            "max" => AggregateOp::Max,
            "count" => AggregateOp::Count,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Grouping {
    #[default]
    All,
    By(Vec<String>),
    Without(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Selector(Selector),
    Range { selector: Selector, range_ms: i64 },
    Negate(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        return_bool: bool,
    },
    Call { func: Function, arg: Box<Expr> },
    Aggregate {
        op: AggregateOp,
        grouping: Grouping,
        expr: Box<Expr>,
    },
}

impl Expr {
    pub fn value_type(&self) -> ValueType {
        match self {
            Expr::Number(_) => ValueType::Scalar,
            Expr::Range { .. } => ValueType::Range,
            Expr::Selector(_) | Expr::Call { .. } | Expr::Aggregate { .. } => ValueType::Vector,
            Expr::Negate(inner) => inner.value_type(),
            Expr::Binary { lhs, rhs, .. } => {
                if lhs.value_type() == ValueType::Scalar && rhs.value_type() == ValueType::Scalar {
                    ValueType::Scalar
                } else {
                    ValueType::Vector
                }
            }
        }
    }
}
