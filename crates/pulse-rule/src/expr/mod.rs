//! 告警表达式（PromQL 子集）

mod ast;
mod eval;
mod lexer;
mod parser;

pub use ast::{AggregateOp, BinaryOp, Expr, Function, Grouping, Selector, ValueType};
pub use eval::{evaluate, EvalContext, Value, VectorElement};
pub use parser::parse_expr;
