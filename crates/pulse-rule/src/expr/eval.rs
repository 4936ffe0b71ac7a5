use std::collections::{BTreeMap, HashMap};

use pulse_core::{EvaluationError, Labels, Point, Timestamp};
use pulse_tsdb::{TimeRange, TimeSeriesStore};

use super::ast::{AggregateOp, BinaryOp, Expr, Function, Grouping, Selector};

/// 求值上下文：存储句柄、评估时刻、即时选择器的回看窗口
pub struct EvalContext<'a> {
    pub store: &'a TimeSeriesStore,
    pub at: Timestamp,
    pub lookback_ms: i64,
}

impl<'a> EvalContext<'a> {
    pub fn new(store: &'a TimeSeriesStore, at: Timestamp, lookback_ms: i64) -> Self {
        Self {
            store,
            at,
            lookback_ms,
        }
    }
}

/// 即时向量中的一个元素；`metric` 在算术运算后被去掉
#[derive(Debug, Clone, PartialEq)]
pub struct VectorElement {
    pub metric: Option<String>,
    pub labels: Labels,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(f64),
    Vector(Vec<VectorElement>),
}

pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<Value, EvaluationError> {
    match expr {
        Expr::Number(v) => Ok(Value::Scalar(*v)),
        Expr::Selector(selector) => {
            let elements = instant_selector(selector, ctx);
            if elements.is_empty() {
                return Err(EvaluationError::MissingSeries(selector.to_string()));
            }
            Ok(Value::Vector(elements))
        }
        Expr::Range { .. } => Err(EvaluationError::Type(
            "range vector cannot be evaluated directly".to_string(),
        )),
        Expr::Negate(inner) => Ok(match evaluate(inner, ctx)? {
            Value::Scalar(v) => Value::Scalar(-v),
            Value::Vector(elements) => Value::Vector(
                elements
                    .into_iter()
                    .map(|e| VectorElement {
                        metric: None,
                        labels: e.labels,
                        value: -e.value,
                    })
                    .collect(),
            ),
        }),
        Expr::Binary {
            op,
            lhs,
            rhs,
            return_bool,
        } => {
            let lhs = evaluate(lhs, ctx)?;
            let rhs = evaluate(rhs, ctx)?;
            binary(*op, lhs, rhs, *return_bool)
        }
        Expr::Call { func, arg } => call(*func, arg, ctx),
        Expr::Aggregate { op, grouping, expr } => match evaluate(expr, ctx)? {
            Value::Vector(elements) => Ok(Value::Vector(aggregate(*op, grouping, elements))),
            Value::Scalar(_) => Err(EvaluationError::Type("aggregation over a scalar".to_string())),
        },
    }
}

fn instant_selector(selector: &Selector, ctx: &EvalContext<'_>) -> Vec<VectorElement> {
    let range = TimeRange::lookback(ctx.at, ctx.lookback_ms);
    let result = ctx.store.query(&selector.metric, &selector.matchers, range);
    result
        .series()
        .filter_map(|series| {
            series.latest().map(|point| VectorElement {
                metric: Some(series.metric().to_string()),
                labels: series.labels().clone(),
                value: point.value,
            })
        })
        .collect()
}

fn range_selector(selector: &Selector, range_ms: i64, ctx: &EvalContext<'_>) -> Result<Vec<(Labels, Vec<Point>)>, EvaluationError> {
    let range = TimeRange::lookback(ctx.at, range_ms);
    let result = ctx.store.query(&selector.metric, &selector.matchers, range);
    if result.is_empty() {
        return Err(EvaluationError::MissingSeries(selector.to_string()));
    }
    Ok(result
        .series()
        .map(|series| (series.labels().clone(), series.collect_points()))
        .filter(|(_, points)| !points.is_empty())
        .collect())
}

fn call(func: Function, arg: &Expr, ctx: &EvalContext<'_>) -> Result<Value, EvaluationError> {
    match (func, arg) {
        (Function::Absent, Expr::Selector(selector)) => {
            if !instant_selector(selector, ctx).is_empty() {
                return Ok(Value::Vector(Vec::new()));
            }
            let labels: Labels = selector
                .matchers
                .iter()
                .filter_map(|m| m.equality_value().map(|v| (m.name.clone(), v.to_string())))
                .collect();
            Ok(Value::Vector(vec![VectorElement {
                metric: None,
                labels,
                value: 1.0,
            }]))
        }
        (Function::Abs, inner) => match evaluate(inner, ctx)? {
            Value::Vector(elements) => Ok(Value::Vector(
                elements
                    .into_iter()
                    .map(|e| VectorElement {
                        metric: None,
                        labels: e.labels,
                        value: e.value.abs(),
                    })
                    .collect(),
            )),
            Value::Scalar(v) => Ok(Value::Scalar(v.abs())),
        },
        (func, Expr::Range { selector, range_ms }) => {
            let series = range_selector(selector, *range_ms, ctx)?;
            let elements = series
                .into_iter()
                .filter_map(|(labels, points)| {
                    over_time(func, &points).map(|value| VectorElement {
                        metric: None,
                        labels,
                        value,
                    })
                })
                .collect();
            Ok(Value::Vector(elements))
        }
        (func, _) => Err(EvaluationError::Type(format!("invalid argument for {:?}", func))),
    }
}

/// 区间函数；点数不足时返回 None
fn over_time(func: Function, points: &[Point]) -> Option<f64> {
    let values = points.iter().map(|p| p.value);
    match func {
        Function::Rate | Function::Increase => {
            let (first, last) = (points.first()?, points.last()?);
            if points.len() < 2 || last.timestamp <= first.timestamp {
                return None;
            }
            // 计数器重置时把重置前的值补回
            let mut delta = 0.0;
            for pair in points.windows(2) {
                let (prev, next) = (pair[0].value, pair[1].value);
                delta += if next < prev { next } else { next - prev };
            }
            if func == Function::Increase {
                Some(delta)
            } else {
                Some(delta / ((last.timestamp - first.timestamp) as f64 / 1000.0))
            }
        }
        Function::AvgOverTime => Some(values.sum::<f64>() / points.len() as f64),
        Function::MinOverTime => values.reduce(f64::min),
        Function::MaxOverTime => values.reduce(f64::max),
        Function::SumOverTime => Some(values.sum()),
        Function::CountOverTime => Some(points.len() as f64),
        Function::Abs | Function::Absent => None,
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value, return_bool: bool) -> Result<Value, EvaluationError> {
    if op.is_set() {
        return match (lhs, rhs) {
            (Value::Vector(l), Value::Vector(r)) => Ok(Value::Vector(set_operation(op, l, r))),
            _ => Err(EvaluationError::Type("set operator on scalar".to_string())),
        };
    }

    match (lhs, rhs) {
        // 标量比较总是返回 0/1
        (Value::Scalar(l), Value::Scalar(r)) => Ok(Value::Scalar(op.apply(l, r))),
        (Value::Vector(l), Value::Scalar(r)) => Ok(Value::Vector(
            l.into_iter()
                .filter_map(|e| compare_or_apply(op, e, r, false, return_bool))
                .collect(),
        )),
        (Value::Scalar(l), Value::Vector(r)) => Ok(Value::Vector(
            r.into_iter()
                .filter_map(|e| compare_or_apply(op, e, l, true, return_bool))
                .collect(),
        )),
        (Value::Vector(l), Value::Vector(r)) => {
            let mut right: HashMap<Labels, f64> = HashMap::with_capacity(r.len());
            for element in r {
                right.insert(element.labels, element.value);
            }
            Ok(Value::Vector(
                l.into_iter()
                    .filter_map(|e| {
                        let other = *right.get(&e.labels)?;
                        compare_or_apply(op, e, other, false, return_bool)
                    })
                    .collect(),
            ))
        }
    }
}

/// 比较：过滤（保留左值）或在 `bool` 下返回 0/1；算术：去掉指标名
fn compare_or_apply(op: BinaryOp, element: VectorElement, other: f64, swapped: bool, return_bool: bool) -> Option<VectorElement> {
    let (l, r) = if swapped {
        (other, element.value)
    } else {
        (element.value, other)
    };
    let result = op.apply(l, r);

    if op.is_comparison() {
        if return_bool {
            return Some(VectorElement {
                metric: None,
                labels: element.labels,
                value: result,
            });
        }
        if result == 1.0 {
            return Some(element);
        }
        return None;
    }

    Some(VectorElement {
        metric: None,
        labels: element.labels,
        value: result,
    })
}

fn set_operation(op: BinaryOp, lhs: Vec<VectorElement>, rhs: Vec<VectorElement>) -> Vec<VectorElement> {
    match op {
        BinaryOp::And => lhs
            .into_iter()
            .filter(|e| rhs.iter().any(|r| r.labels == e.labels))
            .collect(),
        BinaryOp::Unless => lhs
            .into_iter()
            .filter(|e| !rhs.iter().any(|r| r.labels == e.labels))
            .collect(),
        _ => {
            let mut out = lhs;
            let extra: Vec<VectorElement> = rhs
                .into_iter()
                .filter(|r| !out.iter().any(|e| e.labels == r.labels))
                .collect();
            out.extend(extra);
            out
        }
    }
}

fn aggregate(op: AggregateOp, grouping: &Grouping, elements: Vec<VectorElement>) -> Vec<VectorElement> {
    let mut groups: BTreeMap<Labels, Vec<f64>> = BTreeMap::new();
    for element in elements {
        let key = match grouping {
            Grouping::All => Labels::new(),
            Grouping::By(names) => element.labels.keep_only(names),
            Grouping::Without(names) => element.labels.without(names),
        };
        groups.entry(key).or_default().push(element.value);
    }

    groups
        .into_iter()
        .map(|(labels, values)| {
            let value = match op {
                AggregateOp::Sum => values.iter().sum(),
                AggregateOp::Avg => values.iter().sum::<f64>() / values.len() as f64,
                AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
                AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
                AggregateOp::Count => values.len() as f64,
            };
            VectorElement {
                metric: None,
                labels,
                value,
            }
        })
        .collect()
}
