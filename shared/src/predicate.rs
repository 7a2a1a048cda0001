//! Evaluates canonical filter trees against JSON rows. Used by the in-memory
//! operator; real operators translate the same trees into their own queries.

use std::cmp::Ordering;

use serde_json::Value;

use crate::dto::{FilterCondition, FilterGroup, FilterNode, FilterOp, LogicalOp};
use crate::utils::lookup_path;

pub fn matches_group(group: &FilterGroup, row: &Value) -> bool {
    match group.op {
        LogicalOp::And => group.conditions.iter().all(|n| matches_node(n, row)),
        LogicalOp::Or => group.conditions.iter().any(|n| matches_node(n, row)),
    }
}

fn matches_node(node: &FilterNode, row: &Value) -> bool {
    match node {
        FilterNode::Group(g) => matches_group(g, row),
        FilterNode::Condition(c) => matches_condition(c, row),
    }
}

pub fn matches_condition(cond: &FilterCondition, row: &Value) -> bool {
    let actual = lookup_path(row, &cond.attribute).unwrap_or(&Value::Null);
    let expected = &cond.value;

    match cond.op {
        FilterOp::Is | FilterOp::Eq => loose_eq(actual, expected),
        FilterOp::IsNot => !loose_eq(actual, expected),

        FilterOp::GreaterThan => compare(actual, expected) == Some(Ordering::Greater),
        FilterOp::LessThan => compare(actual, expected) == Some(Ordering::Less),
        FilterOp::GreaterThanOrEqual => {
            matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal))
        }
        FilterOp::LessThanOrEqual => {
            matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal))
        }

        FilterOp::Contains => contains(actual, expected),
        FilterOp::NotContains => !contains(actual, expected),

        FilterOp::IsAnyOf | FilterOp::In => any_of(actual, expected),
        FilterOp::IsNoneOf => !any_of(actual, expected),

        FilterOp::IsEmpty => is_empty(actual),
        FilterOp::IsNotEmpty => !is_empty(actual),
    }
}

/// Equality that treats `7` and `7.0` as the same number.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Non-null values in first-seen order, deduplicated with [`loose_eq`].
pub fn distinct_values<'a>(values: impl IntoIterator<Item = &'a Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for value in values {
        if !value.is_null() && !out.iter().any(|seen| loose_eq(seen, value)) {
            out.push(value.clone());
        }
    }
    out
}

/// Ordering between two scalars of the same JSON kind.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::String(s) => match expected {
            Value::String(e) => s.contains(e.as_str()),
            other => s.contains(&other.to_string()),
        },
        Value::Array(items) => items.iter().any(|i| loose_eq(i, expected)),
        _ => false,
    }
}

fn any_of(actual: &Value, expected: &Value) -> bool {
    match expected {
        Value::Array(options) => options.iter().any(|o| loose_eq(actual, o)),
        single => loose_eq(actual, single),
    }
}

fn is_empty(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}
