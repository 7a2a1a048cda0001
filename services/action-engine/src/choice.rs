//! Choice-state predicates.
//!
//! Rules are written the Step-Functions way: one object per rule carrying a
//! `Variable` plus exactly one test (`BooleanEquals`, `IsNull`, ...) or one
//! combinator (`And`, `Or`, `Not`). On load they become a closed [`Predicate`]
//! tree, so a rule with no test or two tests is rejected when the graph is
//! parsed rather than when it runs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::utils::lookup_path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawPredicate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<Predicate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<Predicate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Predicate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boolean_equals: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string_equals: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_equals: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_greater_than: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_greater_than_equals: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_less_than: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numeric_less_than_equals: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_boolean: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_null: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_present: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_numeric: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_string: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    BooleanEquals(bool),
    StringEquals(String),
    NumericEquals(f64),
    NumericGreaterThan(f64),
    NumericGreaterThanEquals(f64),
    NumericLessThan(f64),
    NumericLessThanEquals(f64),
    IsBoolean(bool),
    IsNull(bool),
    /// Key exists and is not null.
    IsPresent(bool),
    IsNumeric(bool),
    IsString(bool),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPredicate", into = "RawPredicate")]
pub enum Predicate {
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Test {
        variable: String,
        comparison: Comparison,
    },
}

impl TryFrom<RawPredicate> for Predicate {
    type Error = String;

    fn try_from(raw: RawPredicate) -> Result<Self, Self::Error> {
        let mut found: Vec<Predicate> = Vec::new();
        if let Some(all) = raw.and {
            if all.is_empty() {
                return Err("`And` requires at least one predicate".into());
            }
            found.push(Predicate::And(all));
        }
        if let Some(any) = raw.or {
            if any.is_empty() {
                return Err("`Or` requires at least one predicate".into());
            }
            found.push(Predicate::Or(any));
        }
        if let Some(inner) = raw.not {
            found.push(Predicate::Not(inner));
        }

        let comparisons: Vec<Comparison> = [
            raw.boolean_equals.map(Comparison::BooleanEquals),
            raw.string_equals.map(Comparison::StringEquals),
            raw.numeric_equals.map(Comparison::NumericEquals),
            raw.numeric_greater_than.map(Comparison::NumericGreaterThan),
            raw.numeric_greater_than_equals
                .map(Comparison::NumericGreaterThanEquals),
            raw.numeric_less_than.map(Comparison::NumericLessThan),
            raw.numeric_less_than_equals.map(Comparison::NumericLessThanEquals),
            raw.is_boolean.map(Comparison::IsBoolean),
            raw.is_null.map(Comparison::IsNull),
            raw.is_present.map(Comparison::IsPresent),
            raw.is_numeric.map(Comparison::IsNumeric),
            raw.is_string.map(Comparison::IsString),
        ]
        .into_iter()
        .flatten()
        .collect();

        for comparison in comparisons {
            let variable = raw
                .variable
                .clone()
                .ok_or_else(|| "comparison requires a `Variable`".to_string())?;
            found.push(Predicate::Test {
                variable,
                comparison,
            });
        }

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err("rule has no test or combinator".into()),
            n => Err(format!("rule carries {n} tests, expected exactly one")),
        }
    }
}

impl From<Predicate> for RawPredicate {
    fn from(p: Predicate) -> Self {
        let mut raw = RawPredicate::default();
        match p {
            Predicate::And(all) => raw.and = Some(all),
            Predicate::Or(any) => raw.or = Some(any),
            Predicate::Not(inner) => raw.not = Some(inner),
            Predicate::Test {
                variable,
                comparison,
            } => {
                raw.variable = Some(variable);
                match comparison {
                    Comparison::BooleanEquals(v) => raw.boolean_equals = Some(v),
                    Comparison::StringEquals(v) => raw.string_equals = Some(v),
                    Comparison::NumericEquals(v) => raw.numeric_equals = Some(v),
                    Comparison::NumericGreaterThan(v) => raw.numeric_greater_than = Some(v),
                    Comparison::NumericGreaterThanEquals(v) => {
                        raw.numeric_greater_than_equals = Some(v)
                    }
                    Comparison::NumericLessThan(v) => raw.numeric_less_than = Some(v),
                    Comparison::NumericLessThanEquals(v) => raw.numeric_less_than_equals = Some(v),
                    Comparison::IsBoolean(v) => raw.is_boolean = Some(v),
                    Comparison::IsNull(v) => raw.is_null = Some(v),
                    Comparison::IsPresent(v) => raw.is_present = Some(v),
                    Comparison::IsNumeric(v) => raw.is_numeric = Some(v),
                    Comparison::IsString(v) => raw.is_string = Some(v),
                }
            }
        }
        raw
    }
}

/// Resolves `$`/`$.path` against the current input and `$$`/`$$.path`
/// against the context document. `None` means the path does not exist.
pub fn resolve_variable<'a>(
    variable: &str,
    input: &'a Value,
    context: &'a Value,
) -> Option<&'a Value> {
    let (root, rest) = if let Some(rest) = variable.strip_prefix("$$") {
        (context, rest)
    } else if let Some(rest) = variable.strip_prefix('$') {
        (input, rest)
    } else {
        (input, variable)
    };
    let path = rest.strip_prefix('.').unwrap_or(rest);
    if path.is_empty() {
        Some(root)
    } else {
        lookup_path(root, path)
    }
}

impl Predicate {
    pub fn evaluate(&self, input: &Value, context: &Value) -> bool {
        match self {
            Predicate::And(all) => all.iter().all(|p| p.evaluate(input, context)),
            Predicate::Or(any) => any.iter().any(|p| p.evaluate(input, context)),
            Predicate::Not(inner) => !inner.evaluate(input, context),
            Predicate::Test {
                variable,
                comparison,
            } => comparison.holds(resolve_variable(variable, input, context)),
        }
    }
}

impl Comparison {
    fn holds(&self, value: Option<&Value>) -> bool {
        let number = value.and_then(Value::as_f64);
        match self {
            Comparison::BooleanEquals(expected) => {
                value.and_then(Value::as_bool) == Some(*expected)
            }
            Comparison::StringEquals(expected) => {
                value.and_then(Value::as_str) == Some(expected.as_str())
            }
            Comparison::NumericEquals(n) => number == Some(*n),
            Comparison::NumericGreaterThan(n) => number.is_some_and(|v| v > *n),
            Comparison::NumericGreaterThanEquals(n) => number.is_some_and(|v| v >= *n),
            Comparison::NumericLessThan(n) => number.is_some_and(|v| v < *n),
            Comparison::NumericLessThanEquals(n) => number.is_some_and(|v| v <= *n),
            Comparison::IsBoolean(want) => value.is_some_and(Value::is_boolean) == *want,
            // A missing path counts as null.
            Comparison::IsNull(want) => value.map_or(true, Value::is_null) == *want,
            Comparison::IsPresent(want) => value.is_some_and(|v| !v.is_null()) == *want,
            Comparison::IsNumeric(want) => value.is_some_and(Value::is_number) == *want,
            Comparison::IsString(want) => value.is_some_and(Value::is_string) == *want,
        }
    }
}
