//! Canonical, storage-agnostic wire shapes exchanged between the action
//! engine and a database operator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::{AppError, Result};

/// Column marked by soft deletes and excluded by guarded selects.
pub const DELETED_AT: &str = "deleted_at";

/// Leaf operators. `eq` comes from key→value shorthand and `in` from
/// relationship push-down; every other operator is caller vocabulary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FilterOp {
    Is,
    IsNot,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    Contains,
    NotContains,
    IsAnyOf,
    IsNoneOf,
    IsEmpty,
    IsNotEmpty,
    Eq,
    In,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    pub attribute: String,
    pub op: FilterOp,
    #[serde(default)]
    pub value: Value,
}

impl FilterCondition {
    pub fn new(attribute: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub op: LogicalOp,
    pub conditions: Vec<FilterNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterNode {
    Group(FilterGroup),
    Condition(FilterCondition),
}

impl From<FilterCondition> for FilterNode {
    fn from(c: FilterCondition) -> Self {
        FilterNode::Condition(c)
    }
}

impl From<FilterGroup> for FilterNode {
    fn from(g: FilterGroup) -> Self {
        FilterNode::Group(g)
    }
}

impl FilterGroup {
    pub fn and(conditions: Vec<FilterNode>) -> Self {
        Self {
            op: LogicalOp::And,
            conditions,
        }
    }

    pub fn or(conditions: Vec<FilterNode>) -> Self {
        Self {
            op: LogicalOp::Or,
            conditions,
        }
    }

    /// Conjunction of two optional trees, nesting both sides as children.
    pub fn conjoin(left: Option<FilterGroup>, right: Option<FilterGroup>) -> Option<FilterGroup> {
        match (left, right) {
            (None, None) => None,
            (Some(g), None) | (None, Some(g)) => Some(g),
            (Some(l), Some(r)) => Some(FilterGroup::and(vec![l.into(), r.into()])),
        }
    }

    /// Rewrites every leaf attribute in place.
    pub fn map_attributes(&mut self, f: &impl Fn(&str) -> String) {
        for node in &mut self.conditions {
            match node {
                FilterNode::Group(g) => g.map_attributes(f),
                FilterNode::Condition(c) => c.attribute = f(&c.attribute),
            }
        }
    }

    /// All leaves in depth-first order.
    pub fn leaves(&self) -> Vec<&FilterCondition> {
        let mut out = Vec::new();
        collect_leaves(self, &mut out);
        out
    }
}

fn collect_leaves<'a>(group: &'a FilterGroup, out: &mut Vec<&'a FilterCondition>) {
    for node in &group.conditions {
        match node {
            FilterNode::Group(g) => collect_leaves(g, out),
            FilterNode::Condition(c) => out.push(c),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub attribute: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u64>,
    pub per_page: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl Pagination {
    /// Number of rows skipped before the requested page.
    pub fn offset(&self) -> u64 {
        self.page
            .unwrap_or(1)
            .saturating_sub(1)
            .saturating_mul(self.per_page)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinCondition {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub table: String,
    #[serde(rename = "type")]
    pub join_type: JoinType,
    pub conditions: Vec<JoinCondition>,
}

/// Single row or bulk form of an insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPayload {
    Row(Map<String, Value>),
    Rows(Vec<Map<String, Value>>),
}

impl InsertPayload {
    pub fn rows(&self) -> Vec<&Map<String, Value>> {
        match self {
            InsertPayload::Row(row) => vec![row],
            InsertPayload::Rows(rows) => rows.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOperation {
    pub table: String,
    pub model_name: String,
    #[serde(flatten)]
    pub payload: InsertPayload,
}

impl InsertOperation {
    /// Builds an insert, rejecting bulk rows whose column sets differ.
    pub fn new(
        table: impl Into<String>,
        model_name: impl Into<String>,
        payload: InsertPayload,
    ) -> Result<Self> {
        if let InsertPayload::Rows(rows) = &payload {
            let Some(first) = rows.first() else {
                return Err(AppError::validation("rows", "bulk insert requires at least one row"));
            };
            for (idx, row) in rows.iter().enumerate().skip(1) {
                let same = row.len() == first.len() && row.keys().all(|k| first.contains_key(k));
                if !same {
                    return Err(AppError::validation(
                        format!("rows[{idx}]"),
                        "bulk rows must share identical columns",
                    ));
                }
            }
        }
        Ok(Self {
            table: table.into(),
            model_name: model_name.into(),
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOperation {
    pub table: String,
    pub model_name: String,
    pub data: Map<String, Value>,
    pub conditions: FilterGroup,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOperation {
    pub table: String,
    pub model_name: String,
    pub conditions: FilterGroup,
    #[serde(default)]
    pub soft: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectOperation {
    pub table: String,
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterGroup>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorts: Vec<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expand: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<Join>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DatabaseOperation {
    Insert(InsertOperation),
    Update(UpdateOperation),
    Delete(DeleteOperation),
    Select(SelectOperation),
}

impl DatabaseOperation {
    pub fn table(&self) -> &str {
        match self {
            DatabaseOperation::Insert(op) => &op.table,
            DatabaseOperation::Update(op) => &op.table,
            DatabaseOperation::Delete(op) => &op.table,
            DatabaseOperation::Select(op) => &op.table,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DatabaseOperation::Insert(_) => "insert",
            DatabaseOperation::Update(_) => "update",
            DatabaseOperation::Delete(_) => "delete",
            DatabaseOperation::Select(_) => "select",
        }
    }
}

/// Select result together with the echoed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectResponse {
    pub result: Vec<Value>,
    pub operation: SelectOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutput {
    Rows(Vec<Value>),
    Selected(SelectResponse),
}

impl OperationOutput {
    pub fn into_rows(self) -> Vec<Value> {
        match self {
            OperationOutput::Rows(rows) => rows,
            OperationOutput::Selected(resp) => resp.result,
        }
    }

    pub fn into_select(self) -> Result<SelectResponse> {
        match self {
            OperationOutput::Selected(resp) => Ok(resp),
            OperationOutput::Rows(_) => Err(AppError::Operator(anyhow::anyhow!(
                "operator answered a select without echoing the operation"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn bulk_insert_requires_identical_columns() {
        let ok = InsertOperation::new(
            "posts",
            "post",
            InsertPayload::Rows(vec![row(json!({"a": 1, "b": 2})), row(json!({"b": 3, "a": 4}))]),
        );
        assert!(ok.is_ok());

        let err = InsertOperation::new(
            "posts",
            "post",
            InsertPayload::Rows(vec![row(json!({"a": 1})), row(json!({"a": 1, "c": 2}))]),
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("rows[1]"));
    }

    #[test]
    fn select_wire_shape() {
        let op = DatabaseOperation::Select(SelectOperation {
            table: "posts".into(),
            model_name: "post".into(),
            filters: Some(FilterGroup::and(vec![FilterCondition::new(
                "id",
                FilterOp::In,
                json!([1, 2]),
            )
            .into()])),
            expand: vec!["comments".into()],
            ..Default::default()
        });
        let v = serde_json::to_value(&op).unwrap();
        assert_eq!(v["type"], "select");
        assert_eq!(v["modelName"], "post");
        assert_eq!(v["filters"]["conditions"][0]["op"], "in");
        assert_eq!(v["expand"], json!(["comments"]));
        assert!(v.get("sorts").is_none());
    }

    #[test]
    fn prefixing_attributes_reaches_nested_leaves() {
        let mut group = FilterGroup::and(vec![
            FilterCondition::new("status", FilterOp::Is, json!("approved")).into(),
            FilterGroup::or(vec![FilterCondition::new("score", FilterOp::GreaterThan, json!(3)).into()])
                .into(),
        ]);
        group.map_attributes(&|a| format!("comments.{a}"));
        let attrs: Vec<_> = group.leaves().iter().map(|c| c.attribute.clone()).collect();
        assert_eq!(attrs, vec!["comments.status", "comments.score"]);
    }

    #[test]
    fn sort_direction_parses_case_insensitively() {
        assert_eq!("DESC".parse::<SortDirection>().unwrap(), SortDirection::Desc);
        assert!("up".parse::<SortDirection>().is_err());
    }

    #[test]
    fn pagination_offset() {
        let p = Pagination { page: Some(3), per_page: 10, cursor: None };
        assert_eq!(p.offset(), 20);
        let far = Pagination { page: Some(u64::MAX), per_page: 10, cursor: None };
        assert_eq!(far.offset(), u64::MAX);
    }
}
