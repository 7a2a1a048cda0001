//! Turns heterogeneous caller filter syntax into the canonical filter tree,
//! validates trees, and resolves scope references into filter fragments.
//!
//! Accepted filter shapes:
//! - full form `{op, conditions: [...]}` (passed through),
//! - a list of conditions (implicit `and`),
//! - a single condition object `{attribute, op?, value?}`,
//! - key→value shorthand `{name: "x"}` (each pair becomes an `eq` leaf).

use serde_json::{json, Map, Value};
use shared::dto::{FilterCondition, FilterGroup, FilterNode, FilterOp, LogicalOp};
use shared::error::{AppError, Result};

use crate::model::{ModelDefinition, ModelRegistry, ScopeTable};

fn is_group(map: &Map<String, Value>) -> bool {
    map.contains_key("conditions")
}

/// Normalizes a `filters` (or `conditions`) value into `{op, conditions}`.
/// `null`, an empty list and an empty map all mean "no filter" and come back
/// as `null`.
pub fn normalize(filters: &Value) -> Result<Value> {
    match filters {
        Value::Null => Ok(Value::Null),
        Value::Array(items) if items.is_empty() => Ok(Value::Null),
        Value::Object(map) if map.is_empty() => Ok(Value::Null),
        Value::Object(map) if is_group(map) => Ok(filters.clone()),
        Value::Object(map) if map.contains_key("attribute") => Ok(json!({
            "op": "and",
            "conditions": [normalize_condition(filters)?],
        })),
        Value::Object(map) => {
            let conditions: Vec<Value> = map
                .iter()
                .map(|(attribute, value)| {
                    json!({"op": "eq", "attribute": attribute, "value": value})
                })
                .collect();
            Ok(json!({"op": "and", "conditions": conditions}))
        }
        Value::Array(items) => {
            let conditions = items
                .iter()
                .map(normalize_condition)
                .collect::<Result<Vec<_>>>()?;
            Ok(json!({"op": "and", "conditions": conditions}))
        }
        _ => Err(AppError::validation(
            "filters",
            "expected a filter group, a list of conditions or an attribute map",
        )),
    }
}

/// Fills defaults on a single condition: `op` becomes `is` and `value`
/// becomes `null` when absent. Nested groups pass through.
pub fn normalize_condition(condition: &Value) -> Result<Value> {
    let Value::Object(map) = condition else {
        return Err(AppError::validation("conditions", "each condition must be an object"));
    };
    if is_group(map) {
        return Ok(condition.clone());
    }
    if !map.contains_key("attribute") {
        return Err(AppError::validation("attribute", "condition requires an attribute"));
    }
    let mut out = map.clone();
    out.entry("op").or_insert_with(|| json!("is"));
    out.entry("value").or_insert(Value::Null);
    Ok(Value::Object(out))
}

/// Checks a normalized tree and converts it into its typed form. Errors name
/// the offending field by path, e.g. `conditions[1].op`.
pub fn validate(tree: &Value) -> Result<FilterGroup> {
    validate_group(tree, "")
}

fn field(path: &str, name: &str) -> String {
    format!("{path}{name}")
}

fn validate_group(tree: &Value, path: &str) -> Result<FilterGroup> {
    let Value::Object(map) = tree else {
        return Err(AppError::validation(
            field(path, "conditions"),
            "filter group must be an object",
        ));
    };

    let op = match map.get("op").and_then(Value::as_str) {
        Some("and") => LogicalOp::And,
        Some("or") => LogicalOp::Or,
        Some(other) => {
            return Err(AppError::validation(
                field(path, "op"),
                format!("group operator must be `and` or `or`, got `{other}`"),
            ))
        }
        None => {
            return Err(AppError::validation(
                field(path, "op"),
                "group operator must be `and` or `or`",
            ))
        }
    };

    let children = match map.get("conditions") {
        Some(Value::Array(items)) if !items.is_empty() => items,
        Some(Value::Array(_)) => {
            return Err(AppError::validation(
                field(path, "conditions"),
                "group requires at least one condition",
            ))
        }
        _ => {
            return Err(AppError::validation(
                field(path, "conditions"),
                "group requires a conditions array",
            ))
        }
    };

    let conditions = children
        .iter()
        .enumerate()
        .map(|(idx, child)| {
            let child_path = format!("{path}conditions[{idx}].");
            match child {
                Value::Object(m) if is_group(m) => {
                    validate_group(child, &child_path).map(FilterNode::Group)
                }
                _ => validate_leaf(child, &child_path).map(FilterNode::Condition),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(FilterGroup { op, conditions })
}

fn validate_leaf(leaf: &Value, path: &str) -> Result<FilterCondition> {
    let Value::Object(map) = leaf else {
        return Err(AppError::validation(
            path.trim_end_matches('.'),
            "condition must be an object",
        ));
    };
    let attribute = match map.get("attribute").and_then(Value::as_str) {
        Some(a) if !a.is_empty() => a,
        _ => {
            return Err(AppError::validation(
                field(path, "attribute"),
                "condition requires a non-empty attribute",
            ))
        }
    };
    let op = map
        .get("op")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<FilterOp>().ok())
        .ok_or_else(|| {
            AppError::validation(
                field(path, "op"),
                format!(
                    "unsupported operator {}",
                    map.get("op").map(Value::to_string).unwrap_or_else(|| "null".into())
                ),
            )
        })?;
    Ok(FilterCondition {
        attribute: attribute.to_string(),
        op,
        value: map.get("value").cloned().unwrap_or(Value::Null),
    })
}

/// Normalizes then validates in one step.
pub fn parse(filters: &Value) -> Result<Option<FilterGroup>> {
    match normalize(filters)? {
        Value::Null => Ok(None),
        normalized => validate(&normalized).map(Some),
    }
}

/// Resolves scope references against a model and, for bare names missing
/// from the model, an optional view scope table.
pub struct ScopeResolver<'a> {
    registry: &'a ModelRegistry,
}

impl<'a> ScopeResolver<'a> {
    pub fn new(registry: &'a ModelRegistry) -> Self {
        Self { registry }
    }

    /// Accepts a scope name, a dotted `relation.scope` name, a list of
    /// references (implicit `and`) or an explicit `{op, scopes: [...]}`
    /// tree.
    pub fn resolve(
        &self,
        model: &ModelDefinition,
        reference: &Value,
        view: Option<&ScopeTable>,
    ) -> Result<FilterGroup> {
        match reference {
            Value::String(name) => self.resolve_named(model, name, view),
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(AppError::validation("scopes", "scope list must not be empty"));
                }
                let conditions = items
                    .iter()
                    .map(|r| self.resolve(model, r, view).map(FilterNode::Group))
                    .collect::<Result<Vec<_>>>()?;
                Ok(FilterGroup::and(conditions))
            }
            Value::Object(map) => {
                let op = match map.get("op").and_then(Value::as_str) {
                    Some("and") => LogicalOp::And,
                    Some("or") => LogicalOp::Or,
                    _ => {
                        return Err(AppError::validation(
                            "scopes.op",
                            "scope group operator must be `and` or `or`",
                        ))
                    }
                };
                let items = match map.get("scopes") {
                    Some(Value::Array(items)) if !items.is_empty() => items,
                    _ => {
                        return Err(AppError::validation(
                            "scopes.scopes",
                            "scope group requires a non-empty scopes array",
                        ))
                    }
                };
                let conditions = items
                    .iter()
                    .map(|r| self.resolve(model, r, view).map(FilterNode::Group))
                    .collect::<Result<Vec<_>>>()?;
                Ok(FilterGroup { op, conditions })
            }
            _ => Err(AppError::validation(
                "scopes",
                "expected a scope name, a list of scopes or a scope group",
            )),
        }
    }

    fn resolve_named(
        &self,
        model: &ModelDefinition,
        name: &str,
        view: Option<&ScopeTable>,
    ) -> Result<FilterGroup> {
        if let Some((relation, rest)) = name.split_once('.') {
            let relationship = model.relationship(relation)?;
            let related = self.registry.get(relationship.related())?;
            let mut fragment = self.resolve_named(&related, rest, None)?;
            fragment.map_attributes(&|attribute| format!("{relation}.{attribute}"));
            return Ok(fragment);
        }
        model
            .scopes
            .get(name)
            .or_else(|| view.and_then(|v| v.get(name)))
            .cloned()
            .ok_or_else(|| AppError::UnknownScope {
                model: model.name.clone(),
                scope: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn shorthand_becomes_eq_leaves() {
        let out = normalize(&json!({"name": "x"})).unwrap();
        assert_eq!(
            out,
            json!({"op": "and", "conditions": [{"op": "eq", "attribute": "name", "value": "x"}]})
        );
    }

    #[test]
    fn list_form_fills_defaults() {
        let out = normalize(&json!([{"attribute": "deleted"}])).unwrap();
        assert_eq!(
            out,
            json!({"op": "and", "conditions": [{"attribute": "deleted", "op": "is", "value": null}]})
        );
    }

    #[test]
    fn full_form_and_null_pass_through() {
        let full = json!({"op": "or", "conditions": [{"attribute": "a", "op": "is", "value": 1}]});
        assert_eq!(normalize(&full).unwrap(), full);
        assert_eq!(normalize(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn empty_list_and_map_mean_no_filter() {
        assert_eq!(normalize(&json!([])).unwrap(), Value::Null);
        assert_eq!(normalize(&json!({})).unwrap(), Value::Null);
        assert!(parse(&json!([])).unwrap().is_none());
    }

    #[test]
    fn single_condition_is_wrapped() {
        let out = normalize(&json!({"attribute": "age", "op": "greater_than", "value": 3})).unwrap();
        assert_eq!(out["op"], "and");
        assert_eq!(out["conditions"][0]["attribute"], "age");
    }

    #[test]
    fn condition_without_attribute_is_rejected() {
        let err = normalize(&json!([{"op": "is", "value": 1}])).unwrap_err();
        assert_eq!(err.field(), Some("attribute"));
    }

    #[test]
    fn every_input_shape_normalizes_into_a_valid_tree() {
        let inputs = [
            json!({"name": "x", "age": 3}),
            json!([{"attribute": "a"}, {"attribute": "b", "op": "is_any_of", "value": [1, 2]}]),
            json!({"op": "and", "conditions": [
                {"attribute": "a", "op": "is", "value": 1},
                {"op": "or", "conditions": [{"attribute": "b", "op": "is_empty"}]}
            ]}),
        ];
        for input in inputs {
            let tree = validate(&normalize(&input).unwrap()).unwrap();
            assert!(!tree.conditions.is_empty());
            for leaf in tree.leaves() {
                assert!(!leaf.attribute.is_empty());
            }
        }
    }

    #[test]
    fn every_leaf_operator_validates() {
        use strum::IntoEnumIterator;
        for op in FilterOp::iter() {
            let tree = json!({"op": "and", "conditions": [
                {"attribute": "a", "op": op.as_ref(), "value": 1}
            ]});
            assert_eq!(validate(&tree).unwrap().leaves()[0].op, op);
        }
    }

    #[test]
    fn invalid_group_operator_names_op() {
        let err = validate(&json!({"op": "xor", "conditions": [{"attribute": "a", "op": "is"}]}))
            .unwrap_err();
        assert_eq!(err.field(), Some("op"));
    }

    #[test]
    fn empty_group_names_conditions() {
        let err = validate(&json!({"op": "and", "conditions": []})).unwrap_err();
        assert_eq!(err.field(), Some("conditions"));
    }

    #[test]
    fn nested_leaf_errors_carry_their_path() {
        let err = validate(&json!({"op": "and", "conditions": [
            {"attribute": "a", "op": "is"},
            {"op": "or", "conditions": [{"attribute": "b", "op": "like"}]}
        ]}))
        .unwrap_err();
        assert_eq!(err.field(), Some("conditions[1].conditions[0].op"));

        let err = validate(&json!({"op": "and", "conditions": [{"attribute": "", "op": "is"}]}))
            .unwrap_err();
        assert_eq!(err.field(), Some("conditions[0].attribute"));
    }

    fn blog() -> ModelRegistry {
        ModelRegistry::from_json(json!([
            {
                "name": "post",
                "relationships": {"comments": {"type": "hasMany", "model": "comment"}},
                "scopes": {"published": {"status": "published"}},
                "views": {"admin": {"scopes": {"recent": [{"attribute": "age", "op": "less_than", "value": 7}]}}}
            },
            {
                "name": "comment",
                "relationships": {"author": {"type": "belongsTo", "model": "user"}},
                "scopes": {"approved": {"op": "and", "conditions": [
                    {"attribute": "status", "op": "is", "value": "approved"}
                ]}}
            },
            {"name": "user", "scopes": {"active": {"active": true}}}
        ]))
        .unwrap()
    }

    #[test]
    fn cross_model_scope_prefixes_attributes() {
        let reg = blog();
        let post = reg.get("post").unwrap();
        let group = ScopeResolver::new(&reg)
            .resolve(&post, &json!("comments.approved"), None)
            .unwrap();
        assert_eq!(
            serde_json::to_value(&group).unwrap(),
            json!({"op": "and", "conditions": [
                {"attribute": "comments.status", "op": "is", "value": "approved"}
            ]})
        );
    }

    #[test]
    fn multi_hop_scope_prefixes_every_hop() {
        let reg = blog();
        let post = reg.get("post").unwrap();
        let group = ScopeResolver::new(&reg)
            .resolve(&post, &json!("comments.author.active"), None)
            .unwrap();
        assert_eq!(group.leaves()[0].attribute, "comments.author.active");
    }

    #[test]
    fn scope_lists_and_groups() {
        let reg = blog();
        let post = reg.get("post").unwrap();
        let resolver = ScopeResolver::new(&reg);
        let list = resolver
            .resolve(&post, &json!(["published", "comments.approved"]), None)
            .unwrap();
        assert_eq!(list.op, LogicalOp::And);
        assert_eq!(list.conditions.len(), 2);

        let tree = resolver
            .resolve(&post, &json!({"op": "or", "scopes": ["published", ["comments.approved"]]}), None)
            .unwrap();
        assert_eq!(tree.op, LogicalOp::Or);
        assert_eq!(tree.leaves().len(), 2);
    }

    #[test]
    fn view_scopes_back_up_bare_names() {
        let reg = blog();
        let post = reg.get("post").unwrap();
        let resolver = ScopeResolver::new(&reg);
        assert!(matches!(
            resolver.resolve(&post, &json!("recent"), None),
            Err(AppError::UnknownScope { .. })
        ));
        let view: &BTreeMap<_, _> = post.view("admin").unwrap();
        let group = resolver.resolve(&post, &json!("recent"), Some(view)).unwrap();
        assert_eq!(group.leaves()[0].attribute, "age");
    }

    #[test]
    fn unknown_references_name_the_culprit() {
        let reg = blog();
        let post = reg.get("post").unwrap();
        let resolver = ScopeResolver::new(&reg);
        match resolver.resolve(&post, &json!("tags.hot"), None) {
            Err(AppError::UnknownRelationship { relationship, .. }) => assert_eq!(relationship, "tags"),
            other => panic!("unexpected {other:?}"),
        }
        match resolver.resolve(&post, &json!("comments.spam"), None) {
            Err(AppError::UnknownScope { model, scope }) => {
                assert_eq!((model.as_str(), scope.as_str()), ("comment", "spam"))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(resolver.resolve(&post, &json!(42), None).unwrap_err().is_validation());
    }
}
