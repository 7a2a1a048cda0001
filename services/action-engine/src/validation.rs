//! Structural checks run before an action's graph starts. Each rejects
//! malformed input with the offending field named; on success the input is
//! returned with its filter trees normalized and sort directions lowercased.

use serde_json::{Map, Value};
use shared::config::Settings;
use shared::dto::SortDirection;
use shared::error::{AppError, Result};

use crate::action::Action;
use crate::filter;

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn object<'a>(input: &'a mut Value, action: &Action) -> Result<&'a mut Map<String, Value>> {
    input.as_object_mut().ok_or_else(|| {
        AppError::validation("payload", format!("{action} expects an object"))
    })
}

/// Replaces `input[key]` with its canonical filter tree. A tree that
/// normalizes to nothing is removed.
fn normalize_tree(input: &mut Map<String, Value>, key: &str) -> Result<()> {
    let Some(raw) = input.get(key) else {
        return Ok(());
    };
    match filter::parse(raw).map_err(|e| prefix(e, key))? {
        Some(group) => {
            let canonical = serde_json::to_value(group).map_err(anyhow::Error::from)?;
            input.insert(key.to_string(), canonical);
        }
        None => {
            input.remove(key);
        }
    }
    Ok(())
}

fn prefix(err: AppError, key: &str) -> AppError {
    match err {
        AppError::Validation { field, message } if field != key && field != "filters" => {
            AppError::validation(format!("{key}.{field}"), message)
        }
        AppError::Validation { message, .. } => AppError::validation(key, message),
        other => other,
    }
}

fn require(input: &Map<String, Value>, key: &str, action: &Action) -> Result<()> {
    if is_blank(input.get(key)) {
        return Err(AppError::validation(key, format!("{action} requires `{key}`")));
    }
    Ok(())
}

fn check_expand(input: &Map<String, Value>, settings: &Settings) -> Result<()> {
    let Some(expand) = input.get("expand") else {
        return Ok(());
    };
    let Value::Array(paths) = expand else {
        return Err(AppError::validation("expand", "expected a list of relationship paths"));
    };
    for (idx, path) in paths.iter().enumerate() {
        let Some(path) = path.as_str() else {
            return Err(AppError::validation(format!("expand[{idx}]"), "expected a string"));
        };
        if path.split('.').count() > settings.max_expand_depth {
            return Err(AppError::validation(
                format!("expand[{idx}]"),
                format!("at most {} hops allowed", settings.max_expand_depth),
            ));
        }
    }
    Ok(())
}

fn check_pagination(input: &Map<String, Value>, settings: &Settings) -> Result<()> {
    let Some(pagination) = input.get("pagination").filter(|v| !v.is_null()) else {
        return Ok(());
    };
    let Value::Object(pagination) = pagination else {
        return Err(AppError::validation("pagination", "expected an object"));
    };
    for key in ["page", "per_page"] {
        match pagination.get(key) {
            None | Some(Value::Null) => {}
            Some(value) => match value.as_u64() {
                Some(n) if n >= 1 => {
                    if key == "per_page" && n > settings.max_per_page {
                        return Err(AppError::validation(
                            "pagination.per_page",
                            format!("must be at most {}", settings.max_per_page),
                        ));
                    }
                }
                _ => {
                    return Err(AppError::validation(
                        format!("pagination.{key}"),
                        "must be an integer >= 1",
                    ))
                }
            },
        }
    }
    Ok(())
}

fn check_sorts(input: &mut Map<String, Value>) -> Result<()> {
    let Some(sorts) = input.get_mut("sorts") else {
        return Ok(());
    };
    let Value::Array(sorts) = sorts else {
        return Err(AppError::validation("sorts", "expected a list"));
    };
    for (idx, sort) in sorts.iter_mut().enumerate() {
        let Value::Object(sort) = sort else {
            return Err(AppError::validation(format!("sorts[{idx}]"), "expected an object"));
        };
        match sort.get("attribute").and_then(Value::as_str) {
            Some(a) if !a.is_empty() => {}
            _ => {
                return Err(AppError::validation(
                    format!("sorts[{idx}].attribute"),
                    "sort requires an attribute",
                ))
            }
        }
        let direction = sort
            .get("direction")
            .and_then(Value::as_str)
            .and_then(|d| d.parse::<SortDirection>().ok())
            .ok_or_else(|| {
                AppError::validation(
                    format!("sorts[{idx}].direction"),
                    "direction must be `asc` or `desc`",
                )
            })?;
        sort.insert("direction".into(), Value::String(direction.to_string()));
    }
    Ok(())
}

/// Checks `input` for `action` and returns it in canonical form. Custom
/// actions pass through untouched.
pub fn validate_input(action: &Action, mut input: Value, settings: &Settings) -> Result<Value> {
    match action {
        Action::Create => {
            if is_blank(Some(&input)) {
                return Err(AppError::validation("payload", "create requires a non-empty payload"));
            }
            if let Value::Array(rows) = &input {
                if let Some(idx) = rows.iter().position(|r| is_blank(Some(r))) {
                    return Err(AppError::validation(format!("rows[{idx}]"), "row must not be empty"));
                }
            }
        }
        Action::Update => {
            let map = object(&mut input, action)?;
            require(map, "conditions", action)?;
            match map.get("data") {
                Some(Value::Object(data)) if !data.is_empty() => {}
                _ => {
                    return Err(AppError::validation(
                        "data",
                        "update requires a non-empty `data` map",
                    ))
                }
            }
            normalize_tree(map, "conditions")?;
        }
        Action::Delete => {
            let map = object(&mut input, action)?;
            require(map, "conditions", action)?;
            normalize_tree(map, "conditions")?;
        }
        Action::ReadOne => {
            let map = object(&mut input, action)?;
            require(map, "filters", action)?;
            normalize_tree(map, "filters")?;
            check_expand(map, settings)?;
        }
        Action::ReadList => {
            let map = object(&mut input, action)?;
            check_pagination(map, settings)?;
            check_sorts(map)?;
            check_expand(map, settings)?;
            normalize_tree(map, "filters")?;
        }
        Action::Custom(_) => {}
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(action: &str, input: Value) -> Result<Value> {
        validate_input(&Action::parse_name(action), input, &Settings::default())
    }

    #[test]
    fn create_requires_payload() {
        assert_eq!(check("create", json!({})).unwrap_err().field(), Some("payload"));
        assert_eq!(check("create", json!([])).unwrap_err().field(), Some("payload"));
        assert_eq!(check("create", json!([{"a": 1}, {}])).unwrap_err().field(), Some("rows[1]"));
        assert!(check("create", json!({"a": 1})).is_ok());
    }

    #[test]
    fn update_and_delete_require_conditions() {
        let err = check("update", json!({"data": {"a": 1}})).unwrap_err();
        assert_eq!(err.field(), Some("conditions"));
        let err = check("update", json!({"conditions": {"id": 1}, "data": {}})).unwrap_err();
        assert_eq!(err.field(), Some("data"));
        let err = check("delete", json!({})).unwrap_err();
        assert_eq!(err.field(), Some("conditions"));
        let err = check("delete", json!({"conditions": []})).unwrap_err();
        assert_eq!(err.field(), Some("conditions"));
    }

    #[test]
    fn empty_filters_mean_no_filter() {
        let out = check("readList", json!({"filters": [], "sorts": []})).unwrap();
        assert!(out.get("filters").is_none());
        let out = check("readList", json!({"filters": {}})).unwrap();
        assert!(out.get("filters").is_none());
        assert_eq!(check("readOne", json!({"filters": {}})).unwrap_err().field(), Some("filters"));
    }

    #[test]
    fn conditions_are_normalized() {
        let out = check("delete", json!({"conditions": [{"attribute": "id", "value": 3}]})).unwrap();
        assert_eq!(
            out["conditions"],
            json!({"op": "and", "conditions": [{"attribute": "id", "op": "is", "value": 3}]})
        );
        let out = check("update", json!({"conditions": {"id": 3}, "data": {"a": 1}})).unwrap();
        assert_eq!(out["conditions"]["conditions"][0]["op"], "eq");
    }

    #[test]
    fn malformed_conditions_name_nested_field() {
        let err = check(
            "delete",
            json!({"conditions": {"op": "and", "conditions": [{"attribute": "a", "op": "near"}]}}),
        )
        .unwrap_err();
        assert_eq!(err.field(), Some("conditions.conditions[0].op"));
    }

    #[test]
    fn read_one_requires_filters() {
        assert_eq!(check("readOne", json!({})).unwrap_err().field(), Some("filters"));
        assert!(check("readOne", json!({"filters": {"id": 1}})).is_ok());
    }

    #[test]
    fn read_list_pagination_bounds() {
        let err = check("readList", json!({"pagination": {"page": 0, "per_page": 10}})).unwrap_err();
        assert_eq!(err.field(), Some("pagination.page"));
        let err = check("readList", json!({"pagination": {"page": 1, "per_page": 0}})).unwrap_err();
        assert_eq!(err.field(), Some("pagination.per_page"));
        let err = check("readList", json!({"pagination": {"per_page": 501}})).unwrap_err();
        assert_eq!(err.field(), Some("pagination.per_page"));
        assert!(check("readList", json!({"pagination": {"page": 2, "per_page": 10}})).is_ok());
    }

    #[test]
    fn read_list_sorts() {
        let err = check("readList", json!({"sorts": [{"attribute": "x", "direction": "up"}]}))
            .unwrap_err();
        assert_eq!(err.field(), Some("sorts[0].direction"));
        let err = check("readList", json!({"sorts": [{"direction": "asc"}]})).unwrap_err();
        assert_eq!(err.field(), Some("sorts[0].attribute"));
        let out = check("readList", json!({"sorts": [{"attribute": "x", "direction": "DESC"}]}))
            .unwrap();
        assert_eq!(out["sorts"][0]["direction"], "desc");
    }

    #[test]
    fn expand_depth_is_bounded() {
        let err = check("readList", json!({"expand": ["a.b.c.d.e.f"]})).unwrap_err();
        assert_eq!(err.field(), Some("expand[0]"));
        assert!(check("readList", json!({"expand": ["a.b"]})).is_ok());
    }

    #[test]
    fn custom_actions_pass_through() {
        assert_eq!(check("publish", json!(42)).unwrap(), json!(42));
    }
}
