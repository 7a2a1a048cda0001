//! Task handlers invoked by Task states, and the registry resolving a
//! state's `Resource` to its handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared::dto::SelectResponse;
use shared::error::{AppError, Result};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::database;
use crate::model::AttributeType;

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, input: Value, ctx: &ExecutionContext) -> Result<Value>;
}

/// Wraps a synchronous closure as a task.
pub struct FnTask<F>(pub F);

#[async_trait]
impl<F> TaskHandler for FnTask<F>
where
    F: Fn(Value, &ExecutionContext) -> Result<Value> + Send + Sync,
{
    async fn run(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        (self.0)(input, ctx)
    }
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every built-in resource.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("clean_input", FnTask(clean_input));
        registry.register("validate", FnTask(validate));
        registry.register("generate_attributes", FnTask(generate_attributes));
        registry.register("transform_result", FnTask(transform_result));
        registry.register("transform_results", FnTask(transform_results));
        registry.register("handle_not_found", FnTask(handle_not_found));
        database::register(&mut registry);
        registry
    }

    /// Adds or replaces the handler for `resource`.
    pub fn register(&mut self, resource: impl Into<String>, handler: impl TaskHandler + 'static) {
        self.handlers.insert(resource.into(), Arc::new(handler));
    }

    pub fn contains(&self, resource: &str) -> bool {
        self.handlers.contains_key(resource)
    }

    pub fn get(&self, resource: &str) -> Result<Arc<dyn TaskHandler>> {
        self.handlers
            .get(resource)
            .cloned()
            .ok_or_else(|| AppError::UnknownTask(resource.to_string()))
    }
}

/// Applies `f` to the single row or each row of a bulk payload.
fn for_each_row(
    input: Value,
    mut f: impl FnMut(Option<usize>, Map<String, Value>) -> Result<Map<String, Value>>,
) -> Result<Value> {
    match input {
        Value::Object(row) => Ok(Value::Object(f(None, row)?)),
        Value::Array(rows) => rows
            .into_iter()
            .enumerate()
            .map(|(idx, row)| match row {
                Value::Object(row) => f(Some(idx), row).map(Value::Object),
                _ => Err(AppError::validation(format!("rows[{idx}]"), "row must be an object")),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        _ => Err(AppError::validation("payload", "expected an object or a list of objects")),
    }
}

/// Drops attributes the schema does not know. Models without a schema keep
/// everything.
fn clean_input(input: Value, ctx: &ExecutionContext) -> Result<Value> {
    let schema = &ctx.model.schema;
    if schema.is_empty() {
        return Ok(input);
    }
    for_each_row(input, |_, row| {
        let (kept, dropped): (Map<String, Value>, Map<String, Value>) =
            row.into_iter().partition(|(k, _)| schema.contains_key(k));
        if !dropped.is_empty() {
            debug!(
                model = %ctx.model.name,
                dropped = ?dropped.keys().collect::<Vec<_>>(),
                "clean_input dropped unknown attributes"
            );
        }
        Ok(kept)
    })
}

fn check_types(
    schema: &std::collections::BTreeMap<String, AttributeType>,
    prefix: &str,
    row: &Map<String, Value>,
) -> Result<()> {
    for (attribute, value) in row {
        if let Some(ty) = schema.get(attribute) {
            if !ty.accepts(value) {
                return Err(AppError::validation(
                    format!("{prefix}{attribute}"),
                    format!("expected {ty}"),
                ));
            }
        }
    }
    Ok(())
}

/// Type-checks payload values against the schema: rows for `create`, the
/// `data` map for `update`. Other actions pass through.
fn validate(input: Value, ctx: &ExecutionContext) -> Result<Value> {
    let schema = &ctx.model.schema;
    match ctx.action.as_str() {
        "create" => for_each_row(input, |idx, row| {
            let prefix = idx.map(|i| format!("rows[{i}].")).unwrap_or_default();
            check_types(schema, &prefix, &row)?;
            Ok(row)
        }),
        "update" => {
            if let Some(Value::Object(data)) = input.get("data") {
                check_types(schema, "data.", data)?;
            }
            Ok(input)
        }
        _ => Ok(input),
    }
}

fn generate_attributes(input: Value, ctx: &ExecutionContext) -> Result<Value> {
    let model = &ctx.model;
    let pk = model.primary_key();
    let uuid_key = model.schema.get(pk) == Some(&AttributeType::Uuid);
    let now = if model.config.timestamps {
        Some(
            OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .map_err(anyhow::Error::from)?,
        )
    } else {
        None
    };
    for_each_row(input, |_, mut row| {
        if uuid_key && row.get(pk).map_or(true, Value::is_null) {
            row.insert(pk.to_string(), json!(Uuid::new_v4().to_string()));
        }
        if let Some(now) = &now {
            row.entry("created_at").or_insert_with(|| json!(now));
            row.insert("updated_at".into(), json!(now));
        }
        Ok(row)
    })
}

fn transform_result(input: Value, _ctx: &ExecutionContext) -> Result<Value> {
    Ok(json!({ "data": input }))
}

/// Shapes a select response into `{data, meta}`.
fn transform_results(input: Value, _ctx: &ExecutionContext) -> Result<Value> {
    let response: SelectResponse = serde_json::from_value(input)
        .map_err(|e| AppError::validation("result", e.to_string()))?;
    let count = response.result.len();
    let pagination = response.operation.pagination.as_ref();
    Ok(json!({
        "data": response.result,
        "meta": {
            "count": count,
            "page": pagination.and_then(|p| p.page),
            "per_page": pagination.map(|p| p.per_page),
            "total": response.total.unwrap_or(count as u64),
        }
    }))
}

fn handle_not_found(_input: Value, ctx: &ExecutionContext) -> Result<Value> {
    Err(AppError::NotFound {
        model: ctx.model.name.clone(),
    })
}
