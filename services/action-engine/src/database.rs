//! `database.*` task resources: each builds one canonical operation for the
//! current model and hands it to the operator.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use shared::dto::{
    DatabaseOperation, DeleteOperation, FilterCondition, FilterGroup, FilterOp, InsertOperation,
    InsertPayload, UpdateOperation,
};
use shared::error::{AppError, Result};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::filter;
use crate::query::{PageRequest, SelectRequest};
use crate::tasks::{TaskHandler, TaskRegistry};

pub(crate) fn register(registry: &mut TaskRegistry) {
    registry.register("database.insert", Insert);
    registry.register("database.read", Read);
    registry.register("database.select", Select { paginate: false });
    registry.register("database.paginate", Select { paginate: true });
    registry.register("database.update", Update);
    registry.register("database.soft_delete", Delete { soft: true });
    registry.register("database.hard_delete", Delete { soft: false });
}

fn as_row(value: Value, field: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(AppError::validation(field, "expected an object")),
    }
}

/// Required filter tree under `key`, in any accepted shape.
fn conditions(input: &Value, key: &str, ctx: &ExecutionContext) -> Result<FilterGroup> {
    let raw = input.get(key).unwrap_or(&Value::Null);
    filter::parse(raw)?.ok_or_else(|| {
        AppError::validation(key, format!("{} requires `{key}`", ctx.action))
    })
}

pub struct Insert;

#[async_trait]
impl TaskHandler for Insert {
    async fn run(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let single = input.is_object();
        let payload = match input {
            Value::Object(row) => InsertPayload::Row(row),
            Value::Array(rows) => InsertPayload::Rows(
                rows.into_iter()
                    .enumerate()
                    .map(|(idx, row)| as_row(row, &format!("rows[{idx}]")))
                    .collect::<Result<Vec<_>>>()?,
            ),
            _ => return Err(AppError::validation("payload", "expected an object or a list")),
        };
        let operation = InsertOperation::new(ctx.model.table(), ctx.model.name.clone(), payload)?;
        let rows = ctx
            .operator
            .execute(DatabaseOperation::Insert(operation))
            .await?
            .into_rows();
        debug!(model = %ctx.model.name, rows = rows.len(), "inserted");
        Ok(if single {
            rows.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(rows)
        })
    }
}

/// Reads rows back. With a `filters` key (and no `filters` attribute in the
/// schema) the input is a select request answered with its first row or
/// null; otherwise the input is a row or list of rows re-read by primary key.
pub struct Read;

#[async_trait]
impl TaskHandler for Read {
    async fn run(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let model = &ctx.model;
        let engine = ctx.query();
        let pk = model.primary_key();

        let filter_mode =
            input.get("filters").is_some() && !model.schema.contains_key("filters");
        if filter_mode {
            let mut request = SelectRequest::from_value(input)?;
            request.pagination = Some(PageRequest {
                page: Some(1),
                per_page: Some(1),
                cursor: None,
            });
            let response = engine.select(&model.name, &request).await?;
            return Ok(response.result.into_iter().next().unwrap_or(Value::Null));
        }

        let (keys, single) = match &input {
            Value::Object(row) => match row.get(pk) {
                Some(key) if !key.is_null() => (vec![key.clone()], true),
                _ => {
                    debug!(model = %model.name, "row has no primary key, skipping re-read");
                    return Ok(input);
                }
            },
            Value::Array(rows) => {
                let keys: Vec<Value> = rows
                    .iter()
                    .filter_map(|r| r.get(pk))
                    .filter(|k| !k.is_null())
                    .cloned()
                    .collect();
                if keys.is_empty() {
                    return Ok(input);
                }
                (keys, false)
            }
            Value::Null => return Ok(Value::Null),
            _ => return Err(AppError::validation("payload", "expected a row or a list of rows")),
        };

        let condition = if single {
            FilterCondition::new(pk, FilterOp::Eq, keys[0].clone())
        } else {
            FilterCondition::new(pk, FilterOp::In, Value::Array(keys))
        };
        let request = SelectRequest {
            filters: serde_json::to_value(FilterGroup::and(vec![condition.into()]))
                .map_err(anyhow::Error::from)?,
            purpose: Some("read".into()),
            ..Default::default()
        };
        let rows = engine.select(&model.name, &request).await?.result;
        Ok(if single {
            rows.into_iter().next().unwrap_or(Value::Null)
        } else {
            Value::Array(rows)
        })
    }
}

/// Runs a select request and returns the whole response (rows, echoed
/// operation, total). The paginating variant always pages, falling back to
/// the configured page size.
pub struct Select {
    paginate: bool,
}

#[async_trait]
impl TaskHandler for Select {
    async fn run(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let mut request = SelectRequest::from_value(input)?;
        if self.paginate && request.pagination.is_none() {
            request.pagination = Some(PageRequest::default());
        }
        let response = ctx.query().select(&ctx.model.name, &request).await?;
        Ok(serde_json::to_value(response).map_err(anyhow::Error::from)?)
    }
}

pub struct Update;

#[async_trait]
impl TaskHandler for Update {
    async fn run(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let model = &ctx.model;
        let mut data = as_row(input.get("data").cloned().unwrap_or(Value::Null), "data")?;
        if model.config.timestamps {
            let now = OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .map_err(anyhow::Error::from)?;
            data.insert("updated_at".into(), json!(now));
        }
        let group = conditions(&input, "conditions", ctx)?;
        let guarded = ctx.query().resolve_conditions(model, group).await?;
        let rows = ctx
            .operator
            .execute(DatabaseOperation::Update(UpdateOperation {
                table: model.table().to_string(),
                model_name: model.name.clone(),
                data,
                conditions: guarded,
            }))
            .await?
            .into_rows();
        debug!(model = %model.name, rows = rows.len(), "updated");
        Ok(Value::Array(rows))
    }
}

pub struct Delete {
    soft: bool,
}

#[async_trait]
impl TaskHandler for Delete {
    async fn run(&self, input: Value, ctx: &ExecutionContext) -> Result<Value> {
        let model = &ctx.model;
        let group = conditions(&input, "conditions", ctx)?;
        let conditions = ctx.query().resolve_conditions(model, group).await?;
        let rows = ctx
            .operator
            .execute(DatabaseOperation::Delete(DeleteOperation {
                table: model.table().to_string(),
                model_name: model.name.clone(),
                conditions,
                soft: self.soft,
            }))
            .await?
            .into_rows();
        debug!(model = %model.name, rows = rows.len(), soft = self.soft, "deleted");
        Ok(Value::Array(rows))
    }
}
