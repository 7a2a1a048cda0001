//! Attaches related rows to select results.
//!
//! Paths are processed left to right, grouped by their first hop so that
//! `comments` and `comments.author` share one fetch. Each hop issues a single
//! batched `in` select over the distinct keys found in the current rows;
//! deeper hops ride along as that select's own `expand`.

use serde_json::Value;
use shared::dto::{FilterCondition, FilterGroup, FilterOp, SelectOperation};
use shared::error::Result;
use shared::predicate::{distinct_values, loose_eq};
use tracing::debug;

use crate::model::ModelDefinition;
use crate::query::QueryEngine;

pub struct RelationshipExpander<'a> {
    engine: &'a QueryEngine,
}

/// First hop of a set of expand paths and the remainders that follow it.
fn group_by_head(paths: &[String]) -> Vec<(&str, Vec<String>)> {
    let mut groups: Vec<(&str, Vec<String>)> = Vec::new();
    for path in paths {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path.as_str(), None),
        };
        let idx = match groups.iter().position(|(h, _)| *h == head) {
            Some(idx) => idx,
            None => {
                groups.push((head, Vec::new()));
                groups.len() - 1
            }
        };
        if let Some(rest) = rest {
            if !groups[idx].1.iter().any(|r| r == rest) {
                groups[idx].1.push(rest.to_string());
            }
        }
    }
    groups
}

impl<'a> RelationshipExpander<'a> {
    pub fn new(engine: &'a QueryEngine) -> Self {
        Self { engine }
    }

    pub async fn expand(
        &self,
        model: &ModelDefinition,
        mut rows: Vec<Value>,
        paths: &[String],
    ) -> Result<Vec<Value>> {
        for (head, rest) in group_by_head(paths) {
            rows = self.expand_hop(model, rows, head, rest).await?;
        }
        Ok(rows)
    }

    async fn expand_hop(
        &self,
        model: &ModelDefinition,
        mut rows: Vec<Value>,
        name: &str,
        rest: Vec<String>,
    ) -> Result<Vec<Value>> {
        let relationship = model.relationship(name)?;
        let related = self.engine.registry.get(relationship.related())?;
        let keys = relationship.key_mapping();

        let values = distinct_values(rows.iter().filter_map(|row| row.get(keys.source)));
        if values.is_empty() {
            return Ok(rows);
        }
        debug!(
            model = %model.name,
            relationship = name,
            keys = values.len(),
            "batched expand"
        );

        let filters = FilterGroup::and(vec![
            FilterCondition::new(keys.target, FilterOp::In, Value::Array(values)).into(),
        ]);
        let operation = SelectOperation {
            table: related.table().to_string(),
            model_name: related.name.clone(),
            purpose: Some("expand".into()),
            filters: related.guard(Some(filters)),
            expand: rest,
            ..Default::default()
        };
        let related_rows = self
            .engine
            .execute_select(related.clone(), operation)
            .await?
            .result;

        for row in rows.iter_mut() {
            let key = row.get(keys.source).cloned().unwrap_or(Value::Null);
            let mut matches = related_rows.iter().filter(|candidate| {
                !key.is_null()
                    && candidate
                        .get(keys.target)
                        .is_some_and(|target| loose_eq(target, &key))
            });
            let attached = if relationship.is_collection() {
                Value::Array(matches.cloned().collect())
            } else {
                matches.next().cloned().unwrap_or(Value::Null)
            };
            if let Value::Object(map) = row {
                map.insert(name.to_string(), attached);
            }
        }
        Ok(rows)
    }
}
