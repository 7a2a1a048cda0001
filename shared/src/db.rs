//! The database operator contract and an in-memory reference operator.
//!
//! The operator is the only component that touches storage. It receives one
//! canonical [`DatabaseOperation`] at a time and answers with the affected
//! rows, or for selects with the rows plus an echo of the request.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::dto::{
    DatabaseOperation, DeleteOperation, InsertOperation, OperationOutput, SelectOperation,
    SelectResponse, UpdateOperation, DELETED_AT,
};
use crate::predicate::{compare, matches_group};

#[async_trait]
pub trait DatabaseOperator: Send + Sync {
    async fn execute(&self, operation: DatabaseOperation) -> anyhow::Result<OperationOutput>;
}

/// Table-per-`Vec` store that logs every operation it receives.
#[derive(Default)]
pub struct MemoryOperator {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    log: Mutex<Vec<DatabaseOperation>>,
}

impl MemoryOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed(&self, table: &str, rows: Vec<Value>) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables.read().await.get(table).cloned().unwrap_or_default()
    }

    /// Every operation received so far, in order.
    pub async fn operations(&self) -> Vec<DatabaseOperation> {
        self.log.lock().await.clone()
    }

    pub async fn selects_on(&self, table: &str) -> Vec<SelectOperation> {
        self.log
            .lock()
            .await
            .iter()
            .filter_map(|op| match op {
                DatabaseOperation::Select(s) if s.table == table => Some(s.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn clear_log(&self) {
        self.log.lock().await.clear();
    }

    async fn insert(&self, op: InsertOperation) -> Vec<Value> {
        let rows: Vec<Value> = op
            .payload
            .rows()
            .into_iter()
            .map(|r| Value::Object(r.clone()))
            .collect();
        self.seed(&op.table, rows.clone()).await;
        rows
    }

    async fn update(&self, op: UpdateOperation) -> Vec<Value> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(&op.table) else {
            return Vec::new();
        };
        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|r| matches_group(&op.conditions, r)) {
            if let Value::Object(map) = row {
                for (k, v) in &op.data {
                    map.insert(k.clone(), v.clone());
                }
            }
            updated.push(row.clone());
        }
        updated
    }

    async fn delete(&self, op: DeleteOperation) -> Vec<Value> {
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(&op.table) else {
            return Vec::new();
        };
        if op.soft {
            let stamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let mut marked = Vec::new();
            for row in rows.iter_mut().filter(|r| matches_group(&op.conditions, r)) {
                if let Value::Object(map) = row {
                    map.insert(DELETED_AT.to_string(), json!(stamp));
                }
                marked.push(row.clone());
            }
            marked
        } else {
            let (removed, kept): (Vec<Value>, Vec<Value>) = std::mem::take(rows)
                .into_iter()
                .partition(|r| matches_group(&op.conditions, r));
            *rows = kept;
            removed
        }
    }

    async fn select(&self, op: SelectOperation) -> SelectResponse {
        let tables = self.tables.read().await;
        let mut rows: Vec<Value> = tables
            .get(&op.table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| op.filters.as_ref().map_or(true, |f| matches_group(f, r)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if !op.sorts.is_empty() {
            rows.sort_by(|a, b| {
                op.sorts.iter().fold(Ordering::Equal, |acc, sort| {
                    acc.then_with(|| {
                        let ord = compare(
                            a.get(&sort.attribute).unwrap_or(&Value::Null),
                            b.get(&sort.attribute).unwrap_or(&Value::Null),
                        )
                        .unwrap_or(Ordering::Equal);
                        match sort.direction {
                            crate::dto::SortDirection::Asc => ord,
                            crate::dto::SortDirection::Desc => ord.reverse(),
                        }
                    })
                })
            });
        }

        let total = op.pagination.as_ref().map(|_| rows.len() as u64);
        if let Some(p) = &op.pagination {
            rows = rows
                .into_iter()
                .skip(usize::try_from(p.offset()).unwrap_or(usize::MAX))
                .take(usize::try_from(p.per_page).unwrap_or(usize::MAX))
                .collect();
        }

        if let Some(attributes) = &op.attributes {
            rows = rows
                .into_iter()
                .map(|row| {
                    let projected: Map<String, Value> = attributes
                        .iter()
                        .filter_map(|a| row.get(a).map(|v| (a.clone(), v.clone())))
                        .collect();
                    Value::Object(projected)
                })
                .collect();
        }

        SelectResponse {
            result: rows,
            operation: op,
            total,
        }
    }
}

#[async_trait]
impl DatabaseOperator for MemoryOperator {
    async fn execute(&self, operation: DatabaseOperation) -> anyhow::Result<OperationOutput> {
        debug!(kind = operation.kind(), table = operation.table(), "memory operator");
        self.log.lock().await.push(operation.clone());
        Ok(match operation {
            DatabaseOperation::Insert(op) => OperationOutput::Rows(self.insert(op).await),
            DatabaseOperation::Update(op) => OperationOutput::Rows(self.update(op).await),
            DatabaseOperation::Delete(op) => OperationOutput::Rows(self.delete(op).await),
            DatabaseOperation::Select(op) => OperationOutput::Selected(self.select(op).await),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{FilterCondition, FilterGroup, FilterOp, Pagination, Sort, SortDirection};

    fn eq(attribute: &str, value: Value) -> FilterGroup {
        FilterGroup::and(vec![FilterCondition::new(attribute, FilterOp::Eq, value).into()])
    }

    async fn seeded() -> MemoryOperator {
        let db = MemoryOperator::new();
        db.seed(
            "posts",
            vec![
                json!({"id": 1, "title": "b", "author_id": 7}),
                json!({"id": 2, "title": "a", "author_id": 7}),
                json!({"id": 3, "title": "c", "author_id": 8}),
            ],
        )
        .await;
        db
    }

    #[tokio::test]
    async fn select_filters_sorts_and_pages() {
        let db = seeded().await;
        let out = db
            .execute(DatabaseOperation::Select(SelectOperation {
                table: "posts".into(),
                model_name: "post".into(),
                filters: Some(eq("author_id", json!(7))),
                sorts: vec![Sort { attribute: "title".into(), direction: SortDirection::Asc }],
                pagination: Some(Pagination { page: Some(1), per_page: 1, cursor: None }),
                attributes: Some(vec!["id".into()]),
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_select()
            .unwrap();
        assert_eq!(out.result, vec![json!({"id": 2})]);
        assert_eq!(out.total, Some(2));
        assert_eq!(out.operation.table, "posts");
    }

    #[tokio::test]
    async fn soft_and_hard_delete() {
        let db = seeded().await;
        let marked = db
            .execute(DatabaseOperation::Delete(DeleteOperation {
                table: "posts".into(),
                model_name: "post".into(),
                conditions: eq("id", json!(1)),
                soft: true,
            }))
            .await
            .unwrap()
            .into_rows();
        assert_eq!(marked.len(), 1);
        assert!(marked[0].get(DELETED_AT).is_some());
        assert_eq!(db.rows("posts").await.len(), 3);

        let removed = db
            .execute(DatabaseOperation::Delete(DeleteOperation {
                table: "posts".into(),
                model_name: "post".into(),
                conditions: eq("author_id", json!(7)),
                soft: false,
            }))
            .await
            .unwrap()
            .into_rows();
        assert_eq!(removed.len(), 2);
        assert_eq!(db.rows("posts").await, vec![json!({"id": 3, "title": "c", "author_id": 8})]);
        assert_eq!(db.operations().await.len(), 2);
    }
}
